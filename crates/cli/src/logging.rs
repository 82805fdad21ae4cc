//! Logging setup for the shell.
//!
//! Console logs go to stderr so they never interleave with query output on
//! stdout. The filter sits behind a reload handle: the `enable-logging`
//! command flips it to TRACE at runtime and an empty input line flips it
//! back, without touching the subscriber stack.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
  EnvFilter, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

/// Runtime switch for verbose logging.
pub struct LogToggle {
  handle: reload::Handle<EnvFilter, Registry>,
  base: String,
}

impl LogToggle {
  /// TRACE everything when on; back to the base filter when off.
  pub fn set_verbose(&self, on: bool) {
    let directives = if on { "trace" } else { self.base.as_str() };
    if let Ok(filter) = EnvFilter::try_new(directives) {
      let _ = self.handle.reload(filter);
    }
  }
}

/// Initialize the subscriber. Returns the toggle plus the appender guard
/// that must stay alive while file logging is in use.
pub fn init(base: &str, log_file: Option<&Path>) -> anyhow::Result<(LogToggle, Option<WorkerGuard>)> {
  let filter = EnvFilter::try_new(base).with_context(|| format!("invalid log filter `{base}`"))?;
  let (filter_layer, handle) = reload::Layer::new(filter);

  let (file_layer, guard) = match log_file {
    Some(path) => {
      let directory = path.parent().unwrap_or_else(|| Path::new("."));
      let file_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "findex.log".into());
      let appender = tracing_appender::rolling::never(directory, file_name);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = fmt::layer().with_ansi(false).with_target(true).with_writer(writer);
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter_layer)
    .with(file_layer)
    .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
    .init();

  Ok((
    LogToggle {
      handle,
      base: base.to_string(),
    },
    guard,
  ))
}
