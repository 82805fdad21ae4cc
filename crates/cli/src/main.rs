//! findex - live full-text search over a directory tree.

use std::path::PathBuf;

use anyhow::{Context, Result, ensure};
use clap::Parser;
use findex_engine::{EngineConfig, SearchEngine, SearchMode};
use tracing::info;

mod logging;
mod repl;

#[derive(Parser)]
#[command(name = "findex")]
#[command(about = "Live full-text search over a directory tree")]
struct Cli {
  /// Directory to index and watch
  #[arg(default_value = ".")]
  root: PathBuf,

  /// Tokenization mode: word or trigram
  #[arg(long, default_value_t = SearchMode::Word)]
  mode: SearchMode,

  /// Index once and serve a static snapshot (no filesystem watching)
  #[arg(long)]
  no_watch: bool,

  /// Base log filter (tracing EnvFilter syntax)
  #[arg(long, default_value = "info")]
  log_level: String,

  /// Also append logs to this file
  #[arg(long)]
  log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  let (logs, _guard) = logging::init(&cli.log_level, cli.log_file.as_deref())?;

  let root = cli
    .root
    .canonicalize()
    .with_context(|| format!("cannot open root directory {}", cli.root.display()))?;
  ensure!(root.is_dir(), "{} is not a directory", root.display());

  let config = EngineConfig::new(&root)
    .with_mode(cli.mode)
    .with_watcher(!cli.no_watch);
  info!(root = %root.display(), mode = %cli.mode, watch = !cli.no_watch, "starting index");

  let engine = SearchEngine::start(config);

  // Narrate index state transitions to the log.
  let mut states = engine.state_updates();
  tokio::spawn(async move {
    loop {
      {
        let state = states.borrow_and_update().clone();
        info!(state = ?state, "index state");
        if state.is_terminal() {
          break;
        }
      }
      if states.changed().await.is_err() {
        break;
      }
    }
  });

  repl::run(engine, logs).await
}
