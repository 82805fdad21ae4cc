//! Engine configuration.

use std::{fmt, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::EngineError, tokenize};

/// Files larger than this are not indexed.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Parallel indexer workers per generation.
pub const DEFAULT_INDEXER_WORKERS: usize = 4;

/// Attempts for the initial tree walk before the generation fails.
pub const DEFAULT_WALK_RETRIES: u32 = 10;

/// Tokenization strategy. Selected at startup; shapes both indexing and
/// query-time candidate filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
  #[default]
  Word,
  Trigram,
}

impl SearchMode {
  /// Tokenize one line of file content.
  pub fn tokenize_line(&self, line: &str) -> Vec<String> {
    match self {
      SearchMode::Word => tokenize::word_tokens(line),
      SearchMode::Trigram => tokenize::trigram_tokens(line),
    }
  }

  /// Verification predicate applied while re-reading candidate files.
  /// Substring containment in both modes.
  pub fn line_matches(&self, line: &str, query: &str) -> bool {
    tokenize::line_matches(line, query)
  }
}

impl FromStr for SearchMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "word" => Ok(SearchMode::Word),
      "trigram" => Ok(SearchMode::Trigram),
      other => Err(format!("unknown search mode `{other}` (expected `word` or `trigram`)")),
    }
  }
}

impl fmt::Display for SearchMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SearchMode::Word => f.write_str("word"),
      SearchMode::Trigram => f.write_str("trigram"),
    }
  }
}

/// Diagnostic callback invoked when a stage hits a fatal error, before the
/// supervisor reacts to it.
pub type ErrorHook = Arc<dyn Fn(&EngineError) + Send + Sync>;

/// Configuration for one engine instance.
///
/// `root` must exist at startup. Everything else has defaults matching the
/// reference behavior: a 10 MiB file cap, 4 indexer workers, and 10 walk
/// attempts with linear 1 s backoff.
#[derive(Clone)]
pub struct EngineConfig {
  /// Directory tree to index and watch.
  pub root: PathBuf,
  /// Tokenizer and matcher selection.
  pub mode: SearchMode,
  /// When false, the tree is walked once and the index serves a static
  /// snapshot; no filesystem notifications are consumed.
  pub enable_watcher: bool,
  /// Files larger than this many bytes are skipped entirely.
  pub max_file_size: u64,
  /// Parallel indexer workers draining the file-sync event queue.
  pub indexer_workers: usize,
  /// Attempts for the initial tree walk.
  pub walk_retries: u32,
  /// Backoff unit between walk attempts; attempt `n` waits `(n-1)` units.
  pub walk_retry_backoff: Duration,
  /// Invoked when the notification stream fails.
  pub on_watcher_error: Option<ErrorHook>,
  /// Invoked when an initial walk attempt fails.
  pub on_initial_sync_error: Option<ErrorHook>,
}

impl EngineConfig {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      mode: SearchMode::default(),
      enable_watcher: true,
      max_file_size: DEFAULT_MAX_FILE_SIZE,
      indexer_workers: DEFAULT_INDEXER_WORKERS,
      walk_retries: DEFAULT_WALK_RETRIES,
      walk_retry_backoff: Duration::from_secs(1),
      on_watcher_error: None,
      on_initial_sync_error: None,
    }
  }

  pub fn with_mode(mut self, mode: SearchMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_watcher(mut self, enabled: bool) -> Self {
    self.enable_watcher = enabled;
    self
  }
}

impl fmt::Debug for EngineConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EngineConfig")
      .field("root", &self.root)
      .field("mode", &self.mode)
      .field("enable_watcher", &self.enable_watcher)
      .field("max_file_size", &self.max_file_size)
      .field("indexer_workers", &self.indexer_workers)
      .field("walk_retries", &self.walk_retries)
      .field("walk_retry_backoff", &self.walk_retry_backoff)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mode_parses_from_str() {
    assert_eq!("word".parse::<SearchMode>().unwrap(), SearchMode::Word);
    assert_eq!("TRIGRAM".parse::<SearchMode>().unwrap(), SearchMode::Trigram);
    assert!("fuzzy".parse::<SearchMode>().is_err());
  }

  #[test]
  fn defaults_match_reference_behavior() {
    let config = EngineConfig::new("/tmp");
    assert_eq!(config.max_file_size, 10 * 1024 * 1024);
    assert_eq!(config.indexer_workers, 4);
    assert_eq!(config.walk_retries, 10);
    assert!(config.enable_watcher);
  }
}
