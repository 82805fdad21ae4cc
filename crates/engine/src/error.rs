//! Error taxonomy for the engine.
//!
//! Two tiers, mirroring §7 of the design:
//! - [`SyncError`]: failures raised by the watcher/sync stage. All of them
//!   are fatal for the current generation.
//! - [`EngineError`]: the unified failure type returned by generation child
//!   tasks and classified by the supervisor.
//!
//! Transient per-event I/O errors (file vanished mid-read, unreadable
//! content) never appear here: the indexer swallows them and drops the event.

use std::path::PathBuf;

/// Fatal failures in the watcher/sync stage.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  #[error("failed to initialize filesystem watcher: {0}")]
  Init(#[source] notify::Error),

  #[error("failed to watch root: {0}")]
  Watch(#[source] notify::Error),

  #[error("filesystem notification stream failed: {0}")]
  Stream(#[source] notify::Error),

  /// The native notifier dropped events. The index can no longer be trusted
  /// and the generation must restart from a fresh walk.
  #[error("filesystem notification queue overflowed")]
  Overflow,

  #[error("watch root not found: {path}")]
  RootNotFound {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("initial file walk failed after {attempts} attempts: {source}")]
  Walk {
    attempts: u32,
    #[source]
    source: ignore::Error,
  },

  #[error("initial file walk task failed: {0}")]
  WalkTask(String),
}

/// Failure of a generation child task, as seen by the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error(transparent)]
  Sync(#[from] SyncError),

  /// Deliberately injected failure (the shell's `error` command).
  #[error("induced failure: {0}")]
  Induced(String),
}
