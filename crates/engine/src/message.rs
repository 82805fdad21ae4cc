//! Message types flowing between the pipeline stages.
//!
//! All communication is by message; no state is shared by reference across
//! components. Queue shapes:
//!
//! ```text
//! Watcher ──FileSyncEvent (unbounded)──▶ Indexer pool
//! Indexer ──IndexUpdate (capacity 1)───▶ Index actor
//! all stages ──StatusUpdate (unbounded)─▶ Index actor
//! Search engine ──UserRequest──────────▶ Index actor
//! ```
//!
//! The update queue is bounded to capacity 1 so slow indexing throttles file
//! reads; the event and status queues are unbounded because the watcher
//! cannot drop notifications without correctness loss.
//!
//! A discarded request (its channel closed by a supervisor restart) is
//! observed by the requester as a failed send or a closed reply channel; for
//! a find request that closes the result stream, which the caller reports as
//! a cancellation.

use std::{collections::HashSet, time::Duration};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::intern::{FileAddress, Token};

/// Origin of a file-sync event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSource {
  /// Emitted by the initial tree walk.
  InitialSync,
  /// Emitted by a filesystem notification after the walk completed.
  Watcher,
}

/// Mapped native event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
  Create,
  Modify,
  Delete,
}

/// One observed file change, stamped from the logical clock at send time.
#[derive(Debug, Clone)]
pub struct FileSyncEvent {
  pub t: u64,
  pub address: FileAddress,
  pub source: SyncSource,
  pub kind: SyncKind,
}

/// Result of indexing one file-sync event, addressed to the index actor.
#[derive(Debug)]
pub enum IndexUpdate {
  /// Replace the file's token set. `tokens` is already deduplicated.
  UpdateFileContent {
    t: u64,
    address: FileAddress,
    tokens: HashSet<Token>,
  },
  /// Drop the file from both maps.
  RemoveFile { t: u64, address: FileAddress },
}

impl IndexUpdate {
  pub fn address(&self) -> &FileAddress {
    match self {
      IndexUpdate::UpdateFileContent { address, .. } | IndexUpdate::RemoveFile { address, .. } => address,
    }
  }
}

/// Progress signal consumed by the index actor's counter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
  /// The notification subscription is live.
  WatcherStarted,
  /// The initial walk finished enumerating the tree. Delivered strictly
  /// after every initial-sync `FileUpdated` for the generation.
  AllFilesDiscovered,
  /// One file-sync event was emitted.
  FileUpdated,
  /// A native notification arrived while the initial walk was still
  /// running; it is buffered and released after the walk.
  WatcherDiscoveredFileDuringInitialization,
}

/// A query addressed to the index actor.
#[derive(Debug)]
pub enum UserRequest {
  /// Snapshot the counters.
  Status { reply: oneshot::Sender<StatusResult> },
  /// Stream candidate files for a query. The actor stops producing as soon
  /// as the receiver is dropped.
  Find {
    query: String,
    candidates: mpsc::Sender<FileAddress>,
  },
  /// Fail the generation on purpose (the shell's `error` command).
  InjectFailure { reason: String },
}

/// Counter snapshot answered to a status request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusResult {
  pub indexed_files: usize,
  pub known_tokens: usize,
  /// Time from actor start until the watcher subscription was live.
  pub watcher_start_time: Option<Duration>,
  /// Time from actor start until the initial sync completed.
  pub initial_sync_time: Option<Duration>,
  pub handled_modifications: u64,
  pub total_modifications: u64,
  /// True between generations; queries will miss results.
  pub is_broken: bool,
}

impl StatusResult {
  /// The fixed status reported while no generation is alive.
  pub fn broken() -> Self {
    Self {
      indexed_files: 0,
      known_tokens: 0,
      watcher_start_time: None,
      initial_sync_time: None,
      handled_modifications: 0,
      total_modifications: 0,
      is_broken: true,
    }
  }

  /// The initial sync has finished and every observed event was applied.
  pub fn is_in_sync(&self) -> bool {
    !self.is_broken
      && self.initial_sync_time.is_some()
      && self.handled_modifications == self.total_modifications
  }
}

/// Aggregate state published to observers through a replay-1, drop-oldest
/// broadcast. `Initial` is synthetic, present before any generation starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum IndexStateUpdate {
  Initial,
  Initializing { at: std::time::SystemTime },
  WatcherStarted { at: std::time::SystemTime },
  AllFilesDiscovered { at: std::time::SystemTime },
  InitialFileSyncCompleted { at: std::time::SystemTime },
  IndexFailed { reason: String },
  Restarting,
  Terminated { reason: String },
}

impl IndexStateUpdate {
  pub fn is_terminal(&self) -> bool {
    matches!(self, IndexStateUpdate::Terminated { .. })
  }
}
