//! Index actor: single owner of the inverted index and the sync counters.
//!
//! One logical consumer multiplexes three inputs; each loop iteration fully
//! handles one message, so mutations and queries are serialized without any
//! locks. The select is biased: cancellation first, then status updates,
//! then index updates, then user requests. Handling a status before the
//! update that follows it matters for the counters: the `FileUpdated` status
//! for an event is enqueued before the indexer can possibly enqueue the
//! matching update, and the bias keeps `handled ≤ total` observable at every
//! point in between.
//!
//! Candidate selection for a find request runs inline (it reads the maps
//! this actor owns); the selected candidates are then streamed by a detached
//! producer task through a capacity-1 channel, so the actor never waits on a
//! slow consumer. Consumer liveness is probed between filter stages and
//! between emitted items.

mod query;
mod state;

use std::{
  sync::Arc,
  time::{Instant, SystemTime},
};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::{
  config::SearchMode,
  error::EngineError,
  intern::{FileAddress, Interner},
  message::{IndexStateUpdate, IndexUpdate, StatusResult, StatusUpdate, UserRequest},
};

use self::state::IndexState;

/// How many removals between lazy interner sweeps.
const PRUNE_EVERY: u64 = 64;

/// Sync progress counters, owned by the actor.
#[derive(Debug)]
struct Counters {
  start_time: Instant,
  watcher_started_at: Option<Instant>,
  all_files_discovered_at: Option<Instant>,
  sync_completed_at: Option<Instant>,
  total_modifications: u64,
  handled_modifications: u64,
  discovered_during_init: u64,
}

impl Counters {
  fn new() -> Self {
    Self {
      start_time: Instant::now(),
      watcher_started_at: None,
      all_files_discovered_at: None,
      sync_completed_at: None,
      total_modifications: 0,
      handled_modifications: 0,
      discovered_during_init: 0,
    }
  }
}

pub struct IndexActor {
  mode: SearchMode,
  state: IndexState,
  counters: Counters,
  tokens: Arc<Interner>,
  removals_since_prune: u64,
  status_rx: mpsc::UnboundedReceiver<StatusUpdate>,
  update_rx: mpsc::Receiver<IndexUpdate>,
  request_rx: mpsc::Receiver<UserRequest>,
  states: Arc<watch::Sender<IndexStateUpdate>>,
  cancel: CancellationToken,
}

impl IndexActor {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    mode: SearchMode,
    tokens: Arc<Interner>,
    status_rx: mpsc::UnboundedReceiver<StatusUpdate>,
    update_rx: mpsc::Receiver<IndexUpdate>,
    request_rx: mpsc::Receiver<UserRequest>,
    states: Arc<watch::Sender<IndexStateUpdate>>,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      mode,
      state: IndexState::new(),
      counters: Counters::new(),
      tokens,
      removals_since_prune: 0,
      status_rx,
      update_rx,
      request_rx,
      states,
      cancel,
    }
  }

  pub async fn run(mut self) -> Result<(), EngineError> {
    info!(mode = %self.mode, "index actor started");

    loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => {
          info!("index actor shutting down (cancelled)");
          return Ok(());
        }

        Some(status) = self.status_rx.recv() => self.handle_status(status),

        Some(update) = self.update_rx.recv() => self.handle_update(update),

        Some(request) = self.request_rx.recv() => self.handle_request(request)?,

        else => {
          info!("index actor shutting down (all inputs closed)");
          return Ok(());
        }
      }
    }
  }

  // ==========================================================================
  // Status handling
  // ==========================================================================

  fn handle_status(&mut self, status: StatusUpdate) {
    match status {
      StatusUpdate::WatcherStarted => {
        self.counters.watcher_started_at = Some(Instant::now());
        self.publish(IndexStateUpdate::WatcherStarted { at: SystemTime::now() });
      }
      StatusUpdate::AllFilesDiscovered => {
        self.counters.all_files_discovered_at = Some(Instant::now());
        self.publish(IndexStateUpdate::AllFilesDiscovered { at: SystemTime::now() });
        self.maybe_complete_sync();
      }
      StatusUpdate::FileUpdated => {
        self.counters.total_modifications += 1;
        self.maybe_complete_sync();
      }
      StatusUpdate::WatcherDiscoveredFileDuringInitialization => {
        self.counters.discovered_during_init += 1;
      }
    }
  }

  /// `sync_completed_at` may only stamp once everything enumerated by the
  /// initial walk has been applied, and never before the walk finished: the
  /// counters can coincide early while events are still being produced.
  fn maybe_complete_sync(&mut self) {
    if self.counters.all_files_discovered_at.is_some()
      && self.counters.sync_completed_at.is_none()
      && self.counters.handled_modifications == self.counters.total_modifications
    {
      self.counters.sync_completed_at = Some(Instant::now());
      debug!(
        handled = self.counters.handled_modifications,
        "initial file sync completed"
      );
      self.publish(IndexStateUpdate::InitialFileSyncCompleted { at: SystemTime::now() });
    }
  }

  // ==========================================================================
  // Update handling
  // ==========================================================================

  fn handle_update(&mut self, update: IndexUpdate) {
    let is_removal = matches!(update, IndexUpdate::RemoveFile { .. });
    let applied = self.state.apply(update);
    if !applied {
      trace!("discarded out-of-order index update");
    }

    if is_removal {
      self.removals_since_prune += 1;
      if self.removals_since_prune >= PRUNE_EVERY {
        self.removals_since_prune = 0;
        let reclaimed = self.tokens.prune();
        trace!(reclaimed, "pruned token interner");
      }
    }

    // Discarded updates still count as handled: every file-sync event yields
    // exactly one update, so handled converges to total.
    self.counters.handled_modifications += 1;
    self.maybe_complete_sync();
  }

  // ==========================================================================
  // Request handling
  // ==========================================================================

  fn handle_request(&mut self, request: UserRequest) -> Result<(), EngineError> {
    match request {
      UserRequest::Status { reply } => {
        let _ = reply.send(self.status_result());
        Ok(())
      }
      UserRequest::Find { query, candidates } => {
        self.handle_find(query, candidates);
        Ok(())
      }
      UserRequest::InjectFailure { reason } => Err(EngineError::Induced(reason)),
    }
  }

  fn status_result(&self) -> StatusResult {
    let c = &self.counters;
    // Until the walk finishes the event totals are still growing; the
    // pre-init watcher hits give a better lower bound for progress display.
    let total = if c.all_files_discovered_at.is_none() {
      c.total_modifications.max(c.discovered_during_init)
    } else {
      c.total_modifications
    };

    StatusResult {
      indexed_files: self.state.indexed_files(),
      known_tokens: self.state.known_tokens(),
      watcher_start_time: c.watcher_started_at.map(|at| at.duration_since(c.start_time)),
      initial_sync_time: c.sync_completed_at.map(|at| at.duration_since(c.start_time)),
      handled_modifications: c.handled_modifications,
      total_modifications: total,
      is_broken: false,
    }
  }

  fn handle_find(&mut self, query: String, candidates: mpsc::Sender<FileAddress>) {
    let selected = query::select_candidates(&self.state, self.mode, &query, &|| !candidates.is_closed());
    trace!(query = %query, candidates = selected.len(), "query selected candidates");

    // Stream from a detached task; the rendezvous channel suspends it until
    // the consumer pulls, and a dropped receiver ends it early.
    tokio::spawn(stream_candidates(selected, candidates));
  }

  fn publish(&self, update: IndexStateUpdate) {
    self.states.send_replace(update);
  }
}

async fn stream_candidates(selected: Vec<FileAddress>, tx: mpsc::Sender<FileAddress>) {
  for address in selected {
    if tx.send(address).await.is_err() {
      trace!("find consumer gone, candidate stream stopped");
      return;
    }
  }
}
