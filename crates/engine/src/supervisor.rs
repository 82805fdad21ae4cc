//! Supervisor: runs generations of the watcher + indexer pool + index actor
//! trio and resurrects them on failure.
//!
//! One generation is a child cancellation scope with its own logical clock,
//! interners, queues, and state; nothing survives into the next generation.
//! The restart loop is:
//!
//! ```text
//! start generation → await child failure → publish IndexFailed
//!   → cancel siblings → await full teardown → publish Restarting → loop
//! ```
//!
//! Cancellation from above is propagated without restart: the loop publishes
//! `Terminated` and exits.
//!
//! Observers subscribe to a replay-1, drop-oldest broadcast of
//! [`IndexStateUpdate`] (a `watch` channel). The current generation's
//! request channel is published the same way, so the search front-end always
//! addresses the live generation or sees `None` between generations.

use std::{sync::Arc, time::SystemTime};

use tokio::{
  sync::{Mutex, mpsc, watch},
  task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
  actor::IndexActor,
  clock::LogicalClock,
  config::EngineConfig,
  error::EngineError,
  indexer::{SharedEvents, indexer_worker},
  intern::Interner,
  message::{IndexStateUpdate, IndexUpdate, UserRequest},
  watcher::SyncTask,
};

/// Capacity of the request queue between the search engine and the actor.
const REQUEST_QUEUE: usize = 16;

/// Pause between tearing a failed generation down and starting the next
/// one. Keeps a persistently failing root (deleted directory, broken mount)
/// from turning the restart loop into a busy spin.
const RESTART_DELAY: std::time::Duration = std::time::Duration::from_millis(250);

/// Why a generation ended.
enum GenerationEnd {
  Cancelled,
  Failed(String),
}

/// Handle to a running resurrecting index.
///
/// Cloneable; all clones address the same supervisor.
#[derive(Clone)]
pub struct ResurrectingIndex {
  requests: watch::Receiver<Option<mpsc::Sender<UserRequest>>>,
  states: watch::Receiver<IndexStateUpdate>,
  cancel: CancellationToken,
}

impl ResurrectingIndex {
  /// Launch the supervisor and its first generation.
  pub fn start(mut config: EngineConfig) -> Self {
    // Addresses are stored in the OS's canonical absolute form, so the walk
    // and the notification stream agree on every path. A root that cannot
    // be canonicalized is left alone; the sync stage will fail it properly.
    if let Ok(canonical) = config.root.canonicalize() {
      config.root = canonical;
    }

    let cancel = CancellationToken::new();
    let (request_tx, requests) = watch::channel(None);
    let (state_tx, states) = watch::channel(IndexStateUpdate::Initial);

    let supervisor = Supervisor {
      config: Arc::new(config),
      requests: request_tx,
      states: Arc::new(state_tx),
      cancel: cancel.clone(),
    };
    tokio::spawn(supervisor.run());

    Self {
      requests,
      states,
      cancel,
    }
  }

  /// Sender for the live generation, or `None` between generations.
  pub fn request_sender(&self) -> Option<mpsc::Sender<UserRequest>> {
    self.requests.borrow().clone()
  }

  /// Subscribe to aggregate state transitions. Replay-1: a new subscriber
  /// immediately observes the latest value.
  pub fn state_updates(&self) -> watch::Receiver<IndexStateUpdate> {
    self.states.clone()
  }

  /// Request shutdown and wait until the supervisor has published
  /// `Terminated`.
  pub async fn shutdown(&self) {
    self.cancel.cancel();
    let mut states = self.states.clone();
    while !states.borrow_and_update().is_terminal() {
      if states.changed().await.is_err() {
        return;
      }
    }
  }
}

struct Supervisor {
  config: Arc<EngineConfig>,
  requests: watch::Sender<Option<mpsc::Sender<UserRequest>>>,
  states: Arc<watch::Sender<IndexStateUpdate>>,
  cancel: CancellationToken,
}

impl Supervisor {
  async fn run(self) {
    let mut last_failure: Option<String> = None;

    loop {
      if self.cancel.is_cancelled() {
        break;
      }

      self.publish(IndexStateUpdate::Initializing { at: SystemTime::now() });
      let end = self.run_generation().await;

      // Between generations queries must observe the broken state.
      self.requests.send_replace(None);

      match end {
        GenerationEnd::Cancelled => break,
        GenerationEnd::Failed(reason) => {
          warn!(%reason, "index generation failed, restarting");
          last_failure = Some(reason);
          self.publish(IndexStateUpdate::Restarting);
          tokio::select! {
            _ = self.cancel.cancelled() => break,
            _ = tokio::time::sleep(RESTART_DELAY) => {}
          }
        }
      }
    }

    let reason = last_failure.unwrap_or_else(|| "shutdown requested".to_string());
    info!(%reason, "supervisor terminated");
    self.publish(IndexStateUpdate::Terminated { reason });
  }

  /// Launch one generation and wait for its first failure or for outer
  /// cancellation. Returns after every child has torn down.
  async fn run_generation(&self) -> GenerationEnd {
    let generation_cancel = self.cancel.child_token();

    // Per-generation state: clock, interners, queues.
    let clock = Arc::new(LogicalClock::new());
    let addresses = Arc::new(Interner::new());
    let tokens = Arc::new(Interner::new());

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = mpsc::unbounded_channel();
    // Capacity 1: slow index application throttles the readers.
    let (update_tx, update_rx) = mpsc::channel::<IndexUpdate>(1);
    let (request_tx, request_rx) = mpsc::channel::<UserRequest>(REQUEST_QUEUE);

    let mut children: JoinSet<Result<(), EngineError>> = JoinSet::new();

    let sync = SyncTask::new(
      self.config.clone(),
      clock,
      addresses,
      event_tx,
      status_tx,
      generation_cancel.clone(),
    );
    children.spawn(sync.run());

    let shared_events: SharedEvents = Arc::new(Mutex::new(event_rx));
    for worker_id in 0..self.config.indexer_workers.max(1) {
      children.spawn(indexer_worker(
        worker_id,
        self.config.clone(),
        tokens.clone(),
        shared_events.clone(),
        update_tx.clone(),
        generation_cancel.clone(),
      ));
    }
    drop(update_tx);

    let actor = IndexActor::new(
      self.config.mode,
      tokens,
      status_rx,
      update_rx,
      request_rx,
      self.states.clone(),
      generation_cancel.clone(),
    );
    children.spawn(actor.run());

    // The generation is live; route requests to it.
    self.requests.send_replace(Some(request_tx));

    let end = loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => break GenerationEnd::Cancelled,

        joined = children.join_next() => match joined {
          // Clean exits (a worker observing a closed queue) are not
          // failures; keep waiting on the rest.
          Some(Ok(Ok(()))) => continue,
          Some(Ok(Err(err))) => {
            error!(error = %err, "generation stage failed");
            self.publish(IndexStateUpdate::IndexFailed { reason: err.to_string() });
            break GenerationEnd::Failed(err.to_string());
          }
          Some(Err(join_err)) => {
            let reason = format!("stage panicked: {join_err}");
            error!(%reason, "generation stage crashed");
            self.publish(IndexStateUpdate::IndexFailed { reason: reason.clone() });
            break GenerationEnd::Failed(reason);
          }
          None => {
            // Every child exited cleanly; without a watcher stream there is
            // nothing left to do but wait for cancellation.
            self.cancel.cancelled().await;
            break GenerationEnd::Cancelled;
          }
        }
      }
    };

    // Full teardown before the caller may start a fresh generation.
    generation_cancel.cancel();
    while children.join_next().await.is_some() {}

    end
  }

  fn publish(&self, update: IndexStateUpdate) {
    self.states.send_replace(update);
  }
}
