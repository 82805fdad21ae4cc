//! Search front-end: the stable query interface over the resurrecting index.
//!
//! A find runs in two phases. The first asks the index actor for candidate
//! files, which is fast but approximate: trigram intersection can admit
//! files whose windows exist on different lines, and word mode deliberately
//! admits prefix/suffix near-matches. The second phase re-reads every
//! candidate from disk and yields only lines the match predicate accepts, so
//! index false positives never surface to the caller.
//!
//! Both the candidate and the result channel have capacity 1. Dropping a
//! [`FindStream`] tears the whole chain down: the verify task fails its next
//! send and exits, its candidate receiver closes, and the actor-side
//! producer observes that and stops.

use serde::Serialize;
use tokio::{
  io::{AsyncBufReadExt, BufReader},
  sync::{mpsc, oneshot},
};
use tracing::{debug, trace};

use crate::{
  config::{EngineConfig, SearchMode},
  intern::FileAddress,
  message::{IndexStateUpdate, StatusResult, UserRequest},
  supervisor::ResurrectingIndex,
};

/// One verified match: a file, a 1-based line number, and the line itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
  pub path: String,
  pub line_no: usize,
  pub line: String,
}

/// The query interface. Cheap to clone; all clones talk to the same index.
#[derive(Clone)]
pub struct SearchEngine {
  index: ResurrectingIndex,
  mode: SearchMode,
}

impl SearchEngine {
  /// Start the index (supervisor, first generation) and wrap it.
  pub fn start(config: EngineConfig) -> Self {
    let mode = config.mode;
    Self {
      index: ResurrectingIndex::start(config),
      mode,
    }
  }

  /// Counter snapshot from the live generation, or the fixed broken status
  /// between generations.
  pub async fn index_status(&self) -> StatusResult {
    let Some(requests) = self.index.request_sender() else {
      return StatusResult::broken();
    };
    let (reply, rx) = oneshot::channel();
    if requests.send(UserRequest::Status { reply }).await.is_err() {
      return StatusResult::broken();
    }
    rx.await.unwrap_or_else(|_| StatusResult::broken())
  }

  /// Stream verified matches for `query`.
  ///
  /// The returned stream closes immediately (after zero results) when no
  /// generation is alive; `is_incomplete` reports that case along with every
  /// other reason the results may miss files.
  pub async fn find(&self, query: &str) -> FindStream {
    let initial = self.index_status().await;

    let (candidate_tx, candidate_rx) = mpsc::channel::<FileAddress>(1);
    let (result_tx, result_rx) = mpsc::channel::<SearchResult>(1);

    let requested = match self.index.request_sender() {
      Some(requests) => requests
        .send(UserRequest::Find {
          query: query.to_string(),
          candidates: candidate_tx,
        })
        .await
        .is_ok(),
      None => false,
    };

    if requested {
      tokio::spawn(verify_candidates(self.mode, query.to_string(), candidate_rx, result_tx));
    } else {
      // Request lost (no generation, or torn down mid-send): the dropped
      // result sender closes the stream right away.
      debug!(query, "find request lost, returning empty stream");
    }

    FindStream {
      initial,
      results: result_rx,
    }
  }

  /// Did the directory change while `stream` was being consumed? Only
  /// meaningful when the stream started from a fully synced index; callers
  /// surface it as a "directory changed during search" warning.
  pub async fn changed_since(&self, stream: &FindStream) -> bool {
    if stream.is_incomplete() {
      return false;
    }
    let current = self.index_status().await;
    current.is_broken || current.total_modifications != stream.initial.total_modifications
  }

  /// Fail the current generation on purpose, exercising the restart path.
  pub async fn inject_failure(&self, reason: impl Into<String>) {
    if let Some(requests) = self.index.request_sender() {
      let _ = requests.send(UserRequest::InjectFailure { reason: reason.into() }).await;
    }
  }

  /// Subscribe to aggregate index state transitions.
  pub fn state_updates(&self) -> tokio::sync::watch::Receiver<IndexStateUpdate> {
    self.index.state_updates()
  }

  /// Cancel everything and wait for the supervisor to terminate.
  pub async fn shutdown(&self) {
    self.index.shutdown().await;
  }
}

/// A stream of verified search results plus the status snapshot captured
/// before candidate generation began.
pub struct FindStream {
  initial: StatusResult,
  results: mpsc::Receiver<SearchResult>,
}

impl FindStream {
  /// Next verified match; `None` when the search is exhausted or cancelled.
  pub async fn recv(&mut self) -> Option<SearchResult> {
    self.results.recv().await
  }

  /// True when results may miss files: the initial sync has not completed,
  /// events are still being applied, or the index is between generations.
  pub fn is_incomplete(&self) -> bool {
    !self.initial.is_in_sync()
  }

  pub fn initial_status(&self) -> &StatusResult {
    &self.initial
  }
}

/// Second phase: re-read each candidate and yield matching lines.
async fn verify_candidates(
  mode: SearchMode,
  query: String,
  mut candidates: mpsc::Receiver<FileAddress>,
  results: mpsc::Sender<SearchResult>,
) {
  while let Some(address) = candidates.recv().await {
    let file = match tokio::fs::File::open(address.path()).await {
      Ok(file) => file,
      Err(err) => {
        // Candidate vanished or became unreadable between indexing and
        // verification; it simply produces no results.
        debug!(path = %address, error = %err, "skipping unverifiable candidate");
        continue;
      }
    };

    let mut lines = BufReader::new(file).lines();
    let mut line_no = 0usize;
    loop {
      match lines.next_line().await {
        Ok(Some(line)) => {
          line_no += 1;
          if mode.line_matches(&line, &query) {
            let result = SearchResult {
              path: address.as_str().to_string(),
              line_no,
              line,
            };
            if results.send(result).await.is_err() {
              trace!("find consumer gone, verification stopped");
              return;
            }
          }
        }
        Ok(None) => break,
        Err(err) => {
          debug!(path = %address, error = %err, "stopped verifying file mid-read");
          break;
        }
      }
    }
  }
}
