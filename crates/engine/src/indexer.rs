//! Indexer pool: parallel workers that turn file-sync events into index
//! updates.
//!
//! File reads dominate latency on cold caches, so a fixed pool of workers
//! drains the event queue concurrently while the index actor stays
//! single-threaded. The workers share one receiver behind a mutex; each
//! worker pulls the next event, does the I/O, and forwards the result
//! through a capacity-1 channel so slow index application throttles reads.
//!
//! Failure policy: any I/O error on a single event (file vanished,
//! permission denied, content not valid UTF-8) drops that event silently.

use std::{collections::HashSet, sync::Arc};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
  config::EngineConfig,
  error::EngineError,
  intern::{Interner, Token},
  message::{FileSyncEvent, IndexUpdate, SyncKind},
};

/// Shared input side of the worker pool.
pub type SharedEvents = Arc<Mutex<mpsc::UnboundedReceiver<FileSyncEvent>>>;

/// One indexer worker. Runs until cancelled or until the event queue closes.
pub async fn indexer_worker(
  worker_id: usize,
  config: Arc<EngineConfig>,
  tokens: Arc<Interner>,
  events: SharedEvents,
  updates: mpsc::Sender<IndexUpdate>,
  cancel: CancellationToken,
) -> Result<(), EngineError> {
  trace!(worker_id, "indexer worker starting");
  let mut processed: u64 = 0;

  loop {
    let event = {
      let mut rx = events.lock().await;
      tokio::select! {
        biased;
        _ = cancel.cancelled() => {
          trace!(worker_id, processed, "indexer worker cancelled");
          return Ok(());
        }
        event = rx.recv() => event,
      }
    };

    let Some(event) = event else {
      trace!(worker_id, processed, "indexer worker: event queue closed");
      return Ok(());
    };

    if let Some(update) = index_event(&config, &tokens, event).await {
      tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(()),
        sent = updates.send(update) => {
          if sent.is_err() {
            trace!(worker_id, "indexer worker: index actor gone");
            return Ok(());
          }
        }
      }
      processed += 1;
    }
  }
}

/// Turn one file-sync event into an index update, or nothing if the event is
/// dropped (oversized file or transient I/O failure).
async fn index_event(config: &EngineConfig, tokens: &Interner, event: FileSyncEvent) -> Option<IndexUpdate> {
  let FileSyncEvent { t, address, kind, .. } = event;

  match kind {
    SyncKind::Delete => Some(IndexUpdate::RemoveFile { t, address }),
    SyncKind::Create | SyncKind::Modify => {
      let path = address.path();

      let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(err) => {
          debug!(path = %address, error = %err, "skipping event, file not readable");
          return None;
        }
      };
      if !metadata.is_file() {
        trace!(path = %address, "skipping event, not a regular file");
        return None;
      }
      if metadata.len() > config.max_file_size {
        debug!(path = %address, size = metadata.len(), "skipping oversized file");
        return None;
      }

      let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) => {
          debug!(path = %address, error = %err, "skipping event, content unreadable");
          return None;
        }
      };

      let set: HashSet<Token> = content
        .lines()
        .flat_map(|line| config.mode.tokenize_line(line))
        .map(|fragment| Token::intern(tokens, &fragment))
        .collect();

      trace!(path = %address, tokens = set.len(), t, "file tokenized");
      Some(IndexUpdate::UpdateFileContent { t, address, tokens: set })
    }
  }
}
