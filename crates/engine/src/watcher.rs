//! Sync stage: bootstraps the index with one tree walk, then feeds live
//! filesystem notifications into the pipeline.
//!
//! # Ordering contract
//!
//! 1. Subscribe to filesystem notifications; arriving notifications are
//!    buffered until step 3 completes.
//! 2. Emit the `WatcherStarted` status.
//! 3. Walk the tree once, emitting one `Create` event per regular file with
//!    `source = InitialSync`.
//! 4. Emit the `AllFilesDiscovered` status.
//! 5. Release buffered notifications and every subsequent one as events with
//!    `source = Watcher`.
//!
//! Walking before subscribing would lose modifications made during the walk
//! window; releasing notifications during the walk would let an indexer apply
//! a stale `Create` over a newer `Modify`.
//!
//! # Buffering
//!
//! The notify callback forwards into an unbounded channel which this task
//! does not drain until the walk completes; the channel itself is the
//! buffer. While the walk runs, the callback also reports each file
//! notification as a `WatcherDiscoveredFileDuringInitialization` status so
//! the actor can estimate progress before the totals stabilize.
//!
//! # Lifecycle
//!
//! Runs until cancelled or until a fatal error: notification overflow, a
//! failed notification stream, or an initial walk that exhausts its retries.
//! All of those fail the generation and the supervisor starts a fresh one.

use std::{
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use ignore::WalkBuilder;
use notify::{
  Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
  event::{ModifyKind, RenameMode},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
  clock::LogicalClock,
  config::EngineConfig,
  error::{EngineError, SyncError},
  intern::{FileAddress, Interner},
  message::{FileSyncEvent, StatusUpdate, SyncKind, SyncSource},
};

/// The sync stage of one generation.
pub struct SyncTask {
  config: Arc<EngineConfig>,
  clock: Arc<LogicalClock>,
  addresses: Arc<Interner>,
  events: mpsc::UnboundedSender<FileSyncEvent>,
  status: mpsc::UnboundedSender<StatusUpdate>,
  cancel: CancellationToken,
}

impl SyncTask {
  pub fn new(
    config: Arc<EngineConfig>,
    clock: Arc<LogicalClock>,
    addresses: Arc<Interner>,
    events: mpsc::UnboundedSender<FileSyncEvent>,
    status: mpsc::UnboundedSender<StatusUpdate>,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      config,
      clock,
      addresses,
      events,
      status,
      cancel,
    }
  }

  pub async fn run(self) -> Result<(), EngineError> {
    if self.config.enable_watcher {
      self.run_watching().await
    } else {
      self.run_snapshot().await
    }
  }

  /// Snapshot mode: one walk, then park until cancelled.
  async fn run_snapshot(self) -> Result<(), EngineError> {
    info!(root = %self.config.root.display(), "sync stage started (snapshot mode)");
    self.initial_walk().await?;
    let _ = self.status.send(StatusUpdate::AllFilesDiscovered);
    self.cancel.cancelled().await;
    Ok(())
  }

  async fn run_watching(self) -> Result<(), EngineError> {
    info!(root = %self.config.root.display(), "sync stage started");

    // Subscribe before walking. The callback runs on notify's thread; the
    // unbounded send never blocks it.
    let (raw_tx, raw_rx) = mpsc::unbounded_channel::<Result<Event, notify::Error>>();
    let walking = Arc::new(AtomicBool::new(true));

    let callback_status = self.status.clone();
    let callback_walking = walking.clone();
    let mut watcher = RecommendedWatcher::new(
      move |result: Result<Event, notify::Error>| {
        if callback_walking.load(Ordering::Acquire)
          && matches!(&result, Ok(event) if is_file_change(event))
        {
          let _ = callback_status.send(StatusUpdate::WatcherDiscoveredFileDuringInitialization);
        }
        let _ = raw_tx.send(result);
      },
      notify::Config::default(),
    )
    .map_err(SyncError::Init)?;

    watcher
      .watch(&self.config.root, RecursiveMode::Recursive)
      .map_err(SyncError::Watch)?;

    let _ = self.status.send(StatusUpdate::WatcherStarted);

    self.initial_walk().await?;
    let _ = self.status.send(StatusUpdate::AllFilesDiscovered);
    walking.store(false, Ordering::Release);

    // `watcher` must stay alive while notifications are drained.
    let result = self.drain_notifications(raw_rx).await;
    drop(watcher);
    result
  }

  /// Walk the tree once, emitting `Create` events. Retries with linear
  /// backoff; a missing root is fatal immediately.
  async fn initial_walk(&self) -> Result<(), EngineError> {
    let mut attempt: u32 = 0;
    let files = loop {
      attempt += 1;
      if attempt > 1 {
        tokio::time::sleep(self.config.walk_retry_backoff * (attempt - 1)).await;
      }

      if let Err(io) = std::fs::metadata(&self.config.root) {
        let err = SyncError::RootNotFound {
          path: self.config.root.clone(),
          source: io,
        };
        return Err(self.report_sync_error(err));
      }

      match self.walk_once().await {
        Ok(files) => break files,
        Err(err) if attempt >= self.config.walk_retries => {
          let err = match err {
            SyncError::Walk { source, .. } => SyncError::Walk { attempts: attempt, source },
            other => other,
          };
          return Err(self.report_sync_error(err));
        }
        Err(err) => {
          warn!(attempt, error = %err, "initial walk attempt failed, retrying");
        }
      }
    };

    debug!(files = files.len(), attempt, "initial walk complete");
    for path in files {
      if self.cancel.is_cancelled() {
        return Ok(());
      }
      self.emit(&path, SyncSource::InitialSync, SyncKind::Create);
    }
    Ok(())
  }

  /// One enumeration attempt, off the async runtime.
  async fn walk_once(&self) -> Result<Vec<PathBuf>, SyncError> {
    let root = self.config.root.clone();
    let walked = tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>, ignore::Error> {
      let mut files = Vec::new();
      // Standard filters off: every regular file is indexed, hidden or not.
      let walker = WalkBuilder::new(&root)
        .standard_filters(false)
        .follow_links(false)
        .build();
      for entry in walker {
        let entry = entry?;
        if entry.file_type().is_some_and(|ft| ft.is_file()) {
          files.push(entry.into_path());
        }
      }
      Ok(files)
    })
    .await
    .map_err(|join| SyncError::WalkTask(join.to_string()))?;

    walked.map_err(|source| SyncError::Walk { attempts: 1, source })
  }

  /// Release buffered notifications, then follow the live stream.
  async fn drain_notifications(
    &self,
    mut raw_rx: mpsc::UnboundedReceiver<Result<Event, notify::Error>>,
  ) -> Result<(), EngineError> {
    loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => {
          info!("sync stage shutting down (cancelled)");
          return Ok(());
        }

        received = raw_rx.recv() => match received {
          Some(Ok(event)) => self.handle_notification(event)?,
          Some(Err(err)) => {
            let err = self.report_sync_error(SyncError::Stream(err));
            return Err(err);
          }
          None => {
            info!("sync stage shutting down (notification channel closed)");
            return Ok(());
          }
        }
      }
    }
  }

  fn handle_notification(&self, event: Event) -> Result<(), EngineError> {
    if event.need_rescan() {
      // Events were dropped by the backend; a fresh walk is the only way
      // back to a trustworthy index.
      return Err(self.report_sync_error(SyncError::Overflow));
    }

    match event.kind {
      // Renames arrive as Modify(Name(..)); map them onto create/delete.
      EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
        self.emit_change(&event.paths[0], SyncKind::Delete);
        self.emit_change(&event.paths[1], SyncKind::Create);
      }
      EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
        for path in &event.paths {
          self.emit_change(path, SyncKind::Delete);
        }
      }
      EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
        for path in &event.paths {
          self.emit_change(path, SyncKind::Create);
        }
      }
      EventKind::Create(_) => {
        for path in &event.paths {
          self.emit_change(path, SyncKind::Create);
        }
      }
      EventKind::Modify(_) => {
        for path in &event.paths {
          self.emit_change(path, SyncKind::Modify);
        }
      }
      EventKind::Remove(_) => {
        for path in &event.paths {
          // Losing the root itself ends the generation.
          if path == &self.config.root {
            let err = SyncError::RootNotFound {
              path: self.config.root.clone(),
              source: std::io::Error::new(std::io::ErrorKind::NotFound, "watch root removed"),
            };
            return Err(self.report_sync_error(err));
          }
          self.emit_change(path, SyncKind::Delete);
        }
      }
      EventKind::Access(_) | EventKind::Any | EventKind::Other => {
        trace!(kind = ?event.kind, "ignoring notification");
      }
    }
    Ok(())
  }

  fn emit_change(&self, path: &std::path::Path, kind: SyncKind) {
    // Creates and modifies must refer to an existing regular file; deletes
    // cannot be checked and are forwarded as-is.
    if kind != SyncKind::Delete && !path.is_file() {
      trace!(path = %path.display(), "skipping non-file notification");
      return;
    }
    self.emit(path, SyncSource::Watcher, kind);
  }

  fn emit(&self, path: &std::path::Path, source: SyncSource, kind: SyncKind) {
    let event = FileSyncEvent {
      t: self.clock.next(),
      address: FileAddress::intern(&self.addresses, path),
      source,
      kind,
    };
    trace!(t = event.t, path = %event.address, ?source, ?kind, "file sync event");
    if self.events.send(event).is_err() {
      // Generation is tearing down; nothing left to notify.
      return;
    }
    let _ = self.status.send(StatusUpdate::FileUpdated);
  }

  fn report_sync_error(&self, err: SyncError) -> EngineError {
    let err = EngineError::Sync(err);
    let hook = match &err {
      EngineError::Sync(SyncError::Walk { .. } | SyncError::RootNotFound { .. } | SyncError::WalkTask(_)) => {
        &self.config.on_initial_sync_error
      }
      _ => &self.config.on_watcher_error,
    };
    if let Some(hook) = hook {
      hook(&err);
    }
    err
  }
}

/// Does this notification describe a content change worth counting while the
/// initial walk is still running?
fn is_file_change(event: &Event) -> bool {
  matches!(
    event.kind,
    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
  )
}
