//! Live, in-memory full-text search over a directory tree.
//!
//! The engine walks a root directory once, subscribes to filesystem
//! notifications, and keeps a forward/reverse inverted index continuously in
//! sync with the tree. Queries return matching files with line numbers and
//! matched text. Nothing is persisted; the index is rebuilt on every start.
//!
//! # Architecture
//!
//! Five components composed as a staged pipeline, communicating only by
//! message (no shared mutable state, no locks on the hot path):
//!
//! ```text
//! Watcher/Sync ──events──▶ Indexer pool ──updates──▶ Index actor
//!       │                                                │
//!       └────────────── status updates ─────────────────┘
//! Search engine ──requests──▶ Index actor ──candidates──▶ verification
//! ```
//!
//! - [`watcher::SyncTask`] walks the tree and serializes live notifications
//!   behind the initial enumeration, stamping every event from a logical
//!   clock.
//! - The indexer pool reads and tokenizes changed files in parallel.
//! - The index actor exclusively owns the inverted index and the sync
//!   counters, serializing all mutations and queries.
//! - The supervisor restarts the whole trio on failure
//!   ([`supervisor::ResurrectingIndex`]).
//! - [`search::SearchEngine`] answers queries in two phases: approximate
//!   in-memory candidates, then on-disk line verification.
//!
//! # Modes
//!
//! [`SearchMode::Word`] indexes runs of alphanumeric characters;
//! [`SearchMode::Trigram`] indexes 3-character windows. Both are selected at
//! startup and shape indexing as well as query-time filtering.

pub mod clock;
pub mod config;
pub mod error;
pub mod intern;
pub mod message;
pub mod search;
pub mod supervisor;
pub mod tokenize;
pub mod watcher;

mod actor;
mod indexer;

pub use config::{EngineConfig, SearchMode};
pub use error::{EngineError, SyncError};
pub use intern::{FileAddress, Interner, Token};
pub use message::{IndexStateUpdate, StatusResult};
pub use search::{FindStream, SearchEngine, SearchResult};
pub use supervisor::ResurrectingIndex;
