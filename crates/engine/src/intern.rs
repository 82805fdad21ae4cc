//! String interning for file addresses and tokens.
//!
//! Both sides of the inverted index repeat the same strings many times: a
//! token appears in the reverse map key and in every forward entry that
//! contains it, and a file address appears in the forward key and in every
//! reverse bucket. Interning caps that to one allocation per distinct string.
//!
//! # Reclamation
//!
//! Entries are reference counted. An entry whose strong count has dropped to
//! one is held only by the interner itself and is reclaimed by [`Interner::prune`],
//! which the index actor calls lazily while handling file removals.

use std::{
  collections::HashSet,
  fmt,
  path::Path,
  sync::{Arc, Mutex, PoisonError},
};

/// A deduplicating pool of immutable strings.
///
/// Written concurrently by the sync stage and the indexer workers; the lock
/// guards a single hash lookup per intern call.
#[derive(Debug, Default)]
pub struct Interner {
  entries: Mutex<HashSet<Arc<str>>>,
}

impl Interner {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns the canonical `Arc` for `value`, inserting it on first sight.
  pub fn intern(&self, value: &str) -> Arc<str> {
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = entries.get(value) {
      existing.clone()
    } else {
      let entry: Arc<str> = Arc::from(value);
      entries.insert(entry.clone());
      entry
    }
  }

  /// Drops entries no longer referenced outside the interner. Returns the
  /// number of reclaimed strings.
  pub fn prune(&self) -> usize {
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    let before = entries.len();
    entries.retain(|entry| Arc::strong_count(entry) > 1);
    before - entries.len()
  }

  pub fn len(&self) -> usize {
    self
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Interned canonical absolute path of a file.
///
/// Two events referring to the same file share one allocation, so equality
/// checks are usually a pointer comparison away.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FileAddress(Arc<str>);

impl FileAddress {
  pub fn intern(interner: &Interner, path: &Path) -> Self {
    Self(interner.intern(&path.to_string_lossy()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn path(&self) -> &Path {
    Path::new(self.as_str())
  }

  /// True when both addresses came from the same interner entry.
  pub fn same_instance(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }
}

impl std::borrow::Borrow<str> for FileAddress {
  fn borrow(&self) -> &str {
    self.as_str()
  }
}

impl fmt::Debug for FileAddress {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "FileAddress({})", self.0)
  }
}

impl fmt::Display for FileAddress {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Interned lowercased content fragment: a word or a trigram window.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Token(Arc<str>);

impl Token {
  pub fn intern(interner: &Interner, text: &str) -> Self {
    Self(interner.intern(text))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::borrow::Borrow<str> for Token {
  fn borrow(&self) -> &str {
    self.as_str()
  }
}

impl fmt::Debug for Token {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Token({})", self.0)
  }
}
