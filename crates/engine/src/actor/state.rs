//! Forward/reverse index state, exclusively owned by the index actor.
//!
//! Invariants, maintained by every mutation:
//! - `forward` and `reverse` are mutual inverses: `t ∈ forward[fa]` iff
//!   `fa ∈ reverse[t]`.
//! - `file_update_times[fa]` holds the logical time of the last applied
//!   mutation for `fa`. The entry survives removal of the file so a late
//!   out-of-order update for a deleted file is still discarded.
//! - Reverse buckets are pruned when they empty.
//!
//! The per-file time check is the ordering mechanism between parallel
//! indexer workers: a worker that finished late with an older snapshot loses
//! to whatever is already applied.

use std::collections::{HashMap, HashSet};

use crate::{
  intern::{FileAddress, Token},
  message::IndexUpdate,
};

#[derive(Debug, Default)]
pub struct IndexState {
  forward: HashMap<FileAddress, HashSet<Token>>,
  reverse: HashMap<Token, HashSet<FileAddress>>,
  file_update_times: HashMap<FileAddress, u64>,
}

impl IndexState {
  pub fn new() -> Self {
    Self::default()
  }

  /// Apply one update. Returns false when the update is older than the last
  /// applied mutation for its file and was discarded.
  pub fn apply(&mut self, update: IndexUpdate) -> bool {
    match update {
      IndexUpdate::UpdateFileContent { t, address, tokens } => self.update_file(t, address, tokens),
      IndexUpdate::RemoveFile { t, address } => self.remove_file(t, address),
    }
  }

  fn update_file(&mut self, t: u64, address: FileAddress, tokens: HashSet<Token>) -> bool {
    if !self.check_update_time(&address, t) {
      return false;
    }
    self.unlink_tokens(&address);
    for token in &tokens {
      self.reverse.entry(token.clone()).or_default().insert(address.clone());
    }
    self.forward.insert(address, tokens);
    true
  }

  fn remove_file(&mut self, t: u64, address: FileAddress) -> bool {
    if !self.check_update_time(&address, t) {
      return false;
    }
    self.unlink_tokens(&address);
    self.forward.remove(&address);
    true
  }

  /// The `checkUpdateTime` rule: reject anything at or before the last
  /// applied logical time, otherwise record the new time.
  fn check_update_time(&mut self, address: &FileAddress, t: u64) -> bool {
    let last = self.file_update_times.get(address).copied().unwrap_or(0);
    if t <= last {
      return false;
    }
    self.file_update_times.insert(address.clone(), t);
    true
  }

  /// Remove `address` from every reverse bucket it currently occupies,
  /// pruning buckets that empty.
  fn unlink_tokens(&mut self, address: &FileAddress) {
    let Some(old_tokens) = self.forward.get(address) else {
      return;
    };
    for token in old_tokens {
      if let Some(bucket) = self.reverse.get_mut(token) {
        bucket.remove(address);
        if bucket.is_empty() {
          self.reverse.remove(token);
        }
      }
    }
  }

  pub fn indexed_files(&self) -> usize {
    self.forward.len()
  }

  pub fn known_tokens(&self) -> usize {
    self.reverse.len()
  }

  pub(crate) fn all_files(&self) -> impl Iterator<Item = &FileAddress> {
    self.forward.keys()
  }

  pub(crate) fn forward_tokens(&self, address: &FileAddress) -> Option<&HashSet<Token>> {
    self.forward.get(address)
  }

  pub(crate) fn files_with(&self, token: &str) -> Option<&HashSet<FileAddress>> {
    self.reverse.get(token)
  }

  pub(crate) fn reverse_entries(&self) -> impl Iterator<Item = (&Token, &HashSet<FileAddress>)> {
    self.reverse.iter()
  }

  pub(crate) fn last_update_time(&self, address: &FileAddress) -> Option<u64> {
    self.file_update_times.get(address).copied()
  }

  /// Exhaustive inverse check, for tests.
  #[cfg(test)]
  fn assert_invariants(&self) {
    for (fa, tokens) in &self.forward {
      assert!(
        self.file_update_times.contains_key(fa),
        "indexed file {fa} has no update time"
      );
      for token in tokens {
        let bucket = self.reverse.get(token).expect("forward token missing from reverse");
        assert!(bucket.contains(fa), "reverse[{token:?}] missing {fa}");
      }
    }
    for (token, bucket) in &self.reverse {
      assert!(!bucket.is_empty(), "empty reverse bucket for {token:?} not pruned");
      for fa in bucket {
        let tokens = self.forward.get(fa).expect("reverse file missing from forward");
        assert!(tokens.contains(token), "forward[{fa}] missing {token:?}");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::intern::Interner;

  struct Fixture {
    interner: Arc<Interner>,
    state: IndexState,
  }

  impl Fixture {
    fn new() -> Self {
      Self {
        interner: Arc::new(Interner::new()),
        state: IndexState::new(),
      }
    }

    fn address(&self, path: &str) -> FileAddress {
      FileAddress::intern(&self.interner, std::path::Path::new(path))
    }

    fn tokens(&self, words: &[&str]) -> HashSet<Token> {
      words.iter().map(|w| Token::intern(&self.interner, w)).collect()
    }

    fn update(&mut self, t: u64, path: &str, words: &[&str]) -> bool {
      let applied = self.state.apply(IndexUpdate::UpdateFileContent {
        t,
        address: self.address(path),
        tokens: self.tokens(words),
      });
      self.state.assert_invariants();
      applied
    }

    fn remove(&mut self, t: u64, path: &str) -> bool {
      let applied = self.state.apply(IndexUpdate::RemoveFile {
        t,
        address: self.address(path),
      });
      self.state.assert_invariants();
      applied
    }
  }

  #[test]
  fn update_links_both_directions() {
    let mut fx = Fixture::new();
    assert!(fx.update(1, "/a.txt", &["hello", "world"]));

    assert_eq!(fx.state.indexed_files(), 1);
    assert_eq!(fx.state.known_tokens(), 2);
    let bucket = fx.state.files_with("hello").unwrap();
    assert!(bucket.contains(&fx.address("/a.txt")));
  }

  #[test]
  fn reindex_replaces_old_tokens() {
    let mut fx = Fixture::new();
    fx.update(1, "/a.txt", &["old", "shared"]);
    fx.update(2, "/a.txt", &["new", "shared"]);

    assert!(fx.state.files_with("old").is_none(), "stale bucket must be pruned");
    assert!(fx.state.files_with("new").is_some());
    assert!(fx.state.files_with("shared").is_some());
    assert_eq!(fx.state.known_tokens(), 2);
  }

  #[test]
  fn reindex_is_idempotent() {
    let mut fx = Fixture::new();
    fx.update(5, "/a.txt", &["foo", "bar"]);
    // Same logical time: discarded, state unchanged.
    assert!(!fx.update(5, "/a.txt", &["foo", "bar"]));

    assert_eq!(fx.state.indexed_files(), 1);
    assert_eq!(fx.state.known_tokens(), 2);
    assert_eq!(fx.state.last_update_time(&fx.address("/a.txt")), Some(5));
  }

  #[test]
  fn delete_inverts_create() {
    let mut fx = Fixture::new();
    fx.update(1, "/a.txt", &["foo"]);
    assert!(fx.remove(2, "/a.txt"));

    assert_eq!(fx.state.indexed_files(), 0);
    assert_eq!(fx.state.known_tokens(), 0);
    // The tombstone time survives so stale updates keep losing.
    assert_eq!(fx.state.last_update_time(&fx.address("/a.txt")), Some(2));
  }

  #[test]
  fn out_of_order_updates_are_absorbed() {
    let mut fx = Fixture::new();
    // t=5 applied first, then a late worker finishes with t=3.
    assert!(fx.update(5, "/a.txt", &["foo"]));
    assert!(!fx.update(3, "/a.txt", &["bar"]));

    let tokens = fx.state.forward_tokens(&fx.address("/a.txt")).unwrap();
    let texts: HashSet<&str> = tokens.iter().map(|t| t.as_str()).collect();
    assert_eq!(texts, HashSet::from(["foo"]));
  }

  #[test]
  fn stale_update_after_delete_is_discarded() {
    let mut fx = Fixture::new();
    fx.update(1, "/a.txt", &["foo"]);
    fx.remove(4, "/a.txt");
    assert!(!fx.update(2, "/a.txt", &["foo"]));
    assert_eq!(fx.state.indexed_files(), 0);
  }

  #[test]
  fn removal_of_unknown_file_records_time() {
    let mut fx = Fixture::new();
    assert!(fx.remove(7, "/never-indexed.txt"));
    assert_eq!(fx.state.indexed_files(), 0);
    assert_eq!(fx.state.last_update_time(&fx.address("/never-indexed.txt")), Some(7));
  }

  #[test]
  fn shared_tokens_keep_other_files() {
    let mut fx = Fixture::new();
    fx.update(1, "/a.txt", &["shared", "only-a"]);
    fx.update(2, "/b.txt", &["shared", "only-b"]);
    fx.remove(3, "/a.txt");

    let bucket = fx.state.files_with("shared").unwrap();
    assert_eq!(bucket.len(), 1);
    assert!(bucket.contains(&fx.address("/b.txt")));
    assert!(fx.state.files_with("only-a").is_none());
  }
}
