//! Candidate selection for both search modes.
//!
//! Selection is the fast, approximate first phase: it runs against the
//! in-memory maps only and may admit files that do not actually contain the
//! query. The search engine's second phase re-reads every candidate and
//! applies the real match predicate, so false positives never reach the
//! caller. False negatives are the only thing selection must avoid.
//!
//! The `alive` probe reports whether the requesting consumer still exists;
//! it is checked between filter stages and on every candidate loop so a
//! cancelled query stops burning actor time promptly.

use std::collections::HashSet;

use crate::{
  config::SearchMode,
  intern::FileAddress,
  tokenize,
};

use super::state::IndexState;

pub(crate) fn select_candidates(
  state: &IndexState,
  mode: SearchMode,
  query: &str,
  alive: &dyn Fn() -> bool,
) -> Vec<FileAddress> {
  match mode {
    SearchMode::Word => word_candidates(state, query, alive),
    SearchMode::Trigram => trigram_candidates(state, query, alive),
  }
}

// ============================================================================
// Word mode
// ============================================================================

fn word_candidates(state: &IndexState, query: &str, alive: &dyn Fn() -> bool) -> Vec<FileAddress> {
  let terms = tokenize::word_tokens(query);
  match terms.as_slice() {
    [] => state.all_files().cloned().collect(),
    [single] => single_word(state, single, alive),
    [start, end] => word_pair(state, start, end, alive),
    _ => word_phrase(state, &terms, alive),
  }
}

/// Exact bucket first, then every token containing the term as a substring.
fn single_word(state: &IndexState, term: &str, alive: &dyn Fn() -> bool) -> Vec<FileAddress> {
  let mut out = Vec::new();
  let mut seen: HashSet<FileAddress> = HashSet::new();

  if let Some(bucket) = state.files_with(term) {
    for fa in bucket {
      if seen.insert(fa.clone()) {
        out.push(fa.clone());
      }
    }
  }

  for (token, bucket) in state.reverse_entries() {
    if !alive() {
      return out;
    }
    if token.as_str().contains(term) {
      for fa in bucket {
        if seen.insert(fa.clone()) {
          out.push(fa.clone());
        }
      }
    }
  }
  out
}

/// Two-term queries match a token extending the start term on either side
/// together with a token starting with the end term. The sides are treated
/// asymmetrically on purpose (the end term is never suffix-matched), which
/// admits near-matches such as `food bark` for the query `foo bar`;
/// verification against file content filters those out.
fn word_pair(state: &IndexState, start: &str, end: &str, alive: &dyn Fn() -> bool) -> Vec<FileAddress> {
  let mut start_side: HashSet<&FileAddress> = HashSet::new();
  let mut end_side: HashSet<&FileAddress> = HashSet::new();

  for (token, bucket) in state.reverse_entries() {
    if !alive() {
      return Vec::new();
    }
    let text = token.as_str();
    if text.ends_with(start) || text.starts_with(start) {
      start_side.extend(bucket);
    }
    if text.starts_with(end) {
      end_side.extend(bucket);
    }
  }

  start_side
    .into_iter()
    .filter(|fa| end_side.contains(*fa))
    .cloned()
    .collect()
}

/// Three or more terms: seed from the smallest exact bucket among the core
/// (interior) terms, then require all core terms exactly, the start term as
/// an exact token or a token suffix, and the end term as an exact token or a
/// token prefix.
fn word_phrase(state: &IndexState, terms: &[String], alive: &dyn Fn() -> bool) -> Vec<FileAddress> {
  let start = &terms[0];
  let end = &terms[terms.len() - 1];
  let core = &terms[1..terms.len() - 1];

  let mut seed: Option<&HashSet<FileAddress>> = None;
  for term in core {
    match state.files_with(term) {
      // A core term nobody contains: the intersection is empty.
      None => return Vec::new(),
      Some(bucket) => {
        if seed.is_none_or(|current| bucket.len() < current.len()) {
          seed = Some(bucket);
        }
      }
    }
  }
  let Some(seed) = seed else {
    return Vec::new();
  };

  let mut out = Vec::new();
  for fa in seed {
    if !alive() {
      return out;
    }
    let Some(tokens) = state.forward_tokens(fa) else {
      continue;
    };
    if !core.iter().all(|term| tokens.contains(term.as_str())) {
      continue;
    }
    let start_ok = tokens.contains(start.as_str()) || tokens.iter().any(|t| t.as_str().ends_with(start.as_str()));
    if !start_ok {
      continue;
    }
    let end_ok = tokens.contains(end.as_str()) || tokens.iter().any(|t| t.as_str().starts_with(end.as_str()));
    if !end_ok {
      continue;
    }
    out.push(fa.clone());
  }
  out
}

// ============================================================================
// Trigram mode
// ============================================================================

fn trigram_candidates(state: &IndexState, query: &str, alive: &dyn Fn() -> bool) -> Vec<FileAddress> {
  match query.chars().count() {
    0 => state.all_files().cloned().collect(),
    // Too short for a full window: union of every trigram containing the
    // query as a substring.
    1 | 2 => {
      let needle = query.to_lowercase();
      let mut out = Vec::new();
      let mut seen: HashSet<FileAddress> = HashSet::new();
      for (token, bucket) in state.reverse_entries() {
        if !alive() {
          return out;
        }
        if token.as_str().contains(&needle) {
          for fa in bucket {
            if seen.insert(fa.clone()) {
              out.push(fa.clone());
            }
          }
        }
      }
      out
    }
    // Intersect the buckets of every query trigram, in order, stopping as
    // soon as the intersection empties.
    _ => {
      let trigrams = tokenize::trigram_tokens(query);
      let mut trigrams = trigrams.iter();
      let Some(first) = trigrams.next() else {
        return Vec::new();
      };
      let Some(seed) = state.files_with(first) else {
        return Vec::new();
      };

      let mut current: HashSet<FileAddress> = seed.iter().cloned().collect();
      for trigram in trigrams {
        if !alive() {
          return Vec::new();
        }
        let Some(bucket) = state.files_with(trigram) else {
          return Vec::new();
        };
        current.retain(|fa| bucket.contains(fa));
        if current.is_empty() {
          return Vec::new();
        }
      }
      current.into_iter().collect()
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::{
    intern::{Interner, Token},
    message::IndexUpdate,
  };

  struct Fixture {
    interner: Arc<Interner>,
    state: IndexState,
    mode: SearchMode,
    next_t: u64,
  }

  impl Fixture {
    fn new(mode: SearchMode) -> Self {
      Self {
        interner: Arc::new(Interner::new()),
        state: IndexState::new(),
        mode,
        next_t: 0,
      }
    }

    fn index(&mut self, path: &str, content: &str) {
      self.next_t += 1;
      let tokens = content
        .lines()
        .flat_map(|line| self.mode.tokenize_line(line))
        .map(|fragment| Token::intern(&self.interner, &fragment))
        .collect();
      self.state.apply(IndexUpdate::UpdateFileContent {
        t: self.next_t,
        address: self.address(path),
        tokens,
      });
    }

    fn address(&self, path: &str) -> FileAddress {
      FileAddress::intern(&self.interner, std::path::Path::new(path))
    }

    fn search(&self, query: &str) -> HashSet<String> {
      select_candidates(&self.state, self.mode, query, &|| true)
        .into_iter()
        .map(|fa| fa.as_str().to_string())
        .collect()
    }
  }

  fn paths(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn word_single_term() {
    let mut fx = Fixture::new(SearchMode::Word);
    fx.index("/a.txt", "hello world");

    assert_eq!(fx.search("hello"), paths(&["/a.txt"]));
    assert_eq!(fx.search("xyz"), paths(&[]));
  }

  #[test]
  fn word_single_term_matches_inside_tokens() {
    let mut fx = Fixture::new(SearchMode::Word);
    fx.index("/a.txt", "wonderful");
    assert_eq!(fx.search("onde"), paths(&["/a.txt"]));
  }

  #[test]
  fn word_empty_query_returns_everything() {
    let mut fx = Fixture::new(SearchMode::Word);
    fx.index("/a.txt", "one");
    fx.index("/b.txt", "two");
    assert_eq!(fx.search(""), paths(&["/a.txt", "/b.txt"]));
  }

  #[test]
  fn word_pair_admits_exact_and_near_matches() {
    let mut fx = Fixture::new(SearchMode::Word);
    fx.index("/a.txt", "foo bar");
    fx.index("/b.txt", "food bark");
    assert_eq!(fx.search("foo bar"), paths(&["/a.txt", "/b.txt"]));
  }

  #[test]
  fn word_pair_accepts_suffix_on_start_term() {
    let mut fx = Fixture::new(SearchMode::Word);
    fx.index("/a.txt", "xfoo bar");
    assert_eq!(fx.search("foo bar"), paths(&["/a.txt"]));
  }

  #[test]
  fn word_pair_end_term_is_never_suffix_matched() {
    let mut fx = Fixture::new(SearchMode::Word);
    fx.index("/a.txt", "foo xbar");
    assert_eq!(fx.search("foo bar"), paths(&[]));
  }

  #[test]
  fn word_phrase_requires_exact_core() {
    let mut fx = Fixture::new(SearchMode::Word);
    fx.index("/a.txt", "alpha beta gamma");
    fx.index("/b.txt", "alpha betax gamma");

    assert_eq!(fx.search("alpha beta gamma"), paths(&["/a.txt"]));
  }

  #[test]
  fn word_phrase_edges_extend_outward() {
    let mut fx = Fixture::new(SearchMode::Word);
    // Line "xxalpha beta gammayy" contains the phrase "alpha beta gamma".
    fx.index("/a.txt", "xxalpha beta gammayy");
    assert_eq!(fx.search("alpha beta gamma"), paths(&["/a.txt"]));
  }

  #[test]
  fn word_phrase_with_unknown_core_is_empty() {
    let mut fx = Fixture::new(SearchMode::Word);
    fx.index("/a.txt", "alpha beta gamma");
    assert_eq!(fx.search("alpha missing gamma"), paths(&[]));
  }

  #[test]
  fn trigram_short_query_matches_inside_windows() {
    let mut fx = Fixture::new(SearchMode::Trigram);
    fx.index("/a.txt", "abcdef");

    assert_eq!(fx.search("cd"), paths(&["/a.txt"]));
    assert_eq!(fx.search("xy"), paths(&[]));
  }

  #[test]
  fn trigram_intersection_excludes_partial_overlap() {
    let mut fx = Fixture::new(SearchMode::Trigram);
    fx.index("/a.txt", "the quick brown fox");
    fx.index("/b.txt", "the slow cat");

    assert_eq!(fx.search("quick"), paths(&["/a.txt"]));
    // Both share the trigram "the".
    assert_eq!(fx.search("the"), paths(&["/a.txt", "/b.txt"]));
  }

  #[test]
  fn trigram_empty_query_returns_everything() {
    let mut fx = Fixture::new(SearchMode::Trigram);
    fx.index("/a.txt", "abc");
    fx.index("/b.txt", "def");
    assert_eq!(fx.search(""), paths(&["/a.txt", "/b.txt"]));
  }

  #[test]
  fn trigram_can_admit_false_positives_across_lines() {
    let mut fx = Fixture::new(SearchMode::Trigram);
    // Both lines contribute windows; the query trigrams all exist even
    // though no single line contains the query. Verification culls this.
    fx.index("/a.txt", "abcd\ncdef");
    assert_eq!(fx.search("abcdef"), paths(&["/a.txt"]));
  }

  #[test]
  fn dead_consumer_stops_selection() {
    let mut fx = Fixture::new(SearchMode::Word);
    fx.index("/a.txt", "hello world");

    let out = select_candidates(&fx.state, SearchMode::Word, "hello world missing", &|| false);
    assert!(out.is_empty());
  }

  #[test]
  fn out_of_order_update_scenario() {
    let mut fx = Fixture::new(SearchMode::Word);
    let address = fx.address("/a.txt");
    fx.state.apply(IndexUpdate::UpdateFileContent {
      t: 5,
      address: address.clone(),
      tokens: [Token::intern(&fx.interner, "foo")].into_iter().collect(),
    });
    fx.state.apply(IndexUpdate::UpdateFileContent {
      t: 3,
      address,
      tokens: [Token::intern(&fx.interner, "bar")].into_iter().collect(),
    });

    assert_eq!(fx.search("foo"), paths(&["/a.txt"]));
    assert_eq!(fx.search("bar"), paths(&[]));
  }
}
