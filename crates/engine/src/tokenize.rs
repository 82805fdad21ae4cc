//! Tokenizers for the two search modes.
//!
//! Word mode splits a line into runs of alphanumeric characters. Trigram mode
//! slides a 3-character window over the lowercased line, padding short lines
//! with trailing spaces to length 3. Both produce lowercased fragments; the
//! index stores them deduplicated per file.

/// Runs of alphanumeric characters, lowercased.
pub fn word_tokens(line: &str) -> Vec<String> {
  line
    .split(|c: char| !c.is_alphanumeric())
    .filter(|run| !run.is_empty())
    .map(str::to_lowercase)
    .collect()
}

/// Every length-3 window of the lowercased line. Lines shorter than 3
/// characters (including empty ones) are padded with spaces to one window.
pub fn trigram_tokens(line: &str) -> Vec<String> {
  let mut chars: Vec<char> = line.to_lowercase().chars().collect();
  while chars.len() < 3 {
    chars.push(' ');
  }
  chars.windows(3).map(|w| w.iter().collect()).collect()
}

/// Query-time verification predicate shared by both modes: case-insensitive
/// substring containment, consistent with the lowercased token streams.
pub fn line_matches(line: &str, query: &str) -> bool {
  line.to_lowercase().contains(&query.to_lowercase())
}
