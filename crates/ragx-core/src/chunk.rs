//! Overlapping word-window chunker.
//!
//! Splits document text on whitespace and emits windows of up to `size`
//! words, consecutive windows sharing `overlap` words. Output is a pure
//! function of its inputs, which keeps deduplication and rebuilt indexes
//! reproducible.
//!
//! # Algorithm
//!
//! 1. Split `text` on any whitespace into words.
//! 2. Start at `i = 0`. While `i < words.len()`:
//!    - `j = min(words.len(), i + size)`
//!    - emit `words[i..j]` joined by single spaces
//!    - stop if `j == words.len()`
//!    - otherwise advance `i = max(j - overlap, i + 1)`
//! 3. The `i + 1` floor guarantees forward progress even when
//!    `overlap >= size`.
//!
//! # Example
//!
//! ```rust
//! use ragx_core::chunk::chunk_words;
//!
//! let chunks = chunk_words("a b c d e", 3, 1).unwrap();
//! assert_eq!(chunks, vec!["a b c", "c d e"]);
//! ```

use crate::error::IndexError;
use crate::models::{Chunk, SourceRecord};

/// Default window size in words.
pub const DEFAULT_CHUNK_SIZE: usize = 800;

/// Default overlap between consecutive windows, in words.
pub const DEFAULT_OVERLAP: usize = 120;

/// Split `text` into overlapping word windows.
///
/// # Errors
///
/// Returns [`IndexError::InvalidConfig`] when `size` is zero.
///
/// # Guarantees
///
/// - Empty or whitespace-only text yields no windows.
/// - Every window has between 1 and `size` words.
/// - Every input word appears in at least one window.
pub fn chunk_words(text: &str, size: usize, overlap: usize) -> Result<Vec<String>, IndexError> {
    if size == 0 {
        return Err(IndexError::InvalidConfig(
            "chunk size must be > 0".to_string(),
        ));
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    let mut chunks = Vec::new();
    let mut i = 0;

    while i < words.len() {
        let j = words.len().min(i.saturating_add(size));
        let window = words[i..j].join(" ");
        if !window.trim().is_empty() {
            chunks.push(window);
        }
        if j == words.len() {
            break;
        }
        i = j.saturating_sub(overlap).max(i + 1);
    }

    Ok(chunks)
}

/// Chunk a record's text and attach source metadata.
///
/// Chunk ids are contiguous from 0 in window order.
pub fn chunk_record(
    record: &SourceRecord,
    size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>, IndexError> {
    let windows = chunk_words(&record.text, size, overlap)?;
    Ok(windows
        .into_iter()
        .enumerate()
        .map(|(chunk_id, text)| Chunk {
            source_url: record.url.clone(),
            title: record.title.clone(),
            chunk_id,
            text,
        })
        .collect())
}
