//! Corpus-wide exact-duplicate filter for chunks.
//!
//! Hero sections, navigation, and footers repeat verbatim across many
//! pages of a site. The [`Deduplicator`] keeps the first chunk carrying a
//! given text and drops every later copy, no matter which record it comes
//! from. Very short chunks are dropped outright.
//!
//! State lives in the value itself; each build creates its own.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

/// Minimum chunk length in characters.
pub const DEFAULT_MIN_CHUNK_LEN: usize = 30;

/// SHA-256 of whitespace-normalized chunk text.
pub type Fingerprint = [u8; 32];

/// Outcome of offering a chunk to the [`Deduplicator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First time this text is seen.
    Keep,
    /// Fewer than `min_len` characters.
    TooShort,
    /// Same text was already admitted.
    Duplicate,
}

/// Tracks fingerprints seen during a single build.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    seen: HashSet<Fingerprint>,
    min_len: usize,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::with_min_len(DEFAULT_MIN_CHUNK_LEN)
    }

    pub fn with_min_len(min_len: usize) -> Self {
        Self {
            seen: HashSet::new(),
            min_len,
        }
    }

    /// Offer a chunk text, recording its fingerprint when kept.
    pub fn admit(&mut self, text: &str) -> Admission {
        if text.trim().chars().count() < self.min_len {
            return Admission::TooShort;
        }
        if self.seen.insert(fingerprint(text)) {
            Admission::Keep
        } else {
            Admission::Duplicate
        }
    }

    /// Returns `true` when the chunk must be dropped (short or already seen).
    pub fn is_duplicate(&mut self, text: &str) -> bool {
        self.admit(text) != Admission::Keep
    }

    /// Number of distinct texts admitted so far.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn min_len(&self) -> usize {
        self.min_len
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}

/// Fingerprint a chunk: runs of whitespace collapse to one space first.
pub fn fingerprint(text: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    for (i, word) in text.split_whitespace().enumerate() {
        if i > 0 {
            hasher.update(b" ");
        }
        hasher.update(word.as_bytes());
    }
    hasher.finalize().into()
}
