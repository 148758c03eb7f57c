//! Core data models that flow through the indexing and retrieval pipeline.

use serde::{Deserialize, Serialize};

/// A crawled page as handed over by the extraction stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub url: String,
    pub title: String,
    pub text: String,
}

/// A word-window cut from a [`SourceRecord`].
///
/// `chunk_id` is the window's ordinal within its source as produced by the
/// chunker; it is not renumbered when earlier windows are filtered out.
/// Serialized as one `meta.jsonl` line: `{url, title, chunk_id, text}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(rename = "url")]
    pub source_url: String,
    #[serde(default)]
    pub title: String,
    pub chunk_id: usize,
    pub text: String,
}

/// One ranked hit returned by a query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    /// 1-based rank.
    pub rank: usize,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
    pub chunk: Chunk,
}

/// Diagnostics stored next to a persisted index (`info.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub model: String,
    #[serde(default)]
    pub provider: String,
    pub num_chunks: usize,
    pub dim: usize,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub overlap: Option<usize>,
    #[serde(default)]
    pub min_chunk_len: Option<usize>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default = "default_format_version")]
    pub format_version: u32,
}

/// Current on-disk layout version.
pub const FORMAT_VERSION: u32 = 1;

fn default_format_version() -> u32 {
    FORMAT_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_serializes_as_meta_line() {
        let chunk = Chunk {
            source_url: "https://example.com/pricing".into(),
            title: "Pricing".into(),
            chunk_id: 2,
            text: "Starter plan includes five seats".into(),
        };
        let line = serde_json::to_string(&chunk).unwrap();
        assert_eq!(
            line,
            r#"{"url":"https://example.com/pricing","title":"Pricing","chunk_id":2,"text":"Starter plan includes five seats"}"#
        );
    }

    #[test]
    fn test_info_accepts_minimal_record() {
        let info: IndexInfo =
            serde_json::from_str(r#"{"model":"m","num_chunks":3,"dim":4}"#).unwrap();
        assert_eq!(info.num_chunks, 3);
        assert_eq!(info.dim, 4);
        assert_eq!(info.format_version, FORMAT_VERSION);
        assert!(info.provider.is_empty());
    }
}
