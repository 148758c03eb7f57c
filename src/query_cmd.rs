//! `ragx query` and `ragx info`.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use ragx_core::embedding::Embedder;
use ragx_core::models::{IndexInfo, QueryResult};
use ragx_core::retriever::Retriever;
use ragx_core::search::IvfSearch;
use ragx_core::IndexError;

use crate::config::{Config, EmbeddingConfig};
use crate::embedding::{configured_model_name, create_embedder};
use crate::index_store;

const SEPARATOR_WIDTH: usize = 80;

/// Retrieve the `k` chunks nearest to `query` from the index in `index_dir`.
pub async fn run_query(
    config: &Config,
    index_dir: &Path,
    query: &str,
    k: usize,
    json: bool,
) -> Result<()> {
    let loaded = index_store::read_index(index_dir)?;
    let embedding = resolve_embedding(&config.embedding, loaded.info.as_ref())?;

    let embedder: Arc<dyn Embedder> = create_embedder(&embedding)?;
    let index = Arc::new(loaded.index);

    let retriever = match config.retrieval.search.as_str() {
        "ivf" => {
            let ivf = IvfSearch::train(&index, &config.ivf_params())?;
            tracing::info!(nlist = ivf.nlist(), nprobe = config.retrieval.nprobe, "trained IVF");
            Retriever::with_search(index, embedder, Box::new(ivf))
        }
        _ => Retriever::new(index, embedder),
    };
    tracing::debug!(search = retriever.search_name(), k, "querying");

    let results = retriever.query(query, k).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for r in &results {
            print!("{}", format_result(r, config.retrieval.preview_chars));
        }
    }
    Ok(())
}

/// Fill unset embedding settings from the index's `info.json` and refuse a
/// model that differs from the one the index was built with.
///
/// An unset provider becomes the recorded one, so a bare query against a
/// hash-built index embeds with the hash provider.
fn resolve_embedding(
    configured: &EmbeddingConfig,
    info: Option<&IndexInfo>,
) -> Result<EmbeddingConfig, IndexError> {
    let mut embedding = configured.clone();
    let Some(info) = info else {
        return Ok(embedding);
    };

    if embedding.provider.is_none() && !info.provider.is_empty() {
        embedding.provider = Some(info.provider.clone());
    }
    if embedding.dims.is_none() {
        embedding.dims = Some(info.dim);
    }
    let same_provider = info.provider.is_empty() || info.provider == embedding.provider();
    if embedding.model.is_none() && same_provider && embedding.provider() != "hash" {
        embedding.model = Some(info.model.clone());
    }

    let wanted = configured_model_name(&embedding);
    if wanted != info.model {
        return Err(IndexError::ModelMismatch {
            index: info.model.clone(),
            configured: wanted,
        });
    }
    Ok(embedding)
}

/// One result block: header line, flattened preview, separator.
pub fn format_result(result: &QueryResult, preview_chars: usize) -> String {
    format!(
        "[{}] sim={:.4} | {} | {}\n{}\n{}\n",
        result.rank,
        result.score,
        result.chunk.title,
        result.chunk.source_url,
        preview(&result.chunk.text, preview_chars),
        "-".repeat(SEPARATOR_WIDTH)
    )
}

/// Newlines flattened to spaces, cut at `max_chars` characters with `...`.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() > max_chars {
        let mut cut: String = flat.chars().take(max_chars).collect();
        cut.push_str("...");
        cut
    } else {
        flat
    }
}

/// Print an index's diagnostics after loading and cross-checking its files.
pub fn run_info(index_dir: &Path) -> Result<()> {
    let loaded = index_store::read_index(index_dir)?;

    println!("index {}", index_dir.display());
    println!("  chunks: {}", loaded.index.len());
    println!("  dim: {}", loaded.index.dim());
    match &loaded.info {
        Some(info) => {
            println!("  model: {}", info.model);
            if !info.provider.is_empty() {
                println!("  provider: {}", info.provider);
            }
            if let (Some(size), Some(overlap)) = (info.chunk_size, info.overlap) {
                println!("  chunking: {} words, {} overlap", size, overlap);
            }
            if let Some(min_len) = info.min_chunk_len {
                println!("  min chunk length: {}", min_len);
            }
            if let Some(created) = &info.created_at {
                println!("  created: {}", created);
            }
            println!("  format version: {}", info.format_version);
        }
        None => println!("  info.json: absent"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragx_core::models::{Chunk, FORMAT_VERSION};

    fn result(text: &str) -> QueryResult {
        QueryResult {
            rank: 2,
            score: 0.43219,
            chunk: Chunk {
                source_url: "https://example.com/pricing".into(),
                title: "Pricing".into(),
                chunk_id: 0,
                text: text.into(),
            },
        }
    }

    fn info(provider: &str, model: &str, dim: usize) -> IndexInfo {
        IndexInfo {
            model: model.into(),
            provider: provider.into(),
            num_chunks: 10,
            dim,
            chunk_size: None,
            overlap: None,
            min_chunk_len: None,
            created_at: None,
            format_version: FORMAT_VERSION,
        }
    }

    #[test]
    fn test_format_result_block() {
        let block = format_result(&result("line one\nline two"), 500);
        let lines: Vec<&str> = block.lines().collect();
        assert_eq!(
            lines[0],
            "[2] sim=0.4322 | Pricing | https://example.com/pricing"
        );
        assert_eq!(lines[1], "line one line two");
        assert_eq!(lines[2], "-".repeat(80));
    }

    #[test]
    fn test_preview_truncates_with_ellipsis() {
        assert_eq!(preview("abcdef", 4), "abcd...");
        assert_eq!(preview("abcd", 4), "abcd");
        assert_eq!(preview("a\nb", 10), "a b");
    }

    #[test]
    fn test_preview_counts_chars_not_bytes() {
        assert_eq!(preview("ééééé", 3), "ééé...");
    }

    #[test]
    fn test_resolve_fills_dims_and_model_from_info() {
        let cfg = EmbeddingConfig {
            provider: Some("ollama".into()),
            ..Default::default()
        };
        let resolved =
            resolve_embedding(&cfg, Some(&info("ollama", "nomic-embed-text", 768))).unwrap();
        assert_eq!(resolved.model.as_deref(), Some("nomic-embed-text"));
        assert_eq!(resolved.dims, Some(768));
    }

    #[test]
    fn test_resolve_hash_dims_from_info() {
        let cfg = EmbeddingConfig {
            provider: Some("hash".into()),
            ..Default::default()
        };
        let resolved = resolve_embedding(&cfg, Some(&info("hash", "hash-fnv1a-64", 64))).unwrap();
        assert_eq!(resolved.dims, Some(64));
    }

    #[test]
    fn test_resolve_rejects_other_model() {
        let cfg = EmbeddingConfig {
            provider: Some("ollama".into()),
            model: Some("mxbai-embed-large".into()),
            ..Default::default()
        };
        let err = resolve_embedding(&cfg, Some(&info("ollama", "nomic-embed-text", 768)))
            .unwrap_err();
        assert!(matches!(err, IndexError::ModelMismatch { .. }));
    }

    #[test]
    fn test_resolve_takes_provider_from_info() {
        let cfg = EmbeddingConfig::default();
        let resolved = resolve_embedding(&cfg, Some(&info("hash", "hash-fnv1a-64", 64))).unwrap();
        assert_eq!(resolved.provider(), "hash");
        assert_eq!(resolved.dims, Some(64));

        let resolved =
            resolve_embedding(&cfg, Some(&info("ollama", "nomic-embed-text", 768))).unwrap();
        assert_eq!(resolved.provider(), "ollama");
        assert_eq!(resolved.model.as_deref(), Some("nomic-embed-text"));
    }

    #[test]
    fn test_resolve_explicit_provider_wins_over_info() {
        let cfg = EmbeddingConfig {
            provider: Some("local".into()),
            ..Default::default()
        };
        let err = resolve_embedding(&cfg, Some(&info("hash", "hash-fnv1a-64", 64))).unwrap_err();
        assert!(matches!(err, IndexError::ModelMismatch { .. }));
    }

    #[test]
    fn test_resolve_without_info_keeps_config() {
        let cfg = EmbeddingConfig {
            provider: Some("hash".into()),
            dims: Some(32),
            ..Default::default()
        };
        let resolved = resolve_embedding(&cfg, None).unwrap();
        assert_eq!(resolved.dims, Some(32));
    }
}
