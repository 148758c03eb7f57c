//! `ragx build`: JSONL pages → chunked, deduplicated, embedded index directory.

use anyhow::Result;
use std::path::Path;

use ragx_core::dedup::Deduplicator;
use ragx_core::embedding::{Embedder, HashEmbedder};
use ragx_core::index::{BuildStats, IndexBuilder};
use ragx_core::models::{IndexInfo, FORMAT_VERSION};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::index_store;
use crate::input;
use crate::progress::{Forward, ProgressEvent, ProgressMode};

/// Build an index from `input` into `out_dir`.
///
/// With `dry_run`, records are chunked and filtered and the counts printed;
/// nothing is embedded or written.
pub async fn run_build(
    config: &Config,
    input_path: &Path,
    out_dir: &Path,
    dry_run: bool,
    progress: ProgressMode,
) -> Result<()> {
    let reporter = progress.reporter();
    let forward = Forward(reporter.as_ref());
    let options = config.build_options();

    let records = input::read_records(input_path)?;
    reporter.report(ProgressEvent::Reading {
        records: records.len(),
    });
    tracing::info!(records = records.len(), input = %input_path.display(), "read input");

    let mut dedup = Deduplicator::with_min_len(options.min_chunk_len);

    if dry_run {
        // prepare() never calls the embedder, so no provider is constructed.
        let placeholder = HashEmbedder::default();
        let prepared = IndexBuilder::new(&placeholder, options)
            .with_reporter(&forward)
            .prepare(&records, &mut dedup)?;
        println!("build (dry-run)");
        print_counts(&prepared.stats);
        return Ok(());
    }

    index_store::ensure_replaceable(out_dir)?;
    let embedder = create_embedder(&config.embedding)?;
    tracing::info!(
        provider = config.embedding.provider(),
        model = embedder.model_name(),
        "embedding with"
    );

    let output = IndexBuilder::new(embedder.as_ref(), options.clone())
        .with_reporter(&forward)
        .build(&records, &mut dedup)
        .await?;

    if output.stats.zero_vectors > 0 {
        tracing::warn!(
            count = output.stats.zero_vectors,
            "some chunks embedded to zero vectors; they will score 0 against every query"
        );
    }

    let info = IndexInfo {
        model: embedder.model_name().to_string(),
        provider: config.embedding.provider().to_string(),
        num_chunks: output.index.len(),
        dim: output.index.dim(),
        chunk_size: Some(options.chunk_size),
        overlap: Some(options.overlap),
        min_chunk_len: Some(options.min_chunk_len),
        created_at: Some(chrono::Utc::now().to_rfc3339()),
        format_version: FORMAT_VERSION,
    };

    reporter.report(ProgressEvent::Writing {
        dir: out_dir.display().to_string(),
        chunks: output.index.len(),
    });
    index_store::write_index(out_dir, &output.index, &info)?;

    println!("build");
    print_counts(&output.stats);
    println!("  dim: {}", info.dim);
    println!("  model: {}", info.model);
    println!("  index: {}", out_dir.display());
    Ok(())
}

fn print_counts(stats: &BuildStats) {
    println!("  records: {}", stats.records);
    println!("  chunks produced: {}", stats.chunks_produced);
    println!("  dropped (too short): {}", stats.dropped_short);
    println!("  dropped (duplicate): {}", stats.dropped_duplicate);
    println!("  kept: {}", stats.kept);
}
