//! Index model and construction.
//!
//! An [`Index`] is a `[n, dim]` matrix of unit-normalized `f32` vectors plus
//! `n` [`Chunk`] records. Row `i` of the matrix belongs to `chunks[i]`; the
//! position is the only key linking the two, so every constructor checks
//! that both sides have the same length.
//!
//! # Build pipeline
//!
//! [`IndexBuilder::build`] runs, in order:
//!
//! 1. Chunk every record ([`chunk_record`]).
//! 2. Drop chunks below `min_chunk_len`, then drop repeats via the
//!    caller's [`Deduplicator`].
//! 3. Embed survivors in batches of `batch_size`.
//! 4. Replace non-finite components with `0.0`.
//! 5. L2-normalize every row.
//!
//! Any embedding error, short response, or dimension disagreement aborts
//! the build. Nothing is returned for persistence in that case.

use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::chunk::{chunk_record, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
use crate::dedup::{Admission, Deduplicator, DEFAULT_MIN_CHUNK_LEN};
use crate::embedding::{l2_normalize, sanitize, Embedder, NORM_EPS};
use crate::error::IndexError;
use crate::models::{Chunk, SourceRecord};

/// Positionally aligned vectors and chunk metadata.
#[derive(Debug, Clone)]
pub struct Index {
    vectors: Array2<f32>,
    chunks: Vec<Chunk>,
}

impl Index {
    /// Pair a vector matrix with its metadata.
    ///
    /// # Errors
    ///
    /// [`IndexError::IndexCorrupt`] when the row count differs from the
    /// number of chunks.
    pub fn new(vectors: Array2<f32>, chunks: Vec<Chunk>) -> Result<Self, IndexError> {
        if vectors.nrows() != chunks.len() {
            return Err(IndexError::IndexCorrupt(format!(
                "{} vectors but {} metadata records",
                vectors.nrows(),
                chunks.len()
            )));
        }
        Ok(Self { vectors, chunks })
    }

    /// Build from per-chunk rows, checking that all rows share one dimension.
    pub fn from_rows(rows: Vec<Vec<f32>>, chunks: Vec<Chunk>) -> Result<Self, IndexError> {
        if rows.len() != chunks.len() {
            return Err(IndexError::IndexCorrupt(format!(
                "{} vectors but {} metadata records",
                rows.len(),
                chunks.len()
            )));
        }
        let dim = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut flat = Vec::with_capacity(rows.len() * dim);
        for row in &rows {
            if row.len() != dim {
                return Err(IndexError::DimensionMismatch {
                    expected: dim,
                    actual: row.len(),
                });
            }
            flat.extend_from_slice(row);
        }
        let vectors = Array2::from_shape_vec((rows.len(), dim), flat)
            .map_err(|e| IndexError::IndexCorrupt(e.to_string()))?;
        Self::new(vectors, chunks)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.vectors.ncols()
    }

    pub fn vectors(&self) -> ArrayView2<'_, f32> {
        self.vectors.view()
    }

    pub fn vector(&self, position: usize) -> ArrayView1<'_, f32> {
        self.vectors.row(position)
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk(&self, position: usize) -> Option<&Chunk> {
        self.chunks.get(position)
    }
}

/// Chunking, filtering, and batching parameters for a build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub chunk_size: usize,
    pub overlap: usize,
    pub min_chunk_len: usize,
    pub batch_size: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
            min_chunk_len: DEFAULT_MIN_CHUNK_LEN,
            batch_size: 64,
        }
    }
}

impl BuildOptions {
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.chunk_size == 0 {
            return Err(IndexError::InvalidConfig(
                "chunk_size must be > 0".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(IndexError::InvalidConfig(
                "batch_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Counters collected during a build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub records: usize,
    pub chunks_produced: usize,
    pub dropped_short: usize,
    pub dropped_duplicate: usize,
    pub kept: usize,
    /// Non-finite vector components replaced by `0.0`.
    pub sanitized_components: usize,
    /// Vectors whose norm fell under the eps guard and stayed near zero.
    pub zero_vectors: usize,
}

/// Chunks that survived filtering, ready for embedding.
#[derive(Debug, Clone)]
pub struct PreparedChunks {
    pub chunks: Vec<Chunk>,
    pub stats: BuildStats,
}

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub index: Index,
    pub stats: BuildStats,
}

/// A progress event emitted by [`IndexBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    /// `n` of `total` records chunked and filtered.
    Chunking { n: usize, total: usize },
    /// `n` of `total` surviving chunks embedded.
    Embedding { n: usize, total: usize },
}

/// Receives build progress. The app crate writes these to stderr.
pub trait BuildReporter: Send + Sync {
    fn report(&self, event: BuildEvent);
}

/// Reporter that drops every event.
pub struct Silent;

impl BuildReporter for Silent {
    fn report(&self, _event: BuildEvent) {}
}

/// Turns source records into an [`Index`] using an [`Embedder`].
pub struct IndexBuilder<'a> {
    embedder: &'a dyn Embedder,
    options: BuildOptions,
    reporter: &'a dyn BuildReporter,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(embedder: &'a dyn Embedder, options: BuildOptions) -> Self {
        Self {
            embedder,
            options,
            reporter: &Silent,
        }
    }

    pub fn with_reporter(mut self, reporter: &'a dyn BuildReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Chunk, length-filter, and deduplicate records without embedding.
    pub fn prepare(
        &self,
        records: &[SourceRecord],
        dedup: &mut Deduplicator,
    ) -> Result<PreparedChunks, IndexError> {
        self.options.validate()?;

        let mut stats = BuildStats {
            records: records.len(),
            ..Default::default()
        };
        let mut kept = Vec::new();

        for (n, record) in records.iter().enumerate() {
            let chunks = chunk_record(record, self.options.chunk_size, self.options.overlap)?;
            stats.chunks_produced += chunks.len();

            for chunk in chunks {
                if chunk.text.chars().count() < self.options.min_chunk_len {
                    stats.dropped_short += 1;
                    continue;
                }
                match dedup.admit(&chunk.text) {
                    Admission::Keep => kept.push(chunk),
                    Admission::TooShort => stats.dropped_short += 1,
                    Admission::Duplicate => stats.dropped_duplicate += 1,
                }
            }

            self.reporter.report(BuildEvent::Chunking {
                n: n + 1,
                total: records.len(),
            });
        }

        stats.kept = kept.len();
        tracing::debug!(
            records = stats.records,
            produced = stats.chunks_produced,
            short = stats.dropped_short,
            duplicate = stats.dropped_duplicate,
            kept = stats.kept,
            "chunking finished"
        );

        Ok(PreparedChunks {
            chunks: kept,
            stats,
        })
    }

    /// Embed prepared chunks and assemble the normalized index.
    pub async fn embed(&self, prepared: PreparedChunks) -> Result<BuildOutput, IndexError> {
        let PreparedChunks { chunks, mut stats } = prepared;
        if chunks.is_empty() {
            return Err(IndexError::EmptyCorpus);
        }

        let total = chunks.len();
        let mut rows: Vec<Vec<f32>> = Vec::with_capacity(total);
        let mut dim: Option<usize> = None;

        for batch in chunks.chunks(self.options.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self
                .embedder
                .embed(&texts)
                .await
                .map_err(IndexError::EmbeddingFailure)?;

            if vectors.len() != texts.len() {
                return Err(IndexError::EmbeddingFailure(anyhow::anyhow!(
                    "expected {} vectors from '{}', got {}",
                    texts.len(),
                    self.embedder.model_name(),
                    vectors.len()
                )));
            }

            for mut v in vectors {
                let expected = *dim.get_or_insert(v.len());
                if v.len() != expected {
                    return Err(IndexError::DimensionMismatch {
                        expected,
                        actual: v.len(),
                    });
                }
                stats.sanitized_components += sanitize(&mut v);
                if l2_normalize(&mut v) < NORM_EPS {
                    stats.zero_vectors += 1;
                }
                rows.push(v);
            }

            self.reporter.report(BuildEvent::Embedding {
                n: rows.len(),
                total,
            });
        }

        if dim == Some(0) {
            return Err(IndexError::EmbeddingFailure(anyhow::anyhow!(
                "'{}' returned zero-length vectors",
                self.embedder.model_name()
            )));
        }
        if stats.sanitized_components > 0 {
            tracing::debug!(
                components = stats.sanitized_components,
                "replaced non-finite embedding components"
            );
        }

        let index = Index::from_rows(rows, chunks)?;
        Ok(BuildOutput { index, stats })
    }

    /// Run the full pipeline: [`prepare`](Self::prepare) then [`embed`](Self::embed).
    pub async fn build(
        &self,
        records: &[SourceRecord],
        dedup: &mut Deduplicator,
    ) -> Result<BuildOutput, IndexError> {
        let prepared = self.prepare(records, dedup)?;
        self.embed(prepared).await
    }
}
