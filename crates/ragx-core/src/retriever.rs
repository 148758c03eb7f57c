//! Query-time retrieval over a loaded [`Index`].
//!
//! A [`Retriever`] owns a shared, read-only index, a [`VectorSearch`]
//! strategy built for it, and the [`Embedder`] the index was built with.
//! It is `Send + Sync`: any number of tasks or threads may query one
//! instance, and any number of instances may share one `Arc<Index>`.

use std::sync::Arc;

use ndarray::ArrayView1;

use crate::embedding::{l2_normalize, sanitize, Embedder};
use crate::error::IndexError;
use crate::index::Index;
use crate::models::QueryResult;
use crate::search::{FlatSearch, VectorSearch};

pub struct Retriever {
    index: Arc<Index>,
    search: Box<dyn VectorSearch>,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    /// Exact (brute-force) retriever.
    pub fn new(index: Arc<Index>, embedder: Arc<dyn Embedder>) -> Self {
        Self::with_search(index, embedder, Box::new(FlatSearch))
    }

    /// Retriever using a custom search strategy built for `index`.
    pub fn with_search(
        index: Arc<Index>,
        embedder: Arc<dyn Embedder>,
        search: Box<dyn VectorSearch>,
    ) -> Self {
        Self {
            index,
            search,
            embedder,
        }
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn search_name(&self) -> &str {
        self.search.name()
    }

    /// Embed `text` and return the `k` most similar chunks.
    ///
    /// `k` larger than the index is clamped; `k == 0` is rejected.
    ///
    /// # Errors
    ///
    /// - [`IndexError::InvalidConfig`] for `k == 0`.
    /// - [`IndexError::EmbeddingFailure`] if the embedder fails or returns
    ///   anything other than one vector.
    /// - [`IndexError::DimensionMismatch`] if the query vector's length
    ///   differs from the index dimension.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<QueryResult>, IndexError> {
        if k == 0 {
            return Err(IndexError::InvalidConfig("k must be >= 1".to_string()));
        }

        let mut vectors = self
            .embedder
            .embed(&[text.to_string()])
            .await
            .map_err(IndexError::EmbeddingFailure)?;
        if vectors.len() != 1 {
            return Err(IndexError::EmbeddingFailure(anyhow::anyhow!(
                "expected 1 query vector, got {}",
                vectors.len()
            )));
        }
        let mut q = vectors.remove(0);
        self.query_vector(&mut q, k)
    }

    /// Rank against a raw (un-normalized) query vector.
    ///
    /// The vector is sanitized and normalized in place, exactly like index
    /// rows at build time.
    pub fn query_vector(&self, q: &mut [f32], k: usize) -> Result<Vec<QueryResult>, IndexError> {
        if k == 0 {
            return Err(IndexError::InvalidConfig("k must be >= 1".to_string()));
        }
        if q.len() != self.index.dim() {
            return Err(IndexError::DimensionMismatch {
                expected: self.index.dim(),
                actual: q.len(),
            });
        }
        sanitize(q);
        l2_normalize(q);

        let hits = self.search.search(&self.index, ArrayView1::from(&*q), k);
        Ok(hits
            .into_iter()
            .enumerate()
            .filter_map(|(i, hit)| {
                self.index.chunk(hit.position).map(|chunk| QueryResult {
                    rank: i + 1,
                    score: hit.score,
                    chunk: chunk.clone(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::Deduplicator;
    use crate::embedding::HashEmbedder;
    use crate::index::{BuildOptions, IndexBuilder};
    use crate::models::{Chunk, SourceRecord};
    use crate::search::{IvfParams, IvfSearch};

    fn pages() -> Vec<SourceRecord> {
        let texts = [
            "Starter plan costs six hundred dollars monthly with twelve hundred scenario runs included",
            "Growth plan doubles parallel runs and adds four users for scaling teams quickly",
            "Salesforce integration opens the app launcher inside a built in browser session",
            "Write tests in natural English and agents generate executable test cases automatically",
            "Enterprise customers receive regional deployments dedicated support and custom parallelism",
        ];
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| SourceRecord {
                url: format!("https://example.com/page{}", i),
                title: format!("Page {}", i),
                text: t.to_string(),
            })
            .collect()
    }

    async fn build_retriever() -> (Retriever, Arc<Index>) {
        let embedder = Arc::new(HashEmbedder::new(256));
        let options = BuildOptions {
            chunk_size: 50,
            overlap: 5,
            min_chunk_len: 30,
            batch_size: 2,
        };
        let out = IndexBuilder::new(embedder.as_ref(), options)
            .build(&pages(), &mut Deduplicator::new())
            .await
            .unwrap();
        let index = Arc::new(out.index);
        (Retriever::new(index.clone(), embedder), index)
    }

    #[tokio::test]
    async fn test_exact_chunk_text_ranks_first() {
        let (retriever, index) = build_retriever().await;
        for (i, chunk) in index.chunks().iter().enumerate() {
            let results = retriever.query(&chunk.text, 3).await.unwrap();
            assert_eq!(results[0].rank, 1);
            assert_eq!(results[0].chunk, index.chunks()[i]);
            assert!((results[0].score - 1.0).abs() < 1e-5);
        }
    }

    #[tokio::test]
    async fn test_ranks_descending_and_one_based() {
        let (retriever, _) = build_retriever().await;
        let results = retriever.query("parallel runs plan", 4).await.unwrap();
        assert_eq!(results.len(), 4);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.rank, i + 1);
        }
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_k_larger_than_corpus_returns_corpus() {
        let (retriever, index) = build_retriever().await;
        let results = retriever.query("anything", 1000).await.unwrap();
        assert_eq!(results.len(), index.len());
    }

    #[tokio::test]
    async fn test_zero_k_rejected() {
        let (retriever, _) = build_retriever().await;
        let err = retriever.query("anything", 0).await.unwrap_err();
        assert!(matches!(err, IndexError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let (_, index) = build_retriever().await;
        let other = Arc::new(HashEmbedder::new(16));
        let retriever = Retriever::new(index, other);
        let err = retriever.query("pricing", 3).await.unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 256,
                actual: 16
            }
        ));
    }

    #[tokio::test]
    async fn test_nan_row_scores_worst() {
        let chunk = |i: usize| Chunk {
            source_url: format!("u{}", i),
            title: String::new(),
            chunk_id: 0,
            text: format!("t{}", i),
        };
        let index = Arc::new(
            Index::from_rows(
                vec![vec![f32::NAN, 0.0], vec![0.6, 0.8], vec![0.0, 1.0]],
                vec![chunk(0), chunk(1), chunk(2)],
            )
            .unwrap(),
        );
        let retriever = Retriever::new(index, Arc::new(HashEmbedder::new(2)));
        let results = retriever.query_vector(&mut [0.0, 2.0], 2).unwrap();
        assert_eq!(results[0].chunk.source_url, "u2");
        assert_eq!(results[1].chunk.source_url, "u1");

        let all = retriever.query_vector(&mut [0.0, 2.0], 3).unwrap();
        assert_eq!(all[2].chunk.source_url, "u0");
        assert_eq!(all[2].score, -1.0);
    }

    #[tokio::test]
    async fn test_ivf_retriever_matches_exact_top1() {
        let (exact, index) = build_retriever().await;
        let ivf = IvfSearch::train(
            &index,
            &IvfParams {
                nlist: 2,
                nprobe: 2,
                iterations: 4,
            },
        )
        .unwrap();
        let approx =
            Retriever::with_search(index.clone(), Arc::new(HashEmbedder::new(256)), Box::new(ivf));
        assert_eq!(approx.search_name(), "ivf");
        let a = exact.query("Salesforce browser", 1).await.unwrap();
        let b = approx.query("Salesforce browser", 1).await.unwrap();
        assert_eq!(a[0].chunk, b[0].chunk);
    }

    #[tokio::test]
    async fn test_concurrent_queries_share_index() {
        let (retriever, _) = build_retriever().await;
        let retriever = Arc::new(retriever);
        let mut handles = Vec::new();
        for q in ["pricing plan", "Salesforce", "English tests", "support"] {
            let r = retriever.clone();
            handles.push(tokio::spawn(async move { r.query(q, 2).await.unwrap() }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().len(), 2);
        }
    }
}
