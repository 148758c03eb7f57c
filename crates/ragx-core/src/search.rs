//! Similarity search over an [`Index`].
//!
//! Both strategies score with a plain dot product, which equals cosine
//! similarity because index rows and the query are unit-normalized.
//!
//! - [`FlatSearch`] scores every row. This is the exact contract.
//! - [`IvfSearch`] partitions rows with spherical k-means and scores only
//!   the rows in the lists nearest to the query. With `nprobe >= nlist`
//!   it returns exactly what [`FlatSearch`] returns.
//!
//! # Ranking
//!
//! [`rank_top_k`] is shared by both: non-finite scores become `-1.0`,
//! scores are clipped to `[-1, 1]`, and results are ordered by score
//! descending then by index position ascending. `k` is clamped to the
//! number of candidates.

use std::cmp::Ordering;

use ndarray::{Array1, Array2, ArrayView1};

use crate::error::IndexError;
use crate::index::Index;

/// Score given to NaN or infinite similarities.
pub const WORST_SCORE: f32 = -1.0;

/// A scored index position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub position: usize,
    pub score: f32,
}

/// A nearest-neighbor strategy over a fixed [`Index`].
///
/// Implementations are built for one index and must only be queried
/// against that index.
pub trait VectorSearch: Send + Sync {
    /// Short identifier (`"flat"`, `"ivf"`).
    fn name(&self) -> &str;

    /// Return up to `k` hits ranked by [`rank_top_k`].
    fn search(&self, index: &Index, query: ArrayView1<'_, f32>, k: usize) -> Vec<Hit>;
}

/// Map a raw similarity to a rankable score.
pub fn clean_score(score: f32) -> f32 {
    if score.is_finite() {
        score.clamp(-1.0, 1.0)
    } else {
        WORST_SCORE
    }
}

fn by_rank(a: &Hit, b: &Hit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.position.cmp(&b.position))
}

/// Select the top `k` hits: score descending, then position ascending.
pub fn rank_top_k(scored: impl IntoIterator<Item = (usize, f32)>, k: usize) -> Vec<Hit> {
    let mut hits: Vec<Hit> = scored
        .into_iter()
        .map(|(position, score)| Hit {
            position,
            score: clean_score(score),
        })
        .collect();

    let k = k.min(hits.len());
    if k == 0 {
        return Vec::new();
    }
    if k < hits.len() {
        hits.select_nth_unstable_by(k - 1, by_rank);
        hits.truncate(k);
    }
    hits.sort_by(by_rank);
    hits
}

// ============ Exact ============

/// Brute-force dot product against every row.
#[derive(Debug, Clone, Default)]
pub struct FlatSearch;

impl VectorSearch for FlatSearch {
    fn name(&self) -> &str {
        "flat"
    }

    fn search(&self, index: &Index, query: ArrayView1<'_, f32>, k: usize) -> Vec<Hit> {
        let scores: Array1<f32> = index.vectors().dot(&query);
        rank_top_k(scores.iter().copied().enumerate(), k)
    }
}

// ============ Approximate (IVF) ============

/// Tuning for [`IvfSearch::train`].
#[derive(Debug, Clone)]
pub struct IvfParams {
    /// Number of k-means lists; clamped to the index size.
    pub nlist: usize,
    /// Lists scored per query; widened when they hold fewer than `k` rows.
    pub nprobe: usize,
    /// Lloyd iterations.
    pub iterations: usize,
}

impl Default for IvfParams {
    fn default() -> Self {
        Self {
            nlist: 64,
            nprobe: 8,
            iterations: 10,
        }
    }
}

/// Inverted-file index with a spherical k-means coarse quantizer.
///
/// Training is deterministic: seeds are evenly spaced index rows and ties
/// go to the lower centroid.
#[derive(Debug, Clone)]
pub struct IvfSearch {
    centroids: Array2<f32>,
    lists: Vec<Vec<usize>>,
    nprobe: usize,
    trained_on: usize,
}

impl IvfSearch {
    pub fn train(index: &Index, params: &IvfParams) -> Result<Self, IndexError> {
        if params.nlist == 0 || params.nprobe == 0 {
            return Err(IndexError::InvalidConfig(
                "nlist and nprobe must be > 0".to_string(),
            ));
        }
        let n = index.len();
        let nlist = params.nlist.min(n).max(1);
        let dim = index.dim();
        let vectors = index.vectors();

        let mut centroids = Array2::<f32>::zeros((nlist, dim));
        for c in 0..nlist {
            if n > 0 {
                centroids.row_mut(c).assign(&vectors.row(c * n / nlist));
            }
        }

        let mut assignment = vec![0usize; n];
        for iteration in 0..params.iterations.max(1) {
            let mut changed = false;
            for (i, slot) in assignment.iter_mut().enumerate() {
                let best = nearest_centroid(&centroids, vectors.row(i));
                if best != *slot {
                    changed = true;
                    *slot = best;
                }
            }

            let mut sums = Array2::<f32>::zeros((nlist, dim));
            let mut counts = vec![0usize; nlist];
            for (i, &c) in assignment.iter().enumerate() {
                let mut row = sums.row_mut(c);
                row += &vectors.row(i);
                counts[c] += 1;
            }
            for c in 0..nlist {
                // empty lists keep their previous centroid
                if counts[c] == 0 {
                    continue;
                }
                let mut row = sums.row_mut(c);
                let norm = row.dot(&row).sqrt();
                if norm > f32::EPSILON {
                    row /= norm;
                    centroids.row_mut(c).assign(&row);
                }
            }

            if iteration > 0 && !changed {
                break;
            }
        }

        let mut lists = vec![Vec::new(); nlist];
        for (i, &c) in assignment.iter().enumerate() {
            lists[c].push(i);
        }
        tracing::debug!(nlist, rows = n, "trained IVF lists");

        Ok(Self {
            centroids,
            lists,
            nprobe: params.nprobe,
            trained_on: n,
        })
    }

    pub fn nlist(&self) -> usize {
        self.lists.len()
    }

    pub fn lists(&self) -> &[Vec<usize>] {
        &self.lists
    }
}

fn nearest_centroid(centroids: &Array2<f32>, v: ArrayView1<'_, f32>) -> usize {
    let scores = centroids.dot(&v);
    rank_top_k(scores.iter().copied().enumerate(), 1)
        .first()
        .map(|h| h.position)
        .unwrap_or(0)
}

impl VectorSearch for IvfSearch {
    fn name(&self) -> &str {
        "ivf"
    }

    fn search(&self, index: &Index, query: ArrayView1<'_, f32>, k: usize) -> Vec<Hit> {
        debug_assert_eq!(index.len(), self.trained_on);
        let want = k.min(index.len());

        let centroid_scores = self.centroids.dot(&query);
        let probe_order = rank_top_k(centroid_scores.iter().copied().enumerate(), self.nlist());

        let mut candidates: Vec<usize> = Vec::new();
        for (probed, hit) in probe_order.iter().enumerate() {
            if probed >= self.nprobe && candidates.len() >= want {
                break;
            }
            candidates.extend_from_slice(&self.lists[hit.position]);
        }

        let scored = candidates
            .into_iter()
            .map(|p| (p, index.vector(p).dot(&query)));
        rank_top_k(scored, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{l2_normalize, HashEmbedder};
    use crate::models::Chunk;

    fn chunk(i: usize) -> Chunk {
        Chunk {
            source_url: format!("https://example.com/{}", i),
            title: String::new(),
            chunk_id: 0,
            text: format!("chunk {}", i),
        }
    }

    fn index_from(rows: Vec<Vec<f32>>) -> Index {
        let chunks = (0..rows.len()).map(chunk).collect();
        Index::from_rows(rows, chunks).unwrap()
    }

    fn unit(mut v: Vec<f32>) -> Vec<f32> {
        l2_normalize(&mut v);
        v
    }

    #[test]
    fn test_rank_orders_by_score_then_position() {
        let hits = rank_top_k(vec![(0, 0.5), (1, 0.9), (2, 0.9), (3, 0.1)], 3);
        let order: Vec<usize> = hits.iter().map(|h| h.position).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn test_rank_ties_stable_across_k() {
        let scored: Vec<(usize, f32)> = (0..20).map(|i| (i, 0.25)).collect();
        for k in 1..=20 {
            let hits = rank_top_k(scored.clone(), k);
            let order: Vec<usize> = hits.iter().map(|h| h.position).collect();
            assert_eq!(order, (0..k).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_rank_clamps_k() {
        assert_eq!(rank_top_k(vec![(0, 0.1), (1, 0.2)], 10).len(), 2);
        assert!(rank_top_k(Vec::<(usize, f32)>::new(), 3).is_empty());
    }

    #[test]
    fn test_rank_sanitizes_non_finite() {
        let hits = rank_top_k(
            vec![(0, f32::NAN), (1, -0.5), (2, f32::INFINITY), (3, 1.0000002)],
            4,
        );
        assert_eq!(hits[0], Hit { position: 3, score: 1.0 });
        assert_eq!(hits[1], Hit { position: 1, score: -0.5 });
        assert_eq!(hits[2].score, WORST_SCORE);
        assert_eq!(hits[3].score, WORST_SCORE);
        assert_eq!((hits[2].position, hits[3].position), (0, 2));
    }

    #[test]
    fn test_flat_exact_match_first() {
        let index = index_from(vec![
            unit(vec![1.0, 0.0, 0.0]),
            unit(vec![0.0, 1.0, 0.0]),
            unit(vec![1.0, 1.0, 0.0]),
        ]);
        let q = ndarray::arr1(&unit(vec![0.0, 1.0, 0.0]));
        let hits = FlatSearch.search(&index, q.view(), 2);
        assert_eq!(hits[0].position, 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].position, 2);
    }

    #[test]
    fn test_flat_score_is_cosine_of_raw_vectors() {
        let a = vec![1.0f32, 2.0, 3.0];
        let b = vec![-1.0f32, 0.5, 2.0];
        let (na, nb) = (3.741_657_4f32, 2.291_287_8f32);
        let expected = (-1.0 + 1.0 + 6.0) / (na * nb);

        let index = index_from(vec![unit(a.clone()), unit(vec![0.0, 0.0, 1.0])]);
        let q = ndarray::arr1(&unit(b));
        let hits = FlatSearch.search(&index, q.view(), 2);
        let hit = hits.iter().find(|h| h.position == 0).unwrap();
        assert!((hit.score - expected).abs() < 1e-5, "{}", hit.score);

        let same = ndarray::arr1(&unit(a));
        let top = FlatSearch.search(&index, same.view(), 1);
        assert_eq!(top[0].position, 0);
        assert!((top[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_flat_nan_row_never_beats_valid_match() {
        let index = index_from(vec![
            vec![f32::NAN, 0.0],
            unit(vec![-1.0, 0.0]),
            unit(vec![1.0, 0.2]),
        ]);
        let q = ndarray::arr1(&unit(vec![1.0, 0.0]));
        let hits = FlatSearch.search(&index, q.view(), 2);
        assert_eq!(hits[0].position, 2);
        // position 0 scores -1.0 and ties with the opposite vector; lower position wins
        assert_eq!(hits[1].position, 0);
        assert_eq!(hits[1].score, WORST_SCORE);

        let top1 = FlatSearch.search(&index, q.view(), 1);
        assert_eq!(top1[0].position, 2);
    }

    fn hashed_index(n: usize) -> (Index, HashEmbedder) {
        let e = HashEmbedder::new(32);
        let rows = (0..n)
            .map(|i| unit(e.embed_one(&format!("topic{} shared{} word{}", i % 7, i % 3, i))))
            .collect();
        (index_from(rows), e)
    }

    #[test]
    fn test_ivf_full_probe_equals_flat() {
        let (index, e) = hashed_index(60);
        let ivf = IvfSearch::train(
            &index,
            &IvfParams {
                nlist: 6,
                nprobe: 6,
                iterations: 5,
            },
        )
        .unwrap();
        for qtext in ["topic3 shared1", "word17", "topic0 topic5"] {
            let q = ndarray::arr1(&unit(e.embed_one(qtext)));
            let exact = FlatSearch.search(&index, q.view(), 10);
            let approx = ivf.search(&index, q.view(), 10);
            assert_eq!(exact.len(), approx.len());
            for (a, b) in exact.iter().zip(approx.iter()) {
                assert_eq!(a.position, b.position, "query {}", qtext);
                assert!((a.score - b.score).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_ivf_lists_partition_rows() {
        let (index, _) = hashed_index(40);
        let ivf = IvfSearch::train(&index, &IvfParams::default()).unwrap();
        let mut all: Vec<usize> = ivf.lists().iter().flatten().copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..40).collect::<Vec<_>>());
        assert!(ivf.nlist() <= 40);
    }

    #[test]
    fn test_ivf_widens_probe_to_fill_k() {
        let (index, e) = hashed_index(30);
        let ivf = IvfSearch::train(
            &index,
            &IvfParams {
                nlist: 10,
                nprobe: 1,
                iterations: 5,
            },
        )
        .unwrap();
        let q = ndarray::arr1(&unit(e.embed_one("topic2")));
        assert_eq!(ivf.search(&index, q.view(), 30).len(), 30);
        assert_eq!(ivf.search(&index, q.view(), 100).len(), 30);
    }

    #[test]
    fn test_ivf_rejects_zero_params() {
        let (index, _) = hashed_index(5);
        let err = IvfSearch::train(
            &index,
            &IvfParams {
                nlist: 0,
                nprobe: 1,
                iterations: 1,
            },
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::InvalidConfig(_)));
    }
}
