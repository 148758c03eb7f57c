//! Embedding capability trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that every embedding backend implements,
//! plus the pure helpers applied to its output: non-finite sanitization,
//! L2 normalization, and little-endian byte encoding for the persisted
//! vector file.
//!
//! Network and model-backed providers (OpenAI, Ollama, fastembed) live in
//! the `ragx` app crate. [`HashEmbedder`] lives here: it is deterministic,
//! offline, and needs nothing but the standard library.

use async_trait::async_trait;

/// Lower bound on the norm used by [`l2_normalize`].
pub const NORM_EPS: f64 = 1e-12;

/// A text → fixed-dimension vector capability.
///
/// Implementations must be deterministic for a given model: embedding a
/// text alone or inside any batch yields the same vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per text in input order.
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Replace NaN and ±infinity components with `0.0`.
///
/// Returns how many components were replaced.
pub fn sanitize(v: &mut [f32]) -> usize {
    let mut replaced = 0;
    for x in v.iter_mut() {
        if !x.is_finite() {
            *x = 0.0;
            replaced += 1;
        }
    }
    replaced
}

/// Scale `v` to unit length: `v / max(‖v‖₂, 1e-12)`.
///
/// The norm is accumulated in `f64`. An all-zero vector stays zero.
/// Returns the norm before scaling.
pub fn l2_normalize(v: &mut [f32]) -> f64 {
    let norm = v
        .iter()
        .map(|&x| (x as f64) * (x as f64))
        .sum::<f64>()
        .sqrt();
    let denom = norm.max(NORM_EPS);
    for x in v.iter_mut() {
        *x = ((*x as f64) / denom) as f32;
    }
    norm
}

/// Encode floats as little-endian `f32` bytes (`4 × len` bytes).
///
/// # Example
///
/// ```rust
/// use ragx_core::embedding::{f32_from_le_bytes, f32_to_le_bytes};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let bytes = f32_to_le_bytes(&v);
/// assert_eq!(bytes.len(), 12);
/// assert_eq!(f32_from_le_bytes(&bytes), v);
/// ```
pub fn f32_to_le_bytes(v: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(v.len() * 4);
    for &x in v {
        bytes.extend_from_slice(&x.to_le_bytes());
    }
    bytes
}

/// Decode little-endian `f32` bytes. Trailing partial values are ignored.
pub fn f32_from_le_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Decode little-endian `f64` bytes, narrowing each value to `f32`.
pub fn f64_le_bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(8)
        .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32)
        .collect()
}

// ============ Hash Embedder ============

/// Default dimensionality of [`HashEmbedder`].
pub const DEFAULT_HASH_DIMS: usize = 384;

/// Deterministic bag-of-words embedder using signed FNV-1a feature hashing.
///
/// Each lowercased alphanumeric token adds ±1 to bucket `hash % dims`, the
/// sign taken from the hash's top bit. Texts with the same token multiset
/// get the same vector. No model, no network: meant for tests, smoke runs,
/// and air-gapped setups where lexical overlap is a good enough signal.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    model: String,
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            model: format!("hash-fnv1a-{}", dims),
            dims,
        }
    }

    /// Embed one text synchronously.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        if self.dims == 0 {
            return v;
        }
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = fnv1a(&token.to_lowercase());
            let bucket = (h % self.dims as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        v
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIMS)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn fnv1a(s: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut h = OFFSET;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(PRIME);
    }
    h
}
