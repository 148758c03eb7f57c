//! # ragx core
//!
//! Pure indexing and retrieval logic for ragx: data models, word-window
//! chunking, chunk deduplication, the embedding trait and vector helpers,
//! index construction, and exact/approximate top-k search.
//!
//! This crate does no filesystem or network I/O. Persistence, embedding
//! backends, configuration, and the CLI live in the `ragx` app crate.
//!
//! ```text
//! SourceRecord ──▶ chunk ──▶ dedup ──▶ Embedder ──▶ IndexBuilder ──▶ Index
//!                                                                   │
//!              query text ──▶ Embedder ──▶ Retriever ◀──────────────┘
//! ```

pub mod chunk;
pub mod dedup;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod retriever;
pub mod search;

pub use error::IndexError;
