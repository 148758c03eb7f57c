//! # ragx
//!
//! Build and query nearest-neighbor indexes over crawled documentation pages.
//!
//! `ragx` turns extracted pages (`{url, title, text}` JSONL) into word-window
//! chunks, drops short and duplicate chunks, embeds the rest, and persists a
//! positionally aligned vector matrix plus metadata. Queries embed the
//! question with the same model and return the top-k chunks by cosine
//! similarity.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────┐   ┌──────────────────┐
//! │ pages.jsonl│──▶│ chunk → dedup →  │──▶│ meta.jsonl       │
//! │ (input)    │   │ embed → normalize│   │ embeddings.npy   │
//! └────────────┘   └──────────────────┘   │ info.json        │
//!                                         └────────┬─────────┘
//!                                                  │
//!                                                  ▼
//!                                         ┌──────────────────┐
//!                                         │ ragx query       │
//!                                         │ flat │ ivf       │
//!                                         └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragx build --in pages.jsonl --out-dir ./index --provider hash
//! ragx query --index-dir ./index --query "what does the starter plan cost?"
//! ragx info --index-dir ./index
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`embedding`] | Embedding providers (OpenAI, Ollama, local, hash) |
//! | [`input`] | JSONL page reader |
//! | [`npy`] | NumPy `.npy` matrix codec |
//! | [`index_store`] | Index directory persistence |
//! | [`build_cmd`] | `ragx build` |
//! | [`query_cmd`] | `ragx query` and `ragx info` |
//! | [`progress`] | Build progress on stderr |
//! | [`logging`] | `tracing` subscriber setup |
//!
//! Chunking, deduplication, index assembly, and search live in
//! [`ragx_core`].

pub mod build_cmd;
pub mod config;
pub mod embedding;
pub mod index_store;
pub mod input;
pub mod logging;
pub mod npy;
pub mod progress;
pub mod query_cmd;

pub use ragx_core;
