//! # ragx CLI
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragx build` | Chunk, deduplicate, and embed a JSONL corpus into an index directory |
//! | `ragx query` | Print the top-k chunks for a question |
//! | `ragx info` | Show an index's diagnostics and verify its files agree |
//!
//! ## Examples
//!
//! ```bash
//! # Offline build with the hashing embedder
//! ragx build --in data/pages.jsonl --out-dir data/index --provider hash
//!
//! # Local model (needs --features local-embeddings-fastembed)
//! ragx build --in data/pages.jsonl --out-dir data/index --model all-minilm-l6-v2
//!
//! # Query, machine-readable
//! ragx query --index-dir data/index --query "starter plan price" --k 3 --json
//! ```
//!
//! Errors print as a single `error: ...` line on stderr and exit with status 1.

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use ragx::config::{self, Config};
use ragx::progress::ProgressMode;
use ragx::{build_cmd, logging, query_cmd};

/// ragx: nearest-neighbor retrieval over crawled documentation.
#[derive(Parser)]
#[command(
    name = "ragx",
    about = "Build and query nearest-neighbor indexes over crawled documentation pages",
    version
)]
struct Cli {
    /// Path to a TOML configuration file. Optional; flags override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug). `RAGX_LOG` takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an index directory from a JSONL file of pages.
    ///
    /// Each input line is `{"url": .., "title": .., "text": ..}`. Writes
    /// `meta.jsonl`, `embeddings.npy`, and `info.json` into `--out-dir`,
    /// replacing any index already there.
    Build {
        /// Input JSONL file.
        #[arg(long = "in")]
        input: PathBuf,

        /// Output index directory.
        #[arg(long)]
        out_dir: PathBuf,

        /// Words per chunk [default: 800].
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Words shared by consecutive chunks [default: 120].
        #[arg(long)]
        chunk_overlap: Option<usize>,

        /// Minimum chunk length in characters [default: 30].
        #[arg(long)]
        min_chunk_len: Option<usize>,

        /// Embedding model name.
        #[arg(long)]
        model: Option<String>,

        /// Embedding provider: local, openai, ollama, or hash.
        #[arg(long)]
        provider: Option<String>,

        /// Texts per embedding call [default: 64].
        #[arg(long)]
        batch_size: Option<usize>,

        /// Report chunk counts without embedding or writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Progress on stderr [default: human when stderr is a terminal, else off].
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Query an index and print the most similar chunks.
    Query {
        /// Index directory written by `ragx build`.
        #[arg(long)]
        index_dir: PathBuf,

        /// Question text.
        #[arg(long)]
        query: String,

        /// Number of results [default: 5].
        #[arg(long)]
        k: Option<usize>,

        /// Embedding model name (defaults to the one recorded in info.json).
        #[arg(long)]
        model: Option<String>,

        /// Embedding provider (defaults to the one recorded in info.json).
        #[arg(long)]
        provider: Option<String>,

        /// Search strategy: flat (exact) or ivf (approximate) [default: flat].
        #[arg(long)]
        search: Option<String>,

        /// IVF lists to probe [default: 8].
        #[arg(long)]
        nprobe: Option<usize>,

        /// Emit results as a JSON array instead of text blocks.
        #[arg(long)]
        json: bool,

        /// Preview length in characters [default: 500].
        #[arg(long)]
        preview_chars: Option<usize>,
    },

    /// Print an index's info record after checking its files agree.
    Info {
        /// Index directory written by `ragx build`.
        #[arg(long)]
        index_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Build {
            input,
            out_dir,
            chunk_size,
            chunk_overlap,
            min_chunk_len,
            model,
            provider,
            batch_size,
            dry_run,
            progress,
        } => {
            override_opt(&mut cfg.chunking.chunk_size, chunk_size);
            override_opt(&mut cfg.chunking.overlap, chunk_overlap);
            override_opt(&mut cfg.chunking.min_chunk_len, min_chunk_len);
            override_opt(&mut cfg.embedding.batch_size, batch_size);
            if provider.is_some() {
                cfg.embedding.provider = provider;
            }
            if model.is_some() {
                cfg.embedding.model = model;
            }
            cfg.validate()?;

            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            build_cmd::run_build(&cfg, &input, &out_dir, dry_run, progress).await?;
        }
        Commands::Query {
            index_dir,
            query,
            k,
            model,
            provider,
            search,
            nprobe,
            json,
            preview_chars,
        } => {
            override_opt(&mut cfg.retrieval.k, k);
            override_opt(&mut cfg.retrieval.search, search);
            override_opt(&mut cfg.retrieval.nprobe, nprobe);
            override_opt(&mut cfg.retrieval.preview_chars, preview_chars);
            if provider.is_some() {
                cfg.embedding.provider = provider;
            }
            if model.is_some() {
                cfg.embedding.model = model;
            }
            cfg.validate()?;

            let k = cfg.retrieval.k;
            query_cmd::run_query(&cfg, &index_dir, &query, k, json).await?;
        }
        Commands::Info { index_dir } => {
            query_cmd::run_info(&index_dir)?;
        }
    }

    Ok(())
}

fn override_opt<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}
