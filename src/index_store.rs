//! On-disk index directory: `meta.jsonl`, `embeddings.npy`, `info.json`.
//!
//! Row `i` of `embeddings.npy` is the vector of line `i` of `meta.jsonl`.
//! Writes are staged in a hidden sibling directory and swapped into place
//! by rename while an exclusive lock on `<parent>/.<name>.lock` is held, so
//! readers see either the previous index or the new one, never a mix.
//! An existing directory is only replaced when it is empty or holds nothing
//! but index files.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use ragx_core::index::Index;
use ragx_core::models::{Chunk, IndexInfo};
use ragx_core::IndexError;

use crate::npy;

pub const META_FILE: &str = "meta.jsonl";
pub const EMBEDDINGS_FILE: &str = "embeddings.npy";
pub const INFO_FILE: &str = "info.json";

const INDEX_FILES: [&str; 3] = [META_FILE, EMBEDDINGS_FILE, INFO_FILE];

/// A loaded index plus its diagnostics record, when one was written.
#[derive(Debug)]
pub struct LoadedIndex {
    pub index: Index,
    pub info: Option<IndexInfo>,
}

/// Persist `index` and `info` to `dir`, replacing any index already there.
pub fn write_index(dir: &Path, index: &Index, info: &IndexInfo) -> Result<()> {
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("invalid output directory: {}", dir.display()))?
        .to_string();
    let parent = match dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;

    let lock_path = parent.join(format!(".{}.lock", name));
    let lock = File::create(&lock_path)
        .with_context(|| format!("failed to open lock file {}", lock_path.display()))?;
    if lock.try_lock_exclusive().is_err() {
        bail!(
            "another build is writing {} (lock held on {})",
            dir.display(),
            lock_path.display()
        );
    }

    ensure_replaceable(dir)?;

    let staging = tempfile::Builder::new()
        .prefix(&format!(".{}.staging-", name))
        .tempdir_in(&parent)
        .with_context(|| format!("failed to create staging directory in {}", parent.display()))?;
    tracing::debug!(staging = %staging.path().display(), "writing index files");

    write_meta(&staging.path().join(META_FILE), index.chunks())?;
    write_file(
        &staging.path().join(EMBEDDINGS_FILE),
        &npy::encode(index.vectors()),
    )?;
    let info_json = serde_json::to_vec_pretty(info).context("failed to serialize info.json")?;
    write_file(&staging.path().join(INFO_FILE), &info_json)?;

    swap_into_place(staging.path(), dir)?;
    // staging's own cleanup now targets a path that no longer exists.
    drop(staging);

    fs2::FileExt::unlock(&lock).ok();
    Ok(())
}

/// Fail unless `dir` is absent, empty, or holds only index files.
///
/// `write_index` replaces the whole directory, so anything else in it
/// would be lost.
pub fn ensure_replaceable(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    if !dir.is_dir() {
        bail!("output path {} exists and is not a directory", dir.display());
    }
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        let name = entry.file_name();
        let known = name
            .to_str()
            .map(|n| INDEX_FILES.contains(&n))
            .unwrap_or(false);
        if !known || !entry.path().is_file() {
            bail!(
                "refusing to replace {}: it contains {}, which is not an index file",
                dir.display(),
                name.to_string_lossy()
            );
        }
    }
    Ok(())
}

fn write_meta(path: &Path, chunks: &[Chunk]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut w = BufWriter::new(file);
    for chunk in chunks {
        serde_json::to_writer(&mut w, chunk)
            .with_context(|| format!("failed to write {}", path.display()))?;
        w.write_all(b"\n")?;
    }
    let file = w
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush {}: {}", path.display(), e.error()))?;
    file.sync_all()?;
    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    file.sync_all()?;
    Ok(())
}

fn swap_into_place(staging: &Path, dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::rename(staging, dir)
            .with_context(|| format!("failed to move index into {}", dir.display()))?;
        return Ok(());
    }

    let backup = dir.with_file_name(format!(
        ".{}.old-{}",
        dir.file_name().and_then(|n| n.to_str()).unwrap_or("index"),
        std::process::id()
    ));
    fs::rename(dir, &backup)
        .with_context(|| format!("failed to move previous index {} aside", dir.display()))?;
    if let Err(e) = fs::rename(staging, dir) {
        fs::rename(&backup, dir).ok();
        return Err(e).with_context(|| format!("failed to move index into {}", dir.display()));
    }
    if let Err(e) = fs::remove_dir_all(&backup) {
        tracing::warn!(path = %backup.display(), error = %e, "could not remove previous index");
    }
    Ok(())
}

/// Load an index directory and check that its files agree with each other.
///
/// # Errors
///
/// - [`IndexError::IndexNotFound`] if `meta.jsonl` or `embeddings.npy` is
///   absent. The path is the directory when both are, else the missing file.
/// - [`IndexError::IndexCorrupt`] if a file is unparsable, or the row
///   count, metadata count, and `info.json` disagree.
pub fn read_index(dir: &Path) -> Result<LoadedIndex, IndexError> {
    let meta_path = dir.join(META_FILE);
    let npy_path = dir.join(EMBEDDINGS_FILE);
    let info_path = dir.join(INFO_FILE);

    match (meta_path.is_file(), npy_path.is_file()) {
        (true, true) => {}
        (false, false) => return Err(IndexError::IndexNotFound(dir.to_path_buf())),
        (false, true) => return Err(IndexError::IndexNotFound(meta_path)),
        (true, false) => return Err(IndexError::IndexNotFound(npy_path)),
    }

    let chunks = read_meta(&meta_path)?;
    let bytes = fs::read(&npy_path).map_err(|e| IndexError::io(&npy_path, e))?;
    let vectors = npy::decode(&bytes)?;

    let info = if info_path.is_file() {
        let raw = fs::read(&info_path).map_err(|e| IndexError::io(&info_path, e))?;
        let info: IndexInfo = serde_json::from_slice(&raw)
            .map_err(|e| IndexError::IndexCorrupt(format!("{}: {}", INFO_FILE, e)))?;
        Some(info)
    } else {
        tracing::debug!(dir = %dir.display(), "index has no info.json");
        None
    };

    let index = Index::new(vectors, chunks)?;

    if let Some(info) = &info {
        if info.num_chunks != index.len() || info.dim != index.dim() {
            return Err(IndexError::IndexCorrupt(format!(
                "{} records {} chunks of dim {}, files hold {} chunks of dim {}",
                INFO_FILE,
                info.num_chunks,
                info.dim,
                index.len(),
                index.dim()
            )));
        }
    }

    Ok(LoadedIndex { index, info })
}

fn read_meta(path: &Path) -> Result<Vec<Chunk>, IndexError> {
    let file = File::open(path).map_err(|e| IndexError::io(path, e))?;
    let mut chunks = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| IndexError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let chunk: Chunk = serde_json::from_str(&line).map_err(|e| {
            IndexError::IndexCorrupt(format!("{} line {}: {}", META_FILE, i + 1, e))
        })?;
        chunks.push(chunk);
    }
    Ok(chunks)
}
