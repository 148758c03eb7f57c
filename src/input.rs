//! JSONL reader for extracted pages.
//!
//! One `{"url": .., "title": .., "text": ..}` object per line. Blank lines
//! are skipped, unknown fields ignored, and a missing or `null` title
//! becomes the empty string.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ragx_core::models::SourceRecord;

#[derive(Deserialize)]
struct InputLine {
    url: String,
    #[serde(default)]
    title: Option<String>,
    text: String,
}

/// Read every record from a JSONL file.
pub fn read_records(path: &Path) -> Result<Vec<SourceRecord>> {
    if !path.exists() {
        bail!("input file not found: {}", path.display());
    }
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open input file: {}", path.display()))?;
    parse_records(BufReader::new(file), path)
}

fn parse_records(reader: impl BufRead, path: &Path) -> Result<Vec<SourceRecord>> {
    let mut records = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line_no = i + 1;
        let line =
            line.with_context(|| format!("failed to read {}:{}", path.display(), line_no))?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: InputLine = serde_json::from_str(&line)
            .with_context(|| format!("malformed record at {}:{}", path.display(), line_no))?;
        records.push(SourceRecord {
            url: parsed.url,
            title: parsed.title.unwrap_or_default(),
            text: parsed.text,
        });
    }
    Ok(records)
}
