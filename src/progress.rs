//! Build progress reporting.
//!
//! Reports what `ragx build` is doing (reading input, chunking, embedding,
//! writing) so long runs are observable. Progress is emitted on **stderr**
//! so stdout remains parseable for scripts.

use std::io::Write;

use ragx_core::index::{BuildEvent, BuildReporter};

/// A single progress event for a build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Input file parsed.
    Reading { records: usize },
    /// `n` of `total` records chunked and filtered.
    Chunking { n: usize, total: usize },
    /// `n` of `total` chunks embedded.
    Embedding { n: usize, total: usize },
    /// Index files being written to `dir`.
    Writing { dir: String, chunks: usize },
}

impl From<BuildEvent> for ProgressEvent {
    fn from(event: BuildEvent) -> Self {
        match event {
            BuildEvent::Chunking { n, total } => ProgressEvent::Chunking { n, total },
            BuildEvent::Embedding { n, total } => ProgressEvent::Embedding { n, total },
        }
    }
}

/// Reports build progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Forwards [`IndexBuilder`](ragx_core::index::IndexBuilder) events to a
/// [`ProgressReporter`].
pub struct Forward<'a>(pub &'a dyn ProgressReporter);

impl BuildReporter for Forward<'_> {
    fn report(&self, event: BuildEvent) {
        self.0.report(event.into());
    }
}

/// Human-friendly progress on stderr: "build  embedding  1,024 / 5,000 chunks".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = human_line(&event);
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

fn human_line(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::Reading { records } => {
            format!("build  reading  {} records\n", format_number(*records))
        }
        ProgressEvent::Chunking { n, total } => format!(
            "build  chunking  {} / {} records\n",
            format_number(*n),
            format_number(*total)
        ),
        ProgressEvent::Embedding { n, total } => format!(
            "build  embedding  {} / {} chunks\n",
            format_number(*n),
            format_number(*total)
        ),
        ProgressEvent::Writing { dir, chunks } => format!(
            "build  writing  {} chunks to {}\n",
            format_number(*chunks),
            dir
        ),
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(line) = serde_json::to_string(&json_event(&event)) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

fn json_event(event: &ProgressEvent) -> serde_json::Value {
    match event {
        ProgressEvent::Reading { records } => serde_json::json!({
            "event": "progress",
            "phase": "reading",
            "records": records
        }),
        ProgressEvent::Chunking { n, total } => serde_json::json!({
            "event": "progress",
            "phase": "chunking",
            "n": n,
            "total": total
        }),
        ProgressEvent::Embedding { n, total } => serde_json::json!({
            "event": "progress",
            "phase": "embedding",
            "n": n,
            "total": total
        }),
        ProgressEvent::Writing { dir, chunks } => serde_json::json!({
            "event": "progress",
            "phase": "writing",
            "dir": dir,
            "chunks": chunks
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
