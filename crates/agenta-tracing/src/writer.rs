//! JSONL file sink.
//!
//! Supports two modes:
//! - **Session mode**: appends to a single file (e.g. `run/traces.jsonl`)
//! - **Daily rotation**: appends to dated files (e.g. `traces/2026-01-11.jsonl`)
//!
//! Each line holds one dispatched trace: `{"trace": id, "spans": [...]}`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::SinkError;
use crate::id::Id;
use crate::sink::{Ack, TraceSink};
use crate::types::Span;

/// One line of a trace file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub trace: Id,
    pub spans: Vec<Span>,
}

#[derive(Serialize)]
struct TraceRecordRef<'a> {
    trace: &'a Id,
    spans: &'a [Span],
}

/// Where a [`FileSink`] writes.
#[derive(Debug, Clone)]
pub enum FileLayout {
    /// Single file.
    Session(PathBuf),
    /// Directory of `YYYY-MM-DD.jsonl` files.
    Daily(PathBuf),
}

/// Appends traces to JSONL files.
///
/// Thread-safe via internal mutex. As a [`TraceSink`] the write runs on
/// tokio's blocking pool, off the async workers.
pub struct FileSink {
    inner: Arc<FileWriter>,
}

struct FileWriter {
    layout: FileLayout,
    current_file: Mutex<Option<CurrentFile>>,
}

struct CurrentFile {
    /// For daily rotation: the date string. For session mode: "session".
    key: String,
    writer: BufWriter<File>,
}

impl FileSink {
    /// Create a sink, creating the target directory if needed.
    pub fn new(layout: FileLayout) -> Result<Self, SinkError> {
        match &layout {
            FileLayout::Session(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
            }
            FileLayout::Daily(dir) => fs::create_dir_all(dir)?,
        }

        Ok(Self {
            inner: Arc::new(FileWriter {
                layout,
                current_file: Mutex::new(None),
            }),
        })
    }

    pub fn session(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        Self::new(FileLayout::Session(path.into()))
    }

    pub fn daily(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        Self::new(FileLayout::Daily(dir.into()))
    }

    /// Path the next record will be appended to.
    pub fn current_file_path(&self) -> PathBuf {
        match &self.inner.layout {
            FileLayout::Session(path) => path.clone(),
            FileLayout::Daily(dir) => dir.join(format!("{}.jsonl", today())),
        }
    }

    /// Append one record, blocking the calling thread.
    pub fn append(&self, trace_id: &Id, spans: &[Span]) -> Result<(), SinkError> {
        self.inner.append(trace_id, spans)
    }

    /// Read all records from a trace file.
    pub fn read_records(path: &Path) -> Result<Vec<TraceRecord>, SinkError> {
        let content = fs::read_to_string(path)?;
        let records: Result<Vec<TraceRecord>, _> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect();
        Ok(records?)
    }
}

impl FileWriter {
    fn append(&self, trace_id: &Id, spans: &[Span]) -> Result<(), SinkError> {
        let (key, path) = match &self.layout {
            FileLayout::Session(path) => ("session".to_string(), path.clone()),
            FileLayout::Daily(dir) => {
                let today = today();
                let path = dir.join(format!("{}.jsonl", today));
                (today, path)
            }
        };

        let mut guard = self
            .current_file
            .lock()
            .map_err(|_| SinkError::Io(std::io::Error::other("trace file lock poisoned")))?;

        let needs_new_file = match &*guard {
            None => true,
            Some(cf) => cf.key != key,
        };

        if needs_new_file {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            *guard = Some(CurrentFile {
                key,
                writer: BufWriter::new(file),
            });
        }

        if let Some(ref mut cf) = *guard {
            let line = serde_json::to_string(&TraceRecordRef {
                trace: trace_id,
                spans,
            })?;
            writeln!(cf.writer, "{}", line)?;
            cf.writer.flush()?;
        }

        Ok(())
    }
}

#[async_trait]
impl TraceSink for FileSink {
    async fn create_traces(&self, trace_id: &Id, spans: &[Span]) -> Result<Ack, SinkError> {
        let writer = Arc::clone(&self.inner);
        let trace_id = trace_id.clone();
        let spans = spans.to_vec();

        tokio::task::spawn_blocking(move || -> Result<Ack, SinkError> {
            writer.append(&trace_id, &spans)?;
            Ok(Ack {
                accepted: spans.len(),
            })
        })
        .await
        .map_err(|e| SinkError::Io(std::io::Error::other(format!("trace writer task failed: {e}"))))?
    }

    fn name(&self) -> &str {
        "file"
    }
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}
