//! Append-only output sinks
//!
//! A sink receives one page of records per [`StreamSink::append`] call and
//! writes them through to disk before returning, so at most one page is ever
//! resident. Records are written as received; sinks only reject structural
//! problems (an unwritable file or a page that does not fit an established
//! column layout), never content.

pub mod csv;
pub mod jsonl;

use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::page::Record;

pub use self::csv::CsvSink;
pub use self::jsonl::JsonLinesSink;

/// Placeholder the CSV sink writes for a column a record does not carry
pub const DEFAULT_MISSING_VALUE: &str = "N/A";

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("page introduces fields outside the established header: {}", unexpected.join(", "))]
    ShapeMismatch { unexpected: Vec<String> },

    #[error("page has {records} records, above the configured limit of {limit}")]
    OversizedPage { records: usize, limit: usize },
}

impl SinkError {
    /// Whether the failure is confined to the offending page. Anything else
    /// means the artifact itself can no longer be trusted.
    pub fn is_page_local(&self) -> bool {
        matches!(
            self,
            SinkError::ShapeMismatch { .. } | SinkError::OversizedPage { .. }
        )
    }
}

/// Artifact encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    #[serde(rename = "jsonl")]
    JsonLines,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::JsonLines => "jsonl",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            OutputFormat::Csv => "CSV",
            OutputFormat::JsonLines => "JSON Lines",
        }
    }

    pub fn rationale(self) -> &'static str {
        match self {
            OutputFormat::Csv => "Streaming efficiency",
            OutputFormat::JsonLines => "Streaming efficiency, schema-free raw capture",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "jsonl" | "ndjson" | "jsonlines" => Ok(OutputFormat::JsonLines),
            _ => Err(format!("Invalid output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// A closed, fully flushed output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub format: OutputFormat,
    pub bytes_written: u64,
    pub records_written: u64,
    pub sha256: Option<String>,
}

pub trait StreamSink: Send {
    /// Persist one page. Returns the number of bytes written for it.
    /// On error nothing from this page has been written.
    fn append(&mut self, records: &[Record]) -> Result<u64, SinkError>;

    /// Flush to durable storage and hand back the artifact
    fn close(self: Box<Self>) -> Result<Artifact, SinkError>;

    fn path(&self) -> &Path;

    fn format(&self) -> OutputFormat;
}

/// Where and how to open the run's sink
#[derive(Debug, Clone)]
pub struct SinkTarget {
    pub path: PathBuf,
    pub format: OutputFormat,
    pub missing_value: String,
}

impl SinkTarget {
    pub fn open(&self) -> Result<Box<dyn StreamSink>, SinkError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        Ok(match self.format {
            OutputFormat::Csv => Box::new(CsvSink::create(&self.path, &self.missing_value)?),
            OutputFormat::JsonLines => Box::new(JsonLinesSink::create(&self.path)?),
        })
    }
}

/// Write adapter that counts the bytes passing through it
#[derive(Debug)]
pub(crate) struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W> CountingWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    pub(crate) fn get_ref(&self) -> &W {
        &self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.count += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
