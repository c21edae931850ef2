//! JSON Lines sink: one raw object per line, keys in received order

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{Artifact, CountingWriter, OutputFormat, SinkError, StreamSink};
use crate::page::Record;

pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<CountingWriter<File>>,
    records_written: u64,
}

impl JsonLinesSink {
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(CountingWriter::new(file)),
            records_written: 0,
        })
    }
}

impl StreamSink for JsonLinesSink {
    fn append(&mut self, records: &[Record]) -> Result<u64, SinkError> {
        // Serialize the whole page first so a bad record leaves the file untouched
        let mut page = Vec::new();
        for record in records {
            serde_json::to_writer(&mut page, record)?;
            page.push(b'\n');
        }

        self.writer.write_all(&page)?;
        self.writer.flush()?;
        self.records_written += records.len() as u64;
        Ok(page.len() as u64)
    }

    fn close(mut self: Box<Self>) -> Result<Artifact, SinkError> {
        self.writer.flush()?;
        let counting = self.writer.get_ref();
        counting.get_ref().sync_all()?;

        Ok(Artifact {
            path: self.path.clone(),
            format: OutputFormat::JsonLines,
            bytes_written: counting.count(),
            records_written: self.records_written,
            sha256: None,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn format(&self) -> OutputFormat {
        OutputFormat::JsonLines
    }
}
