//! CSV sink with a discovered header
//!
//! The header is fixed by the first page that carries any field: the sorted
//! union of that page's keys. Later pages may omit columns (written as the
//! missing-value placeholder) but may not add new ones. Records with no fields
//! that arrive before the header is known are held as a count and written as
//! placeholder rows once it is.

use serde_json::Value;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{Artifact, CountingWriter, OutputFormat, SinkError, StreamSink};
use crate::page::Record;

pub struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<CountingWriter<File>>,
    schema: Option<Vec<String>>,
    missing_value: String,
    records_written: u64,
    pending_empty: u64,
}

impl CsvSink {
    pub fn create(path: &Path, missing_value: &str) -> Result<Self, SinkError> {
        let file = File::create(path)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(CountingWriter::new(file));

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            schema: None,
            missing_value: missing_value.to_string(),
            records_written: 0,
            pending_empty: 0,
        })
    }

    /// Columns established so far, if any page has been written
    pub fn schema(&self) -> Option<&[String]> {
        self.schema.as_deref()
    }

    fn page_fields(records: &[Record]) -> BTreeSet<&str> {
        records
            .iter()
            .flat_map(|record| record.keys().map(String::as_str))
            .collect()
    }

    fn cell(&self, value: Option<&Value>) -> String {
        match value {
            None => self.missing_value.clone(),
            Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

impl StreamSink for CsvSink {
    fn append(&mut self, records: &[Record]) -> Result<u64, SinkError> {
        if records.is_empty() {
            return Ok(0);
        }

        let fields = Self::page_fields(records);
        if self.schema.is_none() && fields.is_empty() {
            self.pending_empty += records.len() as u64;
            debug!(
                pending = self.pending_empty,
                "field-less records held until header is known"
            );
            return Ok(0);
        }

        let before = self.writer.get_ref().count();

        let schema = match self.schema.take() {
            Some(schema) => {
                let unexpected: Vec<String> = fields
                    .iter()
                    .filter(|field| !schema.iter().any(|col| col == *field))
                    .map(|field| field.to_string())
                    .collect();
                if !unexpected.is_empty() {
                    self.schema = Some(schema);
                    return Err(SinkError::ShapeMismatch { unexpected });
                }
                schema
            },
            None => {
                let schema: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
                debug!(columns = schema.len(), "csv header discovered");
                self.writer.write_record(&schema)?;

                let placeholder = vec![self.missing_value.as_str(); schema.len()];
                for _ in 0..self.pending_empty {
                    self.writer.write_record(&placeholder)?;
                }
                self.records_written += self.pending_empty;
                self.pending_empty = 0;
                schema
            },
        };

        for record in records {
            let row: Vec<String> = schema.iter().map(|col| self.cell(record.get(col))).collect();
            self.writer.write_record(&row)?;
        }
        self.schema = Some(schema);
        self.writer.flush()?;

        self.records_written += records.len() as u64;
        Ok(self.writer.get_ref().count() - before)
    }

    fn close(self: Box<Self>) -> Result<Artifact, SinkError> {
        let CsvSink {
            path,
            writer,
            records_written,
            pending_empty,
            ..
        } = *self;

        if pending_empty > 0 {
            warn!(
                records = pending_empty,
                "no field ever appeared; field-less records have no CSV representation"
            );
        }

        let counting = writer.into_inner().map_err(|e| SinkError::Io(e.into_error()))?;
        counting.get_ref().sync_all()?;

        Ok(Artifact {
            path,
            format: OutputFormat::Csv,
            bytes_written: counting.count(),
            records_written,
            sha256: None,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn format(&self) -> OutputFormat {
        OutputFormat::Csv
    }
}
