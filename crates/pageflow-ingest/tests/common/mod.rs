//! Shared fakes for pipeline integration tests
//!
//! - [`FakeApi`]: an in-memory paginated API with per-page failure scripts
//! - [`InstrumentedSink`]: wraps a real sink and records every append size
//! - [`FailingStore`] / [`SlowStore`]: blob stores that refuse or delay uploads
//! - [`Harness`]: wires both into an [`IngestionPipeline`]

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use pageflow_ingest::{
    auth::StaticAuthenticator,
    backoff::BackoffPolicy,
    cursor::{PagePosition, PageRequest, PaginationCursor, PaginationMode},
    fetcher::PageFetcher,
    observer::RecordingObserver,
    pipeline::{IngestionPipeline, PipelineOptions},
    sink::{Artifact, OutputFormat, SinkError, SinkTarget, StreamSink},
    storage::{BlobStore, StorageError},
    transport::{Transport, TransportError, TransportResponse},
};
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted reply for a page
#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16),
    RateLimited { retry_after_secs: u64 },
    Timeout,
    /// Serve these records instead of the generated ones
    Records(Vec<Value>),
}

/// In-memory offset-paginated API.
///
/// Pages `1..=total_pages` hold `records_per_page` generated records each;
/// the last one carries `has_more: false`. Scripted replies for a page are
/// consumed before the page is served normally.
pub struct FakeApi {
    total_pages: u64,
    records_per_page: usize,
    scripts: Mutex<HashMap<u64, VecDeque<Reply>>>,
    always: Mutex<HashMap<u64, u16>>,
    calls: Mutex<Vec<u64>>,
}

impl FakeApi {
    pub fn new(total_pages: u64, records_per_page: usize) -> Self {
        Self {
            total_pages,
            records_per_page,
            scripts: Mutex::new(HashMap::new()),
            always: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script(self, page: u64, replies: Vec<Reply>) -> Self {
        self.scripts.lock().unwrap().insert(page, replies.into());
        self
    }

    /// Every request for `page` answers with `status`
    pub fn always(self, page: u64, status: u16) -> Self {
        self.always.lock().unwrap().insert(page, status);
        self
    }

    /// Page numbers requested, one entry per attempt
    pub fn calls(&self) -> Vec<u64> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, page: u64) -> usize {
        self.calls().iter().filter(|p| **p == page).count()
    }

    pub fn record(page: u64, index: usize) -> Value {
        json!({ "id": format!("{page}-{index}"), "page": page, "name": format!("customer {index}") })
    }

    fn page_number(request: &PageRequest) -> u64 {
        match &request.position {
            PagePosition::Offset { offset, limit } => offset / u64::from(*limit) + 1,
            PagePosition::Token { token, .. } => token
                .as_deref()
                .and_then(|t| t.parse().ok())
                .unwrap_or(1),
        }
    }

    fn body(&self, page: u64, records: Vec<Value>) -> TransportResponse {
        let has_more = page < self.total_pages;
        let next = has_more.then(|| (page + 1).to_string());
        TransportResponse {
            status: 200,
            headers: HeaderMap::new(),
            body: serde_json::to_vec(&json!({
                "data": records,
                "next": next,
                "has_more": has_more,
            }))
            .unwrap(),
        }
    }

    fn status(code: u16) -> TransportResponse {
        TransportResponse {
            status: code,
            headers: HeaderMap::new(),
            body: br#"{"error":"scripted"}"#.to_vec(),
        }
    }
}

#[async_trait]
impl Transport for FakeApi {
    async fn send(
        &self,
        request: &PageRequest,
        _auth_header: &str,
    ) -> Result<TransportResponse, TransportError> {
        let page = Self::page_number(request);
        self.calls.lock().unwrap().push(page);

        if let Some(status) = self.always.lock().unwrap().get(&page) {
            return Ok(Self::status(*status));
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&page)
            .and_then(VecDeque::pop_front);

        match scripted {
            Some(Reply::Status(code)) => Ok(Self::status(code)),
            Some(Reply::RateLimited { retry_after_secs }) => {
                let mut response = Self::status(429);
                response.headers.insert(
                    RETRY_AFTER,
                    HeaderValue::from_str(&retry_after_secs.to_string()).unwrap(),
                );
                Ok(response)
            },
            Some(Reply::Timeout) => Err(TransportError::Timeout),
            Some(Reply::Records(records)) => Ok(self.body(page, records)),
            None if page > self.total_pages => Ok(self.body(page, Vec::new())),
            None => {
                let records = (0..self.records_per_page)
                    .map(|i| Self::record(page, i))
                    .collect();
                Ok(self.body(page, records))
            },
        }
    }
}

/// Delegating sink that remembers the size of every append
pub struct InstrumentedSink {
    inner: Box<dyn StreamSink>,
    appends: Arc<Mutex<Vec<usize>>>,
}

impl InstrumentedSink {
    pub fn wrap(inner: Box<dyn StreamSink>) -> (Box<dyn StreamSink>, Arc<Mutex<Vec<usize>>>) {
        let appends = Arc::new(Mutex::new(Vec::new()));
        let sink = Box::new(Self {
            inner,
            appends: appends.clone(),
        });
        (sink, appends)
    }
}

impl StreamSink for InstrumentedSink {
    fn append(&mut self, records: &[pageflow_ingest::page::Record]) -> Result<u64, SinkError> {
        self.appends.lock().unwrap().push(records.len());
        self.inner.append(records)
    }

    fn close(self: Box<Self>) -> Result<Artifact, SinkError> {
        self.inner.close()
    }

    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn format(&self) -> OutputFormat {
        self.inner.format()
    }
}

/// Sink whose writes fail after the first page
pub struct FailingSink {
    path: PathBuf,
    appended: usize,
}

impl FailingSink {
    pub fn new(path: PathBuf) -> Box<dyn StreamSink> {
        Box::new(Self { path, appended: 0 })
    }
}

impl StreamSink for FailingSink {
    fn append(&mut self, records: &[pageflow_ingest::page::Record]) -> Result<u64, SinkError> {
        if self.appended > 0 {
            return Err(SinkError::Io(std::io::Error::other("disk full")));
        }
        self.appended += records.len();
        Ok(records.len() as u64)
    }

    fn close(self: Box<Self>) -> Result<Artifact, SinkError> {
        Err(SinkError::Io(std::io::Error::other("disk full")))
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn format(&self) -> OutputFormat {
        OutputFormat::JsonLines
    }
}

/// Blob store whose uploads always fail; counts the attempts
#[derive(Default)]
pub struct FailingStore {
    uploads: Mutex<Vec<String>>,
}

impl FailingStore {
    /// Destination keys that were attempted
    pub fn attempted(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobStore for FailingStore {
    async fn upload(&self, _local: &Path, key: &str) -> Result<String, StorageError> {
        self.uploads.lock().unwrap().push(key.to_string());
        Err(StorageError::Upload {
            key: key.to_string(),
            message: "bucket unreachable".to_string(),
        })
    }
}

/// Blob store that takes `delay` to accept each upload
pub struct SlowStore {
    pub delay: Duration,
}

#[async_trait]
impl BlobStore for SlowStore {
    async fn upload(&self, _local: &Path, key: &str) -> Result<String, StorageError> {
        tokio::time::sleep(self.delay).await;
        Ok(format!("memory://{key}"))
    }
}

pub fn fast_policy() -> BackoffPolicy {
    BackoffPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(2),
        jitter_low: 0.5,
        jitter_high: 1.5,
    }
}

/// A pipeline over a [`FakeApi`] writing into a temp directory
pub struct Harness {
    pub api: Arc<FakeApi>,
    pub observer: Arc<RecordingObserver>,
    pub dir: tempfile::TempDir,
    pub page_size: u32,
    pub max_pages: Option<u64>,
    pub mode: PaginationMode,
    pub options: PipelineOptions,
}

impl Harness {
    pub fn new(api: FakeApi, page_size: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let options = PipelineOptions {
            report_path: Some(dir.path().join("report.txt")),
            ..PipelineOptions::default()
        };
        Self {
            api: Arc::new(api),
            observer: Arc::new(RecordingObserver::new()),
            dir,
            page_size,
            max_pages: None,
            mode: PaginationMode::Offset,
            options,
        }
    }

    pub fn max_pages(mut self, max_pages: u64) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Paginate by continuation token instead of offset
    pub fn token_mode(mut self) -> Self {
        self.mode = PaginationMode::Token;
        self
    }

    pub fn pipeline(&self) -> IngestionPipeline {
        let fetcher = PageFetcher::new(
            self.api.clone(),
            Arc::new(StaticAuthenticator::bearer("test-token")),
            fast_policy(),
            self.observer.clone(),
        );
        let cursor = PaginationCursor::new(self.mode, self.page_size, self.max_pages);
        IngestionPipeline::new(fetcher, cursor, self.observer.clone(), self.options.clone())
    }

    pub fn sink(&self, format: OutputFormat) -> Box<dyn StreamSink> {
        SinkTarget {
            path: self.artifact_path(format),
            format,
            missing_value: "N/A".to_string(),
        }
        .open()
        .unwrap()
    }

    pub fn artifact_path(&self, format: OutputFormat) -> PathBuf {
        self.dir.path().join(format!("out.{}", format.extension()))
    }

    pub fn report_text(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("report.txt")).unwrap()
    }

    /// Lines of the JSON Lines artifact, parsed
    pub fn jsonl_records(&self) -> Vec<Value> {
        std::fs::read_to_string(self.artifact_path(OutputFormat::JsonLines))
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}
