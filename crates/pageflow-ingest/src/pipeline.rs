//! Run orchestration
//!
//! [`IngestionPipeline`] walks the cursor, resolves each page through the
//! fetcher and streams successful pages into the sink. Both terminal states
//! go through the same tail: close the sink, finalize the report, upload the
//! artifact, write the report out.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use pageflow_common::checksum::sha256_file;

use crate::cursor::{DoneReason, NextPage, PageRequest, PaginationCursor};
use crate::fetcher::PageFetcher;
use crate::observer::{Observer, PageResolution, TerminalReason};
use crate::page::{FailureKind, PageResult};
use crate::sink::{Artifact, SinkError, StreamSink};
use crate::stats::{ExecutionReport, ReportOutcome, RunStats};
use crate::storage::{destination_key, BlobStore, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Completed,
    Aborted,
}

/// Why a run stopped before the cursor was done
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// A non-retryable failure on `page`
    Fatal {
        page: u64,
        status: Option<u16>,
        message: String,
    },
    /// Cancellation observed; `page` is the one in flight or about to start
    Cancelled { page: u64 },
    /// The sink could not write or close the artifact
    Sink { page: Option<u64>, message: String },
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::Fatal {
                page,
                status: Some(status),
                message,
            } => write!(f, "fatal HTTP {} on page {}: {}", status, page, message),
            AbortReason::Fatal { page, message, .. } => {
                write!(f, "fatal error on page {}: {}", page, message)
            },
            AbortReason::Cancelled { page } => write!(f, "cancelled at page {}", page),
            AbortReason::Sink {
                page: Some(page),
                message,
            } => write!(f, "sink failure on page {}: {}", page, message),
            AbortReason::Sink { page: None, message } => write!(f, "sink failure: {}", message),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("run aborted: {reason}")]
    Aborted {
        reason: AbortReason,
        report: Box<ExecutionReport>,
        remote_uri: Option<String>,
    },

    #[error("artifact upload failed: {source}")]
    Upload {
        #[source]
        source: StorageError,
        report: Box<ExecutionReport>,
    },

    #[error("failed to write report to {path}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
        report: Box<ExecutionReport>,
    },

    #[error("pipeline already ran")]
    AlreadyRan,
}

impl PipelineError {
    /// The partial or final report, when the run got far enough to build one
    pub fn report(&self) -> Option<&ExecutionReport> {
        match self {
            PipelineError::Aborted { report, .. }
            | PipelineError::Upload { report, .. }
            | PipelineError::Report { report, .. } => Some(report),
            PipelineError::AlreadyRan => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Key prefix handed to [`destination_key`]
    pub destination_prefix: String,
    /// Where to write the rendered report, if anywhere
    pub report_path: Option<PathBuf>,
    /// Pages above this many records are rejected as shape failures
    pub max_page_records: Option<usize>,
    /// Also upload the partial artifact of an aborted run
    pub upload_on_abort: bool,
}

/// What a completed run hands back
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub artifact: Artifact,
    pub destination_key: Option<String>,
    pub remote_uri: Option<String>,
    pub report: ExecutionReport,
}

pub struct IngestionPipeline {
    fetcher: PageFetcher,
    cursor: PaginationCursor,
    observer: Arc<dyn Observer>,
    blob_store: Option<Arc<dyn BlobStore>>,
    options: PipelineOptions,
    state: PipelineState,
}

impl IngestionPipeline {
    pub fn new(
        fetcher: PageFetcher,
        cursor: PaginationCursor,
        observer: Arc<dyn Observer>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            fetcher,
            cursor,
            observer,
            blob_store: None,
            options,
            state: PipelineState::Idle,
        }
    }

    pub fn with_blob_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(store);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Drive one run into `sink`. A pipeline runs at most once.
    pub async fn run(
        &mut self,
        mut sink: Box<dyn StreamSink>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        if self.state != PipelineState::Idle {
            return Err(PipelineError::AlreadyRan);
        }
        self.state = PipelineState::Running;

        let mut stats = RunStats::start();
        let mut warnings = Vec::new();
        let artifact_path = sink.path().to_path_buf();
        let format = sink.format();

        info!(
            output = %artifact_path.display(),
            format = %format,
            page_size = self.cursor.page_size(),
            "Starting ingestion run"
        );

        let mut abort = self
            .drive(sink.as_mut(), &mut stats, &mut warnings, cancel)
            .await;

        let artifact = match sink.close() {
            Ok(mut artifact) => {
                match sha256_file(&artifact.path) {
                    Ok(digest) => artifact.sha256 = Some(digest),
                    Err(e) => warn!(error = %e, "Could not checksum artifact"),
                }
                Some(artifact)
            },
            Err(e) => {
                error!(error = %e, "Failed to close sink");
                if abort.is_none() {
                    abort = Some(AbortReason::Sink {
                        page: None,
                        message: e.to_string(),
                    });
                }
                None
            },
        };

        let outcome = match &abort {
            Some(reason) => ReportOutcome::Aborted {
                reason: reason.to_string(),
            },
            None => ReportOutcome::Completed,
        };
        let mut report = ExecutionReport::finalize(
            stats,
            &artifact_path,
            artifact.as_ref(),
            format,
            outcome,
            warnings,
        );

        // Upload time is excluded from the report's end_time
        let mut key = None;
        let mut remote_uri = None;
        let mut upload_error = None;
        if let (Some(store), Some(artifact)) = (&self.blob_store, &artifact) {
            if abort.is_none() || self.options.upload_on_abort {
                let destination = destination_key(
                    &self.options.destination_prefix,
                    report.start_time,
                    artifact.format.extension(),
                );
                match store.upload(&artifact.path, &destination).await {
                    Ok(uri) => {
                        info!(%uri, "Artifact uploaded");
                        remote_uri = Some(uri);
                    },
                    Err(e) => {
                        error!(error = %e, key = %destination, "Artifact upload failed");
                        report.warnings.push(format!("upload failed: {}", e));
                        upload_error = Some(e);
                    },
                }
                key = Some(destination);
            }
        }

        let report_error = match &self.options.report_path {
            Some(path) => match report.write_to(path) {
                Ok(()) => {
                    info!(path = %path.display(), "Execution report written");
                    None
                },
                Err(e) => {
                    error!(error = %e, path = %path.display(), "Failed to write report");
                    Some((path.clone(), e))
                },
            },
            None => None,
        };

        let terminal = match &abort {
            Some(reason) => TerminalReason::Aborted {
                detail: reason.to_string(),
            },
            None => TerminalReason::Completed {
                detail: format!(
                    "{} records in {} pages ({} failed)",
                    report.records_ingested, report.pages_requested, report.failed_pages
                ),
            },
        };
        self.observer.run_terminal(&terminal);

        let artifact = match (abort, artifact) {
            (None, Some(artifact)) => artifact,
            (reason, _) => {
                self.state = PipelineState::Aborted;
                return Err(PipelineError::Aborted {
                    reason: reason.unwrap_or_else(|| AbortReason::Sink {
                        page: None,
                        message: "artifact unavailable".to_string(),
                    }),
                    report: Box::new(report),
                    remote_uri,
                });
            },
        };
        self.state = PipelineState::Completed;

        if let Some(source) = upload_error {
            return Err(PipelineError::Upload {
                source,
                report: Box::new(report),
            });
        }
        if let Some((path, source)) = report_error {
            return Err(PipelineError::Report {
                path,
                source,
                report: Box::new(report),
            });
        }

        Ok(RunSummary {
            artifact,
            destination_key: key,
            remote_uri,
            report,
        })
    }

    /// The page loop. Returns the abort reason, or `None` once the cursor is done.
    async fn drive(
        &self,
        sink: &mut dyn StreamSink,
        stats: &mut RunStats,
        warnings: &mut Vec<String>,
        cancel: &CancellationToken,
    ) -> Option<AbortReason> {
        let mut request = self.cursor.initial();

        loop {
            if cancel.is_cancelled() {
                warn!(page = request.sequence, "Cancellation requested, stopping");
                return Some(AbortReason::Cancelled {
                    page: request.sequence,
                });
            }

            stats.record_page_requested();
            let result = self.fetcher.fetch(&request, stats, cancel).await;

            if let Some(reason) = self.resolve(&request, &result, sink, stats) {
                return Some(reason);
            }

            match self.cursor.advance(&request, &result) {
                NextPage::Fetch(next) => request = next,
                NextPage::Done(reason) => {
                    match reason {
                        DoneReason::PageCap { .. } => {
                            warn!(%reason, "Stopping at page cap");
                            warnings.push(reason.to_string());
                        },
                        DoneReason::CursorLost => {
                            warn!(%reason, page = request.sequence, "Remaining pages unreachable");
                            warnings.push(format!("{} (page {})", reason, request.sequence));
                        },
                        DoneReason::Exhausted | DoneReason::NoMorePages => {
                            info!(%reason, pages = request.sequence, "Pagination finished");
                        },
                    }
                    return None;
                },
            }
        }
    }

    /// Account for one resolved page. Returns an abort reason for failures
    /// that end the run.
    fn resolve(
        &self,
        request: &PageRequest,
        result: &PageResult,
        sink: &mut dyn StreamSink,
        stats: &mut RunStats,
    ) -> Option<AbortReason> {
        let page = request.sequence;

        let failure = match result {
            PageResult::Success(data) => {
                return self.ingest(page, &data.records, sink, stats);
            },
            PageResult::Failure(failure) => failure,
        };

        stats.record_page_failure();
        let reason = failure.message.clone();

        match failure.kind {
            FailureKind::Exhausted => {
                self.observer
                    .page_resolved(page, &PageResolution::Failed { reason });
                None
            },
            FailureKind::Fatal => {
                self.observer
                    .page_resolved(page, &PageResolution::Fatal { reason });
                Some(AbortReason::Fatal {
                    page,
                    status: failure.status,
                    message: failure.message.clone(),
                })
            },
            FailureKind::Cancelled => {
                self.observer
                    .page_resolved(page, &PageResolution::Failed { reason });
                Some(AbortReason::Cancelled { page })
            },
        }
    }

    fn ingest(
        &self,
        page: u64,
        records: &[crate::page::Record],
        sink: &mut dyn StreamSink,
        stats: &mut RunStats,
    ) -> Option<AbortReason> {
        if let Some(limit) = self.options.max_page_records {
            if records.len() > limit {
                let err = SinkError::OversizedPage {
                    records: records.len(),
                    limit,
                };
                return self.reject(page, err, stats);
            }
        }

        if records.is_empty() {
            stats.record_page_success(0, 0);
            self.observer.page_resolved(
                page,
                &PageResolution::Ingested {
                    records: 0,
                    bytes: 0,
                },
            );
            return None;
        }

        match sink.append(records) {
            Ok(bytes) => {
                stats.record_page_success(records.len() as u64, bytes);
                self.observer.page_resolved(
                    page,
                    &PageResolution::Ingested {
                        records: records.len(),
                        bytes,
                    },
                );
                None
            },
            Err(e) if e.is_page_local() => self.reject(page, e, stats),
            Err(e) => {
                stats.record_page_failure();
                let message = e.to_string();
                self.observer.page_resolved(
                    page,
                    &PageResolution::Fatal {
                        reason: message.clone(),
                    },
                );
                Some(AbortReason::Sink {
                    page: Some(page),
                    message,
                })
            },
        }
    }

    fn reject(&self, page: u64, err: SinkError, stats: &mut RunStats) -> Option<AbortReason> {
        stats.record_shape_failure();
        self.observer.page_resolved(
            page,
            &PageResolution::ShapeRejected {
                reason: err.to_string(),
            },
        );
        None
    }
}
