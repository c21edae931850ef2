//! Pageflow Ingest Library
//!
//! Resilient ingestion of a paginated JSON API into a single streamed
//! artifact.
//!
//! # Components
//!
//! - **Backoff**: failure classification and jittered exponential delays
//! - **Fetcher**: one page at a time, retried through the backoff policy
//! - **Cursor**: offset or continuation-token pagination with a page cap
//! - **Sink**: append-only CSV or JSON Lines output, one page resident
//! - **Pipeline**: the run loop, statistics, execution report and upload
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use pageflow_ingest::{
//!     auth::StaticAuthenticator, backoff::BackoffPolicy, cursor::{PaginationCursor, PaginationMode},
//!     fetcher::PageFetcher, observer::TracingObserver, pipeline::{IngestionPipeline, PipelineOptions},
//!     sink::{OutputFormat, SinkTarget}, transport::HttpTransport,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let observer = Arc::new(TracingObserver);
//!     let fetcher = PageFetcher::new(
//!         Arc::new(HttpTransport::new("https://api.example.com/customers", Duration::from_secs(10))?),
//!         Arc::new(StaticAuthenticator::bearer("token")),
//!         BackoffPolicy::default(),
//!         observer.clone(),
//!     );
//!     let cursor = PaginationCursor::new(PaginationMode::Offset, 1000, None);
//!     let sink = SinkTarget {
//!         path: "./data/customers.csv".into(),
//!         format: OutputFormat::Csv,
//!         missing_value: "N/A".to_string(),
//!     }
//!     .open()?;
//!
//!     let mut pipeline = IngestionPipeline::new(fetcher, cursor, observer, PipelineOptions::default());
//!     let summary = pipeline.run(sink, &CancellationToken::new()).await?;
//!     println!("{}", summary.report.render());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod auth;
pub mod backoff;
pub mod config;
pub mod cursor;
pub mod error;
pub mod fetcher;
pub mod observer;
pub mod page;
pub mod pipeline;
pub mod sink;
pub mod stats;
pub mod storage;
pub mod transport;

pub use error::{IngestError, Result};
pub use pipeline::{IngestionPipeline, PipelineError, PipelineState, RunSummary};
pub use stats::{ExecutionReport, RunStats};
