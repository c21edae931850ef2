//! Pageflow Ingest - paginated API ingestion tool

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use pageflow_common::logging::{init_logging, LogConfig, LogLevel};
use pageflow_ingest::{
    auth::{Authenticator, StaticAuthenticator, TokenAuthenticator},
    config::{AuthSettings, IngestConfig, FILE_TIMESTAMP_FORMAT},
    cursor::PaginationMode,
    fetcher::PageFetcher,
    observer::{Observer, TracingObserver},
    pipeline::{IngestionPipeline, PipelineOptions},
    sink::OutputFormat,
    storage::{BlobStore, LocalBlobStore, S3BlobStore},
    transport::HttpTransport,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "pageflow-ingest")]
#[command(author, version, about = "Resilient paginated API ingestion")]
struct Cli {
    /// Paginated endpoint to ingest (overrides API_URL)
    #[arg(long)]
    api_url: Option<String>,

    /// Records requested per page
    #[arg(long)]
    page_size: Option<u32>,

    /// Stop after this many pages
    #[arg(long)]
    max_pages: Option<u64>,

    /// Pagination style: offset or token
    #[arg(long)]
    pagination: Option<PaginationMode>,

    /// Output format: csv or jsonl
    #[arg(short, long)]
    format: Option<OutputFormat>,

    /// Directory for the artifact and report
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Keep the artifact local; skip the upload step
    #[arg(long, env = "NO_UPLOAD")]
    no_upload: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut IngestConfig) {
        if let Some(url) = &self.api_url {
            config.api.url = url.clone();
        }
        if let Some(page_size) = self.page_size {
            config.api.page_size = page_size;
        }
        if let Some(max_pages) = self.max_pages {
            config.api.max_pages = Some(max_pages);
        }
        if let Some(mode) = self.pagination {
            config.api.mode = mode;
        }
        if let Some(format) = self.format {
            config.output.format = format;
        }
        if let Some(dir) = &self.output_dir {
            config.output.dir = dir.clone();
        }
        if self.no_upload {
            config.storage = None;
            config.local_store_dir = None;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("pageflow-ingest")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    let mut config = IngestConfig::from_env()?;
    cli.apply(&mut config);
    config.validate()?;
    info!(?config, "Configuration loaded");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing current step and aborting");
            trigger.cancel();
        }
    });

    let timestamp = Utc::now().format(FILE_TIMESTAMP_FORMAT).to_string();
    let target = config.output.sink_target(&timestamp);
    let options = PipelineOptions {
        destination_prefix: config.destination_prefix().to_string(),
        report_path: Some(config.output.report_path(&timestamp)),
        max_page_records: config.api.max_page_records,
        upload_on_abort: config.upload_on_abort,
    };

    let mut pipeline = build_pipeline(&config, options).await?;
    let sink = target.open()?;

    match pipeline.run(sink, &cancel).await {
        Ok(summary) => {
            println!("{}", summary.report.render());
            info!(
                artifact = %summary.artifact.path.display(),
                remote = ?summary.remote_uri,
                records = summary.report.records_ingested,
                failed_pages = summary.report.failed_pages,
                "Ingestion complete"
            );
            Ok(())
        },
        Err(e) => {
            if let Some(report) = e.report() {
                eprintln!("{}", report.render());
            }
            error!(error = %e, "Ingestion did not complete");
            Err(e.into())
        },
    }
}

async fn build_pipeline(
    config: &IngestConfig,
    options: PipelineOptions,
) -> pageflow_ingest::Result<IngestionPipeline> {
    let observer: Arc<dyn Observer> = Arc::new(TracingObserver);

    let auth: Arc<dyn Authenticator> = match &config.api.auth {
        AuthSettings::Token {
            url,
            username,
            password,
        } => Arc::new(TokenAuthenticator::new(
            url.as_str(),
            username.as_str(),
            password.as_str(),
            config.request_timeout(),
        )?),
        AuthSettings::Static { token } => Arc::new(StaticAuthenticator::bearer(token)),
    };

    let transport = Arc::new(HttpTransport::new(
        config.api.url.as_str(),
        config.request_timeout(),
    )?);

    let fetcher = PageFetcher::new(transport, auth, config.retry.policy(), observer.clone());
    let pipeline = IngestionPipeline::new(fetcher, config.cursor(), observer, options);

    let store: Option<Arc<dyn BlobStore>> = match (&config.local_store_dir, &config.storage) {
        (Some(dir), _) => {
            info!(dir = %dir.display(), "Artifacts will be copied locally");
            Some(Arc::new(LocalBlobStore::new(dir)))
        },
        (None, Some(storage)) => {
            info!(
                bucket = %storage.bucket,
                static_credentials = storage.has_static_credentials(),
                "Artifacts will be uploaded to S3"
            );
            Some(Arc::new(S3BlobStore::new(storage.clone()).await?))
        },
        (None, None) => {
            info!("No upload destination configured; artifact stays local");
            None
        },
    };

    Ok(match store {
        Some(store) => pipeline.with_blob_store(store),
        None => pipeline,
    })
}
