//! Ingestion configuration
//!
//! Everything is read from the environment (a `.env` file is honored) and
//! then selectively overridden by command-line flags.

use anyhow::Context;
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::backoff::{self, BackoffPolicy};
use crate::cursor::{PaginationCursor, PaginationMode, DEFAULT_PAGE_SIZE};
use crate::sink::{OutputFormat, SinkTarget, DEFAULT_MISSING_VALUE};
use crate::storage::StorageConfig;
use crate::transport::DEFAULT_REQUEST_TIMEOUT_SECS;

// ============================================================================
// Defaults
// ============================================================================

/// Default directory for the artifact and report
pub const DEFAULT_OUTPUT_DIR: &str = "./data";

/// Default artifact file stem; the run timestamp and extension are appended
pub const DEFAULT_ARTIFACT_STEM: &str = "unstable_raw";

/// Default report file stem
pub const DEFAULT_REPORT_STEM: &str = "report";

/// Timestamp layout used in generated file names
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// How requests are authorized
#[derive(Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthSettings {
    /// Username/password exchanged for a bearer token at `url`
    Token {
        url: String,
        username: String,
        #[serde(skip_serializing)]
        password: String,
    },
    /// Fixed bearer token
    Static {
        #[serde(skip_serializing)]
        token: String,
    },
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthSettings::Token { url, username, .. } => f
                .debug_struct("Token")
                .field("url", url)
                .field("username", username)
                .field("password", &"***")
                .finish(),
            AuthSettings::Static { .. } => f.debug_struct("Static").field("token", &"***").finish(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiConfig {
    pub url: String,
    pub auth: AuthSettings,
    pub mode: PaginationMode,
    pub page_size: u32,
    pub max_pages: Option<u64>,
    pub request_timeout_secs: u64,
    pub max_page_records: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_low: f64,
    pub jitter_high: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: backoff::DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: backoff::DEFAULT_BASE_DELAY.as_millis() as u64,
            max_delay_ms: backoff::DEFAULT_MAX_DELAY.as_millis() as u64,
            jitter_low: backoff::DEFAULT_JITTER_LOW,
            jitter_high: backoff::DEFAULT_JITTER_HIGH,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_low: self.jitter_low,
            jitter_high: self.jitter_high,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub format: OutputFormat,
    /// Fixed artifact file name inside `dir`; generated per run when unset
    pub file_name: Option<String>,
    /// Fixed report file name inside `dir`; generated per run when unset
    pub report_name: Option<String>,
    pub missing_value: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            format: OutputFormat::default(),
            file_name: None,
            report_name: None,
            missing_value: DEFAULT_MISSING_VALUE.to_string(),
        }
    }
}

impl OutputConfig {
    pub fn artifact_path(&self, timestamp: &str) -> PathBuf {
        match &self.file_name {
            Some(name) => self.dir.join(name),
            None => self.dir.join(format!(
                "{}_{}.{}",
                DEFAULT_ARTIFACT_STEM,
                timestamp,
                self.format.extension()
            )),
        }
    }

    pub fn report_path(&self, timestamp: &str) -> PathBuf {
        match &self.report_name {
            Some(name) => self.dir.join(name),
            None => self.dir.join(format!("{}_{}.txt", DEFAULT_REPORT_STEM, timestamp)),
        }
    }

    pub fn sink_target(&self, timestamp: &str) -> SinkTarget {
        SinkTarget {
            path: self.artifact_path(timestamp),
            format: self.format,
            missing_value: self.missing_value.clone(),
        }
    }
}

/// Full configuration for one ingestion run
#[derive(Debug, Clone, Serialize)]
pub struct IngestConfig {
    pub api: ApiConfig,
    pub retry: RetryConfig,
    pub output: OutputConfig,
    /// S3 destination; `None` disables remote upload
    pub storage: Option<StorageConfig>,
    /// Copy the artifact into this directory instead of uploading to S3
    pub local_store_dir: Option<PathBuf>,
    pub upload_on_abort: bool,
}

impl IngestConfig {
    /// Defaults for everything except the endpoint and credentials
    pub fn new(url: impl Into<String>, auth: AuthSettings) -> Self {
        Self {
            api: ApiConfig {
                url: url.into(),
                auth,
                mode: PaginationMode::default(),
                page_size: DEFAULT_PAGE_SIZE,
                max_pages: None,
                request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
                max_page_records: None,
            },
            retry: RetryConfig::default(),
            output: OutputConfig::default(),
            storage: None,
            local_store_dir: None,
            upload_on_abort: true,
        }
    }

    /// Load configuration from environment and defaults
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let url = std::env::var("API_URL").unwrap_or_default();
        let mut config = Self::new(url, auth_from_env()?);

        let api = &mut config.api;
        if let Some(mode) = env_parse("PAGINATION_MODE")? {
            api.mode = mode;
        }
        if let Some(page_size) = env_parse("PAGE_SIZE")? {
            api.page_size = page_size;
        }
        api.max_pages = env_parse("MAX_PAGES")?;
        if let Some(timeout) = env_parse("REQUEST_TIMEOUT_SECS")? {
            api.request_timeout_secs = timeout;
        }
        api.max_page_records = env_parse("MAX_PAGE_RECORDS")?;

        let retry = &mut config.retry;
        if let Some(attempts) = env_parse("MAX_ATTEMPTS")? {
            retry.max_attempts = attempts;
        }
        if let Some(base) = env_parse("BACKOFF_BASE_MS")? {
            retry.base_delay_ms = base;
        }
        if let Some(cap) = env_parse("BACKOFF_CAP_MS")? {
            retry.max_delay_ms = cap;
        }
        if let Some(low) = env_parse("JITTER_LOW")? {
            retry.jitter_low = low;
        }
        if let Some(high) = env_parse("JITTER_HIGH")? {
            retry.jitter_high = high;
        }

        let output = &mut config.output;
        if let Ok(dir) = std::env::var("OUTPUT_DIR") {
            output.dir = PathBuf::from(dir);
        }
        if let Some(format) = env_parse("OUTPUT_FORMAT")? {
            output.format = format;
        }
        output.file_name = std::env::var("CSV_FILENAME").ok().filter(|s| !s.is_empty());
        output.report_name = std::env::var("REPORT_FILENAME").ok().filter(|s| !s.is_empty());
        if let Ok(missing) = std::env::var("MISSING_VALUE") {
            output.missing_value = missing;
        }

        config.storage = StorageConfig::from_env();
        config.local_store_dir = std::env::var("LOCAL_STORE_DIR").ok().map(PathBuf::from);
        if let Some(upload_on_abort) = env_parse("UPLOAD_ON_ABORT")? {
            config.upload_on_abort = upload_on_abort;
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api.url.trim().is_empty() {
            anyhow::bail!("API URL must be set (API_URL or --api-url)");
        }

        match &self.api.auth {
            AuthSettings::Token {
                url,
                username,
                password,
            } => {
                if url.trim().is_empty() || username.is_empty() || password.is_empty() {
                    anyhow::bail!("Token auth requires AUTH_URL, API_USERNAME and API_PASSWORD");
                }
            },
            AuthSettings::Static { token } => {
                if token.is_empty() {
                    anyhow::bail!("API token cannot be empty");
                }
            },
        }

        if self.api.request_timeout_secs == 0 {
            anyhow::bail!("Request timeout must be greater than 0");
        }

        if self.api.max_page_records == Some(0) {
            anyhow::bail!("Max page records must be greater than 0 when set");
        }

        self.cursor().validate().map_err(anyhow::Error::msg)?;
        self.retry.policy().validate().map_err(anyhow::Error::msg)?;

        if let Some(storage) = &self.storage {
            storage.validate().map_err(anyhow::Error::msg)?;
        }

        if self.output.missing_value.contains(['\n', '\r']) {
            anyhow::bail!("Missing-value placeholder cannot contain line breaks");
        }

        Ok(())
    }

    pub fn cursor(&self) -> PaginationCursor {
        PaginationCursor::new(self.api.mode, self.api.page_size, self.api.max_pages)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    /// Prefix for uploaded object keys
    pub fn destination_prefix(&self) -> &str {
        self.storage.as_ref().map_or("", |s| s.prefix.as_str())
    }
}

fn auth_from_env() -> anyhow::Result<AuthSettings> {
    if let Ok(token) = std::env::var("API_TOKEN") {
        return Ok(AuthSettings::Static { token });
    }

    let url = std::env::var("AUTH_URL").context("AUTH_URL or API_TOKEN must be set")?;
    let username = std::env::var("API_USERNAME").context("API_USERNAME must be set")?;
    let password = std::env::var("API_PASSWORD").context("API_PASSWORD must be set")?;

    Ok(AuthSettings::Token {
        url,
        username,
        password,
    })
}

/// Parse an optional variable, failing on values that do not parse
fn env_parse<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", name, e)),
        _ => Ok(None),
    }
}
