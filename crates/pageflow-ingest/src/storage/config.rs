use serde::{Deserialize, Serialize};
use std::env;

use super::prefix_from_key;

pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub bucket: String,
    /// Key prefix artifacts are placed under
    pub prefix: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    /// Named profile for the default credential chain
    pub profile: Option<String>,
    pub path_style: bool,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key.as_ref().map(|_| "***"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "***"))
            .field("profile", &self.profile)
            .field("path_style", &self.path_style)
            .finish()
    }
}

impl StorageConfig {
    /// Read S3 settings. Returns `None` when `S3_BUCKET` is unset.
    ///
    /// `S3_KEY` contributes only its directory part; the file name is
    /// generated per run.
    pub fn from_env() -> Option<Self> {
        let bucket = env::var("S3_BUCKET").ok().filter(|b| !b.is_empty())?;

        Some(Self {
            bucket,
            prefix: env::var("S3_KEY")
                .map(|key| prefix_from_key(&key).to_string())
                .unwrap_or_default(),
            region: env::var("S3_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .ok(),
            endpoint: env::var("S3_ENDPOINT").ok(),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .ok(),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .ok(),
            profile: env::var("AWS_PROFILE").ok(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        })
    }

    /// S3-compatible endpoint such as MinIO with static keys
    pub fn for_endpoint(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: String::new(),
            region: Some(DEFAULT_REGION.to_string()),
            endpoint: Some(endpoint.into()),
            access_key: Some(access_key.into()),
            secret_key: Some(secret_key.into()),
            profile: None,
            path_style: true,
        }
    }

    pub fn has_static_credentials(&self) -> bool {
        self.access_key.is_some() && self.secret_key.is_some()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.bucket.trim().is_empty() {
            return Err("S3 bucket cannot be empty".to_string());
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err("S3 access key and secret key must be set together".to_string());
        }
        Ok(())
    }
}
