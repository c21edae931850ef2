use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::{config::Region, error::DisplayErrorContext, primitives::ByteStream, Client};
use std::path::Path;
use tracing::{debug, info, instrument};

use super::config::StorageConfig;
use super::{BlobStore, StorageError};

/// Uploads artifacts to an S3 bucket
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    /// Explicit keys win; otherwise the default chain (env, profile, instance
    /// role) resolves credentials.
    pub async fn new(config: StorageConfig) -> Result<Self, StorageError> {
        config.validate().map_err(StorageError::Config)?;
        debug!("Initializing storage with config: {:?}", config);

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut s3_config_builder =
            aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.path_style);

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            let credentials =
                Credentials::new(access_key, secret_key, None, None, "pageflow-storage");
            s3_config_builder = s3_config_builder.credentials_provider(credentials);
        }

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!("Storage client initialized for bucket: {}", config.bucket);

        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("csv") => "text/csv",
        Some("jsonl") => "application/x-ndjson",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self))]
    async fn upload(&self, local_path: &Path, key: &str) -> Result<String, StorageError> {
        let size = tokio::fs::metadata(local_path).await?.len();
        debug!("Uploading {} bytes to s3://{}/{}", size, self.bucket, key);

        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StorageError::Upload {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type_for(local_path))
            .content_length(size as i64)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        info!("Successfully uploaded to s3://{}/{}", self.bucket, key);

        Ok(format!("s3://{}/{}", self.bucket, key))
    }
}
