//! Error types for the ingestion crate

use thiserror::Error;

use crate::auth::AuthError;
use crate::storage::StorageError;
use crate::transport::TransportError;

/// Result type alias for assembling a pipeline
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors raised while building the pipeline's collaborators
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
