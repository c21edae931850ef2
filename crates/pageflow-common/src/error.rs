//! Error types shared across Pageflow crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, PageflowError>;

/// Error type for the shared utilities
#[derive(Error, Debug)]
pub enum PageflowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
