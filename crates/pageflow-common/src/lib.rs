//! Pageflow Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities and error handling for the Pageflow workspace.
//!
//! # Overview
//!
//! - **Error Handling**: Common error and result types
//! - **Checksums**: Artifact integrity digests
//! - **Logging**: `tracing` subscriber setup driven by environment variables
//!
//! # Example
//!
//! ```no_run
//! use pageflow_common::checksum::sha256_file;
//! use pageflow_common::Result;
//!
//! fn fingerprint(path: &str) -> Result<()> {
//!     let digest = sha256_file(path)?;
//!     tracing::info!(%digest, "artifact fingerprinted");
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{PageflowError, Result};
