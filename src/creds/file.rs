//! Credential file materialization
//!
//! The child process reads its secret from a well-known local file
//! (`creds.json` by default). The server writes the configured blob to
//! that path verbatim before each session's child starts. The write is
//! an overwrite, so materializing the same value repeatedly leaves the
//! file unchanged.

use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while writing the credential file
#[derive(Error, Debug)]
pub enum CredsError {
    #[error("Failed to write credential file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for credential operations
pub type CredsResult<T> = Result<T, CredsError>;

/// Writes the credential blob to a fixed local path.
#[derive(Debug, Clone)]
pub struct CredentialFile {
    path: PathBuf,
}

impl CredentialFile {
    /// Create a credential file handle for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Write the blob to the target path, exactly as received.
    ///
    /// No structure is imposed on the value; the file ends up containing
    /// the bytes of `value` and nothing else.
    pub async fn materialize(&self, value: &str) -> CredsResult<()> {
        tokio::fs::write(&self.path, value)
            .await
            .map_err(|source| CredsError::Write {
                path: self.path.clone(),
                source,
            })?;
        debug!("Wrote credential file {}", self.path.display());
        Ok(())
    }
}
