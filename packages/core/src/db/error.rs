//! Backend Error Types

use thiserror::Error;

/// Failures reported by backend implementations
///
/// Backends return `anyhow::Result`, so these travel wrapped in
/// `anyhow::Error` and can be recovered with `downcast_ref`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend refused the whole batch of value writes
    #[error("Commit rejected: {0}")]
    CommitRejected(String),

    /// A single blob upload failed
    #[error("Upload rejected for {path}: {reason}")]
    UploadRejected { path: String, reason: String },

    /// Load did not finish in time
    #[error("Load of {path} timed out after {timeout_ms}ms")]
    Timeout { path: String, timeout_ms: u128 },
}

impl BackendError {
    pub fn commit_rejected(reason: impl Into<String>) -> Self {
        Self::CommitRejected(reason.into())
    }

    pub fn upload_rejected(path: impl ToString, reason: impl Into<String>) -> Self {
        Self::UploadRejected {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub fn timeout(path: impl ToString, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            path: path.to_string(),
            timeout_ms: timeout.as_millis(),
        }
    }
}
