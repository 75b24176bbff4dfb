//! Transaction Error Types

use crate::models::Node;
use crate::transaction::Metadata;
use thiserror::Error;

/// Result of one blob upload, reported alongside the value commit
#[derive(Debug)]
pub enum FileOutcome {
    Uploaded { location: Node, metadata: Metadata },
    Failed { location: Node, error: anyhow::Error },
}

impl FileOutcome {
    pub fn location(&self) -> &Node {
        match self {
            Self::Uploaded { location, .. } | Self::Failed { location, .. } => location,
        }
    }

    pub fn is_uploaded(&self) -> bool {
        matches!(self, Self::Uploaded { .. })
    }
}

/// Why a commit did not complete
#[derive(Error, Debug)]
pub enum TransactionError {
    /// At least one precondition rejected; nothing was sent to the backend
    #[error("{} precondition(s) rejected: {}", .errors.len(), describe(.errors))]
    PreconditionsFailed { errors: Vec<anyhow::Error> },

    /// The backend refused the value commit
    #[error("Backend commit failed: {source:#}")]
    CommitFailed {
        source: anyhow::Error,
        files: Vec<FileOutcome>,
    },
}

impl TransactionError {
    /// True when the error came from a rejected precondition
    pub fn is_precondition_failure(&self) -> bool {
        matches!(self, Self::PreconditionsFailed { .. })
    }

    /// Find the first underlying error of type `E`
    pub fn find<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        match self {
            Self::PreconditionsFailed { errors } => errors.iter().find_map(|e| e.downcast_ref()),
            Self::CommitFailed { source, .. } => source.downcast_ref(),
        }
    }
}

fn describe(errors: &[anyhow::Error]) -> String {
    errors
        .iter()
        .map(|error| format!("{:#}", error))
        .collect::<Vec<_>>()
        .join("; ")
}
