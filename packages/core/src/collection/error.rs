//! Collection Error Types
//!
//! Only recoverable conditions are represented here. Misuse such as writing
//! into a collection that is not rooted, or adding an element that lives in
//! another container, panics instead.

use crate::representer::CodingError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectionError {
    /// A member with this key is already in the collection
    #[error("Element with key '{key}' is already inserted")]
    AlreadyInserted { key: String },

    #[error("Index {index} is out of range for a collection of {len} element(s)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("No member with key '{key}'")]
    MemberNotFound { key: String },

    /// Element could not be encoded, or backend data could not be decoded
    #[error("Coding failed: {0}")]
    Coding(#[from] CodingError),

    /// Loading the index from the backend failed
    #[error("Failed to prepare collection at {node}: {source:#}")]
    PreparationFailed {
        node: String,
        source: anyhow::Error,
    },
}

impl CollectionError {
    pub fn already_inserted(key: impl Into<String>) -> Self {
        Self::AlreadyInserted { key: key.into() }
    }

    pub fn member_not_found(key: impl Into<String>) -> Self {
        Self::MemberNotFound { key: key.into() }
    }

    pub fn preparation_failed(node: impl ToString, source: anyhow::Error) -> Self {
        Self::PreparationFailed {
            node: node.to_string(),
            source,
        }
    }
}
