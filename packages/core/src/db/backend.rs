//! Backend Trait - Remote Store Abstraction
//!
//! The core never talks to a wire protocol directly. Everything it needs from
//! the hierarchical key-value store goes through [`Backend`]:
//!
//! - **commit**: apply every value write of a [`MutationTree`] as one batch
//! - **upload**: store or delete one blob, independently of the value commit
//! - **load** / **observe**: read a node once, or subscribe to its changes
//!
//! # Design Decisions
//!
//! 1. **Async-First**: all I/O methods are async so network and embedded
//!    stores fit the same shape
//! 2. **Error Handling**: uses `anyhow::Result` for flexible error context;
//!    [`BackendError`](crate::db::BackendError) covers the common cases
//! 3. **Atomicity**: `commit` either applies the whole batch or reports one
//!    error for all of it

use crate::db::{DataEvent, DataSnapshot};
use crate::models::Node;
use crate::transaction::{FileNode, Metadata, MutationTree};
use anyhow::Result;
use async_trait::async_trait;
use std::pin::Pin;
use std::time::Duration;
use tokio_stream::Stream;

/// Stream of snapshots produced by [`Backend::observe`]
pub type SnapshotStream = Pin<Box<dyn Stream<Item = DataSnapshot> + Send>>;

/// Abstraction over the remote hierarchical store
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; transactions hold them behind an
/// `Arc` and call them from spawned tasks.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Apply all value writes in `tree` (blob terminals are ignored)
    ///
    /// # Errors
    ///
    /// Returns a single error covering the whole batch; on error none of the
    /// writes may be visible.
    async fn commit(&self, tree: &MutationTree) -> Result<()>;

    /// Store (or delete, when `file.data` is `None`) one blob
    ///
    /// Returns the metadata recorded by the store.
    async fn upload(&self, file: &FileNode) -> Result<Metadata>;

    /// Read the current data at `node`
    ///
    /// A missing value is not an error; it yields a snapshot without a value.
    async fn load(&self, node: &Node, timeout: Duration) -> Result<DataSnapshot>;

    /// Subscribe to changes of `node`
    ///
    /// The stream ends when the backend is dropped.
    fn observe(&self, node: &Node, event: DataEvent) -> SnapshotStream;

    /// A fresh key, unique for practical purposes
    fn generate_auto_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}
