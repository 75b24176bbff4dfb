//! Backend Layer
//!
//! This module defines how the core reaches the remote hierarchical store:
//!
//! - [`Backend`] - async trait for commit, blob upload, load and observe
//! - [`DataSnapshot`] / [`DataEvent`] - what loads and subscriptions deliver
//! - [`MemoryBackend`] - an in-process implementation with failure injection
//!
//! # Architecture
//!
//! Transactions hand their whole [`MutationTree`](crate::transaction::MutationTree)
//! to [`Backend::commit`] and upload blobs separately through
//! [`Backend::upload`]. Collection views prepare themselves with
//! [`Backend::load`] and stay in sync through [`Backend::observe`].

mod backend;
mod error;
pub mod events;
mod memory_backend;

pub use backend::{Backend, SnapshotStream};
pub use error::BackendError;
pub use events::{DataEvent, DataSnapshot};
pub use memory_backend::{CommitRecord, MemoryBackend};
