//! Realtime Core
//!
//! Client-side data mapping for a remote hierarchical key-value store:
//! application values are staged as writes, committed in transactions, and
//! kept in remote-backed ordered collections.
//!
//! # Architecture
//!
//! - **Staged mutations**: writes accumulate in a [`MutationTree`] owned by a
//!   [`Transaction`] until it commits
//! - **Preconditions**: a transaction can describe work on a collection that
//!   has not loaded yet; the load runs before the commit
//! - **Optimistic collections**: views and storage change immediately and
//!   are rolled back through transaction reversions
//! - **Explicit context**: every transaction and collection receives a
//!   [`RealtimeContext`] instead of reaching for global state
//!
//! # Modules
//!
//! - [`config`] - Configuration and the backend context
//! - [`models`] - Nodes, item records, link records and elements
//! - [`representer`] - Encoding values to and from their primitive form
//! - [`db`] - Backend boundary and the in-memory backend
//! - [`transaction`] - Mutation trees and transactions
//! - [`collection`] - Views, storage and realtime collections

pub mod collection;
pub mod config;
pub mod db;
pub mod models;
pub mod representer;
pub mod transaction;

// Re-export commonly used types
pub use collection::*;
pub use config::*;
pub use db::*;
pub use models::*;
pub use representer::*;
pub use transaction::*;
