//! Staged-mutation transactions
//!
//! - [`MutationTree`] - pending point-writes mirroring the node hierarchy
//! - [`Transaction`] - preconditions, reversions, completions and the commit
//!   state machine around one mutation tree

mod error;
mod mutation_tree;
mod unit_of_work;

pub use error::{FileOutcome, TransactionError};
pub use mutation_tree::{
    ConflictResolver, FileNode, MergeStrategy, Metadata, MutationTree, ObjectNode, UpdateNode,
    ValueNode, WriteKind,
};
pub use unit_of_work::{CommitOutcome, Transaction, TransactionState};
