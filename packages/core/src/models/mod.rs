//! Data Models
//!
//! - [`Node`] - hierarchical path addressing
//! - [`ItemRecord`] - one member of a collection index
//! - [`SourceLink`] - back-reference from an element to the paths using it
//! - [`RealtimeValue`] / [`Entity`] - collection elements

mod entity;
mod item;
mod link;
mod node;

pub use entity::{Entity, EntityStatus, RealtimeValue};
pub use item::ItemRecord;
pub use link::SourceLink;
pub use node::Node;
