//! Realtime collections
//!
//! - [`view`] - ordered item records and their reconciliation with the backend
//! - [`storage`] - materialized elements and staged members
//! - [`realtime`] - the generic collection engine
//! - [`kind`] - collection variants
//! - [`keyed_map`] - values keyed by objects stored elsewhere
//! - [`any`] - type-erased access to any collection

pub mod any;
mod error;
pub mod keyed_map;
pub mod kind;
pub mod realtime;
pub mod storage;
pub mod view;

pub use any::AnyCollection;
pub use error::CollectionError;
pub use keyed_map::KeyedMap;
pub use kind::{
    CollectionKind, LinkedArray, LinkedKind, Linking, MapKind, References, ReferencesKind,
    Values, ValuesKind,
};
pub use realtime::{ObservationHandle, RealtimeCollection};
pub use storage::{CollectionStorage, ElementBuilder, MemberEntry};
pub use view::{CollectionView, Preparation, Shifted, ViewChange};
