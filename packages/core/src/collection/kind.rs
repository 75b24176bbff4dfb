//! Collection variants
//!
//! One engine, [`RealtimeCollection`], serves every variant. A variant is a
//! zero-sized marker implementing [`CollectionKind`], which only says where
//! elements live and which back-references a write maintains.

use crate::collection::RealtimeCollection;

/// Back-references written alongside a collection entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linking {
    /// No link records
    None,
    /// The element records the item that references it
    Element,
    /// Both the key object and the value record the entry
    KeyObject,
}

pub trait CollectionKind: Send + Sync + 'static {
    const NAME: &'static str;

    /// Elements are stored under the collection node itself
    const INLINE_ELEMENTS: bool;

    const LINKING: Linking;
}

/// Array whose elements are stored inside the collection
#[derive(Debug, Clone, Copy)]
pub struct ValuesKind;

/// Array of references to elements stored elsewhere, without back-references
#[derive(Debug, Clone, Copy)]
pub struct ReferencesKind;

/// Array of references to elements stored elsewhere, each linked back
#[derive(Debug, Clone, Copy)]
pub struct LinkedKind;

/// Values stored inside the collection, keyed by objects stored elsewhere
#[derive(Debug, Clone, Copy)]
pub struct MapKind;

impl CollectionKind for ValuesKind {
    const NAME: &'static str = "values";
    const INLINE_ELEMENTS: bool = true;
    const LINKING: Linking = Linking::Element;
}

impl CollectionKind for ReferencesKind {
    const NAME: &'static str = "references";
    const INLINE_ELEMENTS: bool = false;
    const LINKING: Linking = Linking::None;
}

impl CollectionKind for LinkedKind {
    const NAME: &'static str = "linked_array";
    const INLINE_ELEMENTS: bool = false;
    const LINKING: Linking = Linking::Element;
}

impl CollectionKind for MapKind {
    const NAME: &'static str = "keyed_map";
    const INLINE_ELEMENTS: bool = true;
    const LINKING: Linking = Linking::KeyObject;
}

pub type Values<E> = RealtimeCollection<E, ValuesKind>;
pub type References<E> = RealtimeCollection<E, ReferencesKind>;
pub type LinkedArray<E> = RealtimeCollection<E, LinkedKind>;
