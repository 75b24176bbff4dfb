//! Data Events and Snapshots
//!
//! Backends answer loads with a [`DataSnapshot`] and deliver observed changes
//! as a stream of snapshots tagged by the [`DataEvent`] they were subscribed
//! for.
//!
//! # Event Flow
//!
//! 1. A backend applies a commit (or receives a remote change)
//! 2. For every observed node whose data changed, it emits the matching events
//! 3. Subscribers (collection views, tests) apply the snapshots asynchronously

use crate::models::Node;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kinds of change a subscriber can observe on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataEvent {
    /// The node's whole value, emitted whenever anything below it changes
    Value,
    /// A direct child appeared; the snapshot is the child
    ChildAdded,
    /// A direct child disappeared; the snapshot carries its last value
    ChildRemoved,
    /// A direct child's value changed; the snapshot is the child
    ChildChanged,
}

impl DataEvent {
    pub const CHILD_EVENTS: [DataEvent; 3] = [
        DataEvent::ChildAdded,
        DataEvent::ChildRemoved,
        DataEvent::ChildChanged,
    ];

    /// Get a string representation of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            DataEvent::Value => "value",
            DataEvent::ChildAdded => "child_added",
            DataEvent::ChildRemoved => "child_removed",
            DataEvent::ChildChanged => "child_changed",
        }
    }
}

/// The data stored at a node at one point in time
#[derive(Debug, Clone, PartialEq)]
pub struct DataSnapshot {
    node: Node,
    value: Option<Value>,
}

impl DataSnapshot {
    pub fn new(node: Node, value: Option<Value>) -> Self {
        Self { node, value }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn key(&self) -> &str {
        self.node.key()
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<Value> {
        self.value
    }

    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    pub fn child(&self, key: &str) -> DataSnapshot {
        let value = self
            .value
            .as_ref()
            .and_then(|value| value.get(key))
            .cloned();
        DataSnapshot::new(self.node.child(key), value)
    }

    /// Direct children in key order; empty unless the value is an object
    pub fn children(&self) -> Vec<DataSnapshot> {
        match &self.value {
            Some(Value::Object(map)) => {
                let mut keys: Vec<_> = map.keys().collect();
                keys.sort();
                keys.into_iter()
                    .map(|key| DataSnapshot::new(self.node.child(key), map.get(key).cloned()))
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn children_count(&self) -> usize {
        match &self.value {
            Some(Value::Object(map)) => map.len(),
            _ => 0,
        }
    }
}
