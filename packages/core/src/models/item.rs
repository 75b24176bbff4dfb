//! Ordered Item Record
//!
//! One member of a collection as seen through the persisted index. Records
//! are identified by their key alone, and ordered by `(priority, key)` with a
//! missing priority sorting as `0`.
//!
//! `ItemRecord` deliberately does not implement `Ord`: equality is by key
//! while ordering also looks at the priority, and the two would disagree. Use
//! [`ItemRecord::cmp_order`] to sort.

use crate::db::DataSnapshot;
use crate::representer::CodingError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone)]
pub struct ItemRecord {
    pub key: String,
    pub priority: Option<i64>,
    pub link_id: Option<String>,
    pub raw: Option<Value>,
    pub payload: Option<Map<String, Value>>,
}

#[derive(Serialize, Deserialize)]
struct ItemRepr {
    #[serde(rename = "__lnk", default, skip_serializing_if = "Option::is_none")]
    link_id: Option<String>,
    #[serde(rename = "__i", default, skip_serializing_if = "Option::is_none")]
    priority: Option<i64>,
    #[serde(rename = "__val", default, skip_serializing_if = "ValueRepr::is_empty")]
    value: ValueRepr,
}

#[derive(Default, Serialize, Deserialize)]
struct ValueRepr {
    #[serde(rename = "__raw", default, skip_serializing_if = "Option::is_none")]
    raw: Option<Value>,
    #[serde(rename = "__pl", default, skip_serializing_if = "Option::is_none")]
    payload: Option<Map<String, Value>>,
}

impl ValueRepr {
    fn is_empty(&self) -> bool {
        self.raw.is_none() && self.payload.is_none()
    }
}

impl ItemRecord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            priority: None,
            link_id: None,
            raw: None,
            payload: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_link_id(mut self, link_id: impl Into<String>) -> Self {
        self.link_id = Some(link_id.into());
        self
    }

    pub fn with_raw(mut self, raw: Option<Value>) -> Self {
        self.raw = raw;
        self
    }

    pub fn with_payload(mut self, payload: Option<Map<String, Value>>) -> Self {
        self.payload = payload;
        self
    }

    /// Priority used for ordering
    pub fn effective_priority(&self) -> i64 {
        self.priority.unwrap_or(0)
    }

    /// Collection order: priority ascending, then key
    pub fn cmp_order(&self, other: &Self) -> Ordering {
        self.effective_priority()
            .cmp(&other.effective_priority())
            .then_with(|| self.key.cmp(&other.key))
    }

    /// Same member with identical payload and position
    pub fn is_identical(&self, other: &Self) -> bool {
        self.key == other.key
            && self.priority == other.priority
            && self.link_id == other.link_id
            && self.raw == other.raw
            && self.payload == other.payload
    }

    /// Primitive form written at the item's path (the key is the path itself)
    pub fn to_value(&self) -> Value {
        let repr = ItemRepr {
            link_id: self.link_id.clone(),
            priority: self.priority,
            value: ValueRepr {
                raw: self.raw.clone(),
                payload: self.payload.clone(),
            },
        };
        // Infallible for these field types
        serde_json::to_value(repr).unwrap_or(Value::Null)
    }

    pub fn from_snapshot(snapshot: &DataSnapshot) -> Result<Self, CodingError> {
        let key = snapshot.node().key().to_string();
        let value = snapshot
            .value()
            .ok_or_else(|| CodingError::missing(snapshot.node()))?;
        let repr: ItemRepr = serde_json::from_value(value.clone())
            .map_err(|e| CodingError::decode::<Self>(snapshot.node(), e.to_string()))?;

        Ok(Self {
            key,
            priority: repr.priority,
            link_id: repr.link_id,
            raw: repr.value.raw,
            payload: repr.value.payload,
        })
    }
}

impl PartialEq for ItemRecord {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ItemRecord {}

impl Hash for ItemRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}
