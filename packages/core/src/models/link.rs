//! Back-reference records
//!
//! A [`SourceLink`] is stored under the link items of the node it protects and
//! lists every path that references that node, so an element shared between
//! several collections knows where it is used.

use crate::db::DataSnapshot;
use crate::representer::CodingError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLink {
    pub id: String,
    pub targets: Vec<String>,
}

impl SourceLink {
    pub fn new(id: impl Into<String>, targets: Vec<String>) -> Self {
        Self {
            id: id.into(),
            targets,
        }
    }

    /// Primitive form: the bare list of target paths, keyed by `id` in the tree
    pub fn to_value(&self) -> Value {
        Value::from(self.targets.clone())
    }

    pub fn from_snapshot(snapshot: &DataSnapshot) -> Result<Self, CodingError> {
        let value = snapshot
            .value()
            .ok_or_else(|| CodingError::missing(snapshot.node()))?;
        let targets: Vec<String> = serde_json::from_value(value.clone())
            .map_err(|e| CodingError::decode::<Self>(snapshot.node(), e.to_string()))?;
        Ok(Self::new(snapshot.node().key(), targets))
    }
}
