//! Encoding boundary between typed values and primitive snapshot trees
//!
//! The core never inspects element data itself; it asks a [`Representer`] to
//! turn a value into a `serde_json::Value` for staging and to turn a
//! [`DataSnapshot`] back into a value when an element is materialized.

use crate::db::DataSnapshot;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use thiserror::Error;

/// Errors raised while converting between typed values and primitives
#[derive(Error, Debug)]
pub enum CodingError {
    #[error("Cannot decode {type_name} at {path}: {reason}")]
    Decode {
        type_name: &'static str,
        path: String,
        reason: String,
    },

    #[error("Cannot encode {type_name}: {reason}")]
    Encode {
        type_name: &'static str,
        reason: String,
    },

    #[error("No value at {path}")]
    MissingValue { path: String },
}

impl CodingError {
    pub fn decode<T>(path: impl ToString, reason: impl Into<String>) -> Self {
        Self::Decode {
            type_name: std::any::type_name::<T>(),
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub fn encode<T>(reason: impl Into<String>) -> Self {
        Self::Encode {
            type_name: std::any::type_name::<T>(),
            reason: reason.into(),
        }
    }

    pub fn missing(path: impl ToString) -> Self {
        Self::MissingValue {
            path: path.to_string(),
        }
    }
}

/// Converts `T` to and from the primitive form stored in the backend
pub trait Representer<T>: Send + Sync {
    /// `None` means "no value", which stages a delete
    fn encode(&self, value: &T) -> Result<Option<Value>, CodingError>;

    fn decode(&self, snapshot: &DataSnapshot) -> Result<T, CodingError>;
}

/// Serde-backed representer
pub struct JsonRepresenter<T>(PhantomData<fn() -> T>);

impl<T> JsonRepresenter<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonRepresenter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonRepresenter<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Representer<T> for JsonRepresenter<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Option<Value>, CodingError> {
        match serde_json::to_value(value) {
            Ok(Value::Null) => Ok(None),
            Ok(encoded) => Ok(Some(encoded)),
            Err(e) => Err(CodingError::encode::<T>(e.to_string())),
        }
    }

    fn decode(&self, snapshot: &DataSnapshot) -> Result<T, CodingError> {
        let value = snapshot
            .value()
            .ok_or_else(|| CodingError::missing(snapshot.node()))?;
        serde_json::from_value(value.clone())
            .map_err(|e| CodingError::decode::<T>(snapshot.node(), e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Node;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        age: u32,
    }

    #[test]
    fn test_json_representer_encodes_and_decodes() {
        let representer = JsonRepresenter::<Profile>::new();
        let profile = Profile {
            name: "Ada".to_string(),
            age: 36,
        };

        let encoded = representer.encode(&profile).unwrap();
        assert_eq!(encoded, Some(json!({"name": "Ada", "age": 36})));

        let snapshot = DataSnapshot::new(Node::from_path("/profiles/p1"), encoded);
        assert_eq!(representer.decode(&snapshot).unwrap(), profile);
    }

    #[test]
    fn test_null_encodes_as_delete() {
        let representer = JsonRepresenter::<Option<String>>::new();
        assert_eq!(representer.encode(&None).unwrap(), None);
    }

    #[test]
    fn test_decode_errors_name_the_path() {
        let representer = JsonRepresenter::<Profile>::new();

        let missing = DataSnapshot::new(Node::from_path("/profiles/p2"), None);
        let err = representer.decode(&missing).unwrap_err();
        assert!(err.to_string().contains("/profiles/p2"));

        let malformed = DataSnapshot::new(Node::from_path("/profiles/p3"), Some(json!(42)));
        let err = representer.decode(&malformed).unwrap_err();
        assert!(matches!(err, CodingError::Decode { .. }));
        assert!(err.to_string().contains("/profiles/p3"));
    }
}
