//! The record type that flows along edges.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sentinel field a record may carry to steer routing when the producer
/// does not name an explicit port.
pub const ROUTE_PORT_FIELD: &str = "_routePort";

/// A single record: a JSON object payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct Record {
    pub json: Map<String, Value>,
}

impl Record {
    /// Empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from key/value pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            json: pairs.into_iter().collect(),
        }
    }

    /// Wrap a JSON value. Non-object values land under a `"value"` key so
    /// scalar-producing executors still emit well-formed records.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(json) => Self { json },
            other => {
                let mut json = Map::new();
                json.insert("value".to_string(), other);
                Self { json }
            }
        }
    }

    /// Read a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.json.get(key)
    }

    /// Set a field.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.json.insert(key.into(), value);
    }

    /// Builder-style field set.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.set(key, value);
        self
    }

    /// The routing sentinel, if the record carries one.
    pub fn route_port(&self) -> Option<&str> {
        self.json.get(ROUTE_PORT_FIELD).and_then(Value::as_str)
    }

    /// Attach the routing sentinel.
    pub fn with_route_port(mut self, port: impl Into<String>) -> Self {
        self.json
            .insert(ROUTE_PORT_FIELD.to_string(), Value::String(port.into()));
        self
    }
}

impl From<Map<String, Value>> for Record {
    fn from(json: Map<String, Value>) -> Self {
        Self { json }
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Object(record.json)
    }
}
