//! Record value bag.
//!
//! A record is an ordered map of field names to JSON values. It is the unit
//! that flows between operations and is stored in cached results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// An opaque keyed value bag flowing through pipeline stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a record from a JSON value, which must be an object.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    /// Parses one JSON line into a record.
    pub fn from_json(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    /// Serializes the record as a single JSON line.
    #[must_use]
    pub fn to_json(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Sets a field value, returning the previous one.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    /// Builder form of [`Record::set`].
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Iterates field names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the underlying map.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_json_line() {
        let record = Record::from_json(r#"{"b":1,"a":"x"}"#).unwrap();

        assert_eq!(record.get("b"), Some(&json!(1)));
        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(record.to_json(), r#"{"b":1,"a":"x"}"#);
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(Record::from_value(json!([1, 2])).is_none());
        assert!(Record::from_value(json!({"x": 1})).is_some());
    }

    #[test]
    fn test_clone_does_not_alias() {
        let original = Record::new().with("x", 1);
        let mut copy = original.clone();
        copy.set("x", 2);

        assert_eq!(original.get("x"), Some(&json!(1)));
        assert_eq!(copy.get("x"), Some(&json!(2)));
    }
}
