//! Application-level operations carried as entry payloads.
//!
//! Operations travel as single-encoded JSON objects:
//! `{"op":"PUT","key":"k","value":…}`, `{"op":"DEL","key":"k"}`, and
//! `{"op":"ADD","key":null,"value":…}`. Payloads that are not a JSON object
//! of this shape are rejected on decode; there is no double-encoded
//! fallback.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// The kind of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpKind {
    /// Write a value under a key.
    Put,
    /// Delete a key.
    Del,
    /// Append an immutable event.
    Add,
}

/// One operation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Operation kind.
    pub op: OpKind,
    /// Target key; `null` for event appends.
    pub key: Option<String>,
    /// Value for `PUT`/`ADD`; absent for `DEL`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Operation {
    /// A `PUT` of `value` under `key`.
    pub fn put(key: impl Into<String>, value: Value) -> Self {
        Self {
            op: OpKind::Put,
            key: Some(key.into()),
            value: Some(value),
        }
    }

    /// A `DEL` of `key`.
    pub fn del(key: impl Into<String>) -> Self {
        Self {
            op: OpKind::Del,
            key: Some(key.into()),
            value: None,
        }
    }

    /// An `ADD` of an event `value`.
    pub fn add(value: Value) -> Self {
        Self {
            op: OpKind::Add,
            key: None,
            value: Some(value),
        }
    }

    /// Serialize to the canonical payload string.
    pub fn to_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an operation from an entry payload.
    pub fn from_payload(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn payload_round_trip() {
        let op = Operation::put("k", json!({"n": 1}));
        let payload = op.to_payload().unwrap();
        assert_eq!(Operation::from_payload(&payload).unwrap(), op);
    }

    #[test]
    fn wire_shape_matches_the_documented_form() {
        assert_eq!(
            Operation::put("k", json!("v")).to_payload().unwrap(),
            r#"{"op":"PUT","key":"k","value":"v"}"#
        );
        assert_eq!(
            Operation::del("k").to_payload().unwrap(),
            r#"{"op":"DEL","key":"k"}"#
        );
        assert_eq!(
            Operation::add(json!("e")).to_payload().unwrap(),
            r#"{"op":"ADD","key":null,"value":"e"}"#
        );
    }

    #[test]
    fn double_encoded_payloads_are_rejected() {
        // a JSON string containing a JSON object is not an operation
        let double = serde_json::to_string(r#"{"op":"PUT","key":"k","value":1}"#).unwrap();
        assert!(Operation::from_payload(&double).is_err());
    }

    #[test]
    fn non_operation_json_is_rejected() {
        assert!(Operation::from_payload("42").is_err());
        assert!(Operation::from_payload(r#"{"key":"k"}"#).is_err());
        assert!(Operation::from_payload("not json").is_err());
    }
}
