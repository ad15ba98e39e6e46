//! Typed operation payloads.
//!
//! These replace the dynamic request objects of wire-level callers with
//! typed, serde-deserializable structs; unknown fields are ignored. Map
//! fields are `BTreeMap` so a serialized request is canonical (sorted keys),
//! which the statement plan cache relies on for its keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::types::SortOrder;

/// Pseudo-attribute carrying a row TTL in seconds on a put.
pub const TTL_ATTRIBUTE: &str = "_ttl";

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// A predicate over one key attribute: either a bare value (equality) or an
/// operator object with exactly one operator set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Op(OpCondition),
    Eq(Value),
}

/// Operator object form of a predicate.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub le: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ge: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub between: Option<Vec<Value>>,
}

/// A resolved predicate operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op<'a> {
    Eq(&'a Value),
    Lt(&'a Value),
    Gt(&'a Value),
    Le(&'a Value),
    Ge(&'a Value),
    Between(&'a Value, &'a Value),
}

impl Condition {
    /// Resolves the condition to a single operator.
    ///
    /// Fails unless the operator object carries exactly one operator, or
    /// `between` does not hold exactly two values.
    pub fn op(&self) -> Result<Op<'_>, String> {
        match self {
            Self::Eq(value) => Ok(Op::Eq(value)),
            Self::Op(op) => {
                let mut resolved: Vec<Op<'_>> = Vec::new();
                if let Some(v) = &op.eq {
                    resolved.push(Op::Eq(v));
                }
                if let Some(v) = &op.lt {
                    resolved.push(Op::Lt(v));
                }
                if let Some(v) = &op.gt {
                    resolved.push(Op::Gt(v));
                }
                if let Some(v) = &op.le {
                    resolved.push(Op::Le(v));
                }
                if let Some(v) = &op.ge {
                    resolved.push(Op::Ge(v));
                }
                if let Some(bounds) = &op.between {
                    match bounds.as_slice() {
                        [lo, hi] => resolved.push(Op::Between(lo, hi)),
                        other => {
                            return Err(format!(
                                "between expects exactly two values, got {}",
                                other.len()
                            ));
                        }
                    }
                }
                match resolved.as_slice() {
                    [op] => Ok(*op),
                    [] => Err("predicate has no operator".to_owned()),
                    _ => Err("predicate must have exactly one operator".to_owned()),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// Projection of a get request: `"*"`, a single attribute, or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Projection {
    One(String),
    Many(Vec<String>),
}

/// A read request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetRequest {
    pub table: String,

    /// Predicates over key attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proj: Option<Projection>,

    /// Route the read through a named secondary index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,

    /// Requested ordering, attribute to direction. Ordered attributes must
    /// be range keys and directions must be uniformly declared or uniformly
    /// reversed.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub order: BTreeMap<String, SortOrder>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    /// Offset-style paging cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<u64>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub distinct: bool,
}

// ---------------------------------------------------------------------------
// Put
// ---------------------------------------------------------------------------

/// Conditional form of a put.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PutCondition {
    /// The literal string `"not exists"`: insert only.
    Literal(String),
    /// Conditional update: apply only where the predicates match.
    Predicates(BTreeMap<String, Condition>),
}

/// A write request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PutRequest {
    pub table: String,

    /// Attribute values to write. May include the `_ttl` pseudo-attribute
    /// (seconds) and may omit the tid column, which is then minted.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,

    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<PutCondition>,
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

/// A hard-delete request. Predicates follow the get rules; matching rows are
/// removed regardless of soft-delete state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub table: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn bare_value_is_equality() {
        let c: Condition = serde_json::from_value(json!("k1")).unwrap();
        assert_eq!(c.op().unwrap(), Op::Eq(&json!("k1")));
    }

    #[test]
    fn operator_object_resolves() {
        let c: Condition = serde_json::from_value(json!({"le": 5})).unwrap();
        assert_eq!(c.op().unwrap(), Op::Le(&json!(5)));

        let c: Condition = serde_json::from_value(json!({"between": [1, 9]})).unwrap();
        assert_eq!(c.op().unwrap(), Op::Between(&json!(1), &json!(9)));
    }

    #[test]
    fn multiple_operators_rejected() {
        let c: Condition = serde_json::from_value(json!({"lt": 1, "gt": 0})).unwrap();
        assert!(c.op().is_err());
    }

    #[test]
    fn bad_between_arity_rejected() {
        let c: Condition = serde_json::from_value(json!({"between": [1, 2, 3]})).unwrap();
        assert!(c.op().is_err());
    }

    #[test]
    fn unknown_operator_falls_back_to_equality() {
        // An object without a recognized operator is an equality match on the
        // object value; key codecs reject it downstream.
        let c: Condition = serde_json::from_value(json!({"matches": "x"})).unwrap();
        assert!(matches!(c, Condition::Eq(_)));
    }

    #[test]
    fn get_request_canonical_serialization() {
        let req: GetRequest = serde_json::from_value(json!({
            "table": "t",
            "attributes": {"key": "k1", "tid": {"between": ["a", "b"]}},
            "limit": 3
        }))
        .unwrap();
        let a = serde_json::to_string(&req).unwrap();
        let b = serde_json::to_string(&req).unwrap();
        assert_eq!(a, b);
        assert!(a.contains("\"limit\":3"));
    }

    #[test]
    fn put_condition_forms() {
        let req: PutRequest = serde_json::from_value(json!({
            "table": "t",
            "attributes": {"key": "k"},
            "if": "not exists"
        }))
        .unwrap();
        assert_eq!(
            req.condition,
            Some(PutCondition::Literal("not exists".into()))
        );

        let req: PutRequest = serde_json::from_value(json!({
            "table": "t",
            "attributes": {"key": "k"},
            "if": {"body": {"eq": "old"}}
        }))
        .unwrap();
        assert!(matches!(req.condition, Some(PutCondition::Predicates(_))));
    }
}
