//! Response envelope.
//!
//! Every operation resolves to a `{status, headers, body}` envelope with
//! HTTP-style status conventions: 201 created/updated, 200 non-empty read,
//! 204 no content, 404 empty read or missing schema, 400 validation or
//! migration failure, 500 engine failure.

use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// The result of a read: item rows plus an optional offset-style cursor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultSet {
    pub count: usize,
    pub items: Vec<serde_json::Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<u64>,
}

/// An operation response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

impl Response {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body,
        }
    }

    /// 201: table created/updated or row written.
    pub fn created() -> Self {
        Self::new(201, Value::Null)
    }

    /// 204: no content (deletes).
    pub fn no_content() -> Self {
        Self::new(204, Value::Null)
    }

    /// 200 for a non-empty read, 404 for an empty one; either way the body
    /// carries the result set.
    pub fn from_result_set(results: ResultSet) -> Self {
        let status = if results.count > 0 { 200 } else { 404 };
        let body = serde_json::to_value(&results).unwrap_or(Value::Null);
        Self::new(status, body)
    }

    /// An error envelope with a `{type, title}` body.
    pub fn error(status: u16, kind: &str, title: impl Into<String>) -> Self {
        Self::new(status, json!({"type": kind, "title": title.into()}))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Items of a read response body, if any.
    pub fn items(&self) -> Option<&Vec<Value>> {
        self.body.get("items").and_then(Value::as_array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_read_is_404_with_items() {
        let resp = Response::from_result_set(ResultSet::default());
        assert_eq!(resp.status, 404);
        assert_eq!(resp.items().unwrap().len(), 0);
    }

    #[test]
    fn non_empty_read_is_200() {
        let mut items = Vec::new();
        let mut row = serde_json::Map::new();
        row.insert("key".into(), "k1".into());
        items.push(row);
        let resp = Response::from_result_set(ResultSet {
            count: 1,
            items,
            next: Some(1),
        });
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["count"], 1);
        assert_eq!(resp.body["next"], 1);
    }

    #[test]
    fn error_body_shape() {
        let resp = Response::error(400, "bad_request", "order must use range keys");
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body["type"], "bad_request");
    }
}
