//! Schema-less view of the object embedded in an admission request

use chrono::DateTime;
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Unix timestamp of `0001-01-01T00:00:00Z`, the serialised zero time
const ZERO_TIME_UNIX: i64 = -62_135_596_800;

/// A Kubernetes object as a generic JSON document
#[derive(Debug, Clone, PartialEq)]
pub struct KubeObject {
    fields: Map<String, Value>,
}

impl KubeObject {
    /// Parse the request's `object`.
    ///
    /// The document must be a JSON object carrying a string `kind`.
    pub fn parse(object: Option<&Value>) -> Result<Self> {
        let fields = match object {
            Some(Value::Object(fields)) => fields,
            Some(Value::Null) | None => {
                return Err(Error::ObjectParse("request carries no object".into()));
            }
            Some(other) => {
                return Err(Error::ObjectParse(format!(
                    "expected a JSON object, found {}",
                    json_type(other)
                )));
            }
        };

        match fields.get("kind") {
            Some(Value::String(kind)) if !kind.is_empty() => {}
            _ => return Err(Error::ObjectParse("object has no kind".into())),
        }

        Ok(Self {
            fields: fields.clone(),
        })
    }

    /// Walk `path` through nested objects; `None` if any step is missing or
    /// not an object
    #[must_use]
    pub fn nested_map(&self, path: &[&str]) -> Option<&Map<String, Value>> {
        path.iter()
            .try_fold(&self.fields, |map, key| map.get(*key)?.as_object())
    }

    /// `true` when `metadata.deletionTimestamp` holds a real (non-zero) time.
    ///
    /// Values that do not parse as RFC 3339 are treated as unset.
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        self.nested_map(&["metadata"])
            .and_then(|meta| meta.get("deletionTimestamp"))
            .and_then(Value::as_str)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .is_some_and(|ts| ts.timestamp() != ZERO_TIME_UNIX)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Result<KubeObject> {
        KubeObject::parse(Some(&value))
    }

    #[test]
    fn parse_requires_object_with_kind() {
        assert!(parse(json!({"kind": "Kustomization"})).is_ok());
        assert!(matches!(KubeObject::parse(None), Err(Error::ObjectParse(_))));
        assert!(matches!(parse(Value::Null), Err(Error::ObjectParse(_))));
        assert!(matches!(parse(json!([1, 2])), Err(Error::ObjectParse(_))));
        assert!(matches!(parse(json!({"spec": {}})), Err(Error::ObjectParse(_))));
        assert!(matches!(parse(json!({"kind": 3})), Err(Error::ObjectParse(_))));
    }

    #[test]
    fn nested_map_walks_objects_only() {
        let obj = parse(json!({
            "kind": "Kustomization",
            "spec": {"postBuild": {"substitute": {"A": "1"}}, "path": "./apps"}
        }))
        .unwrap();

        assert!(obj.nested_map(&["spec", "postBuild"]).is_some());
        assert_eq!(
            obj.nested_map(&["spec", "postBuild", "substitute"])
                .and_then(|m| m.get("A")),
            Some(&json!("1"))
        );
        assert!(obj.nested_map(&["spec", "path"]).is_none());
        assert!(obj.nested_map(&["status"]).is_none());
    }

    #[test]
    fn deletion_timestamp_marks_terminating() {
        let obj = parse(json!({
            "kind": "Kustomization",
            "metadata": {"deletionTimestamp": "2026-10-16T08:00:00Z"}
        }))
        .unwrap();
        assert!(obj.is_terminating());
    }

    #[test]
    fn zero_or_missing_deletion_timestamp_is_live() {
        for metadata in [
            json!({}),
            json!({"deletionTimestamp": null}),
            json!({"deletionTimestamp": "0001-01-01T00:00:00Z"}),
            json!({"deletionTimestamp": "yesterday"}),
        ] {
            let obj = parse(json!({"kind": "Kustomization", "metadata": metadata.clone()})).unwrap();
            assert!(!obj.is_terminating(), "{metadata}");
        }
    }
}
