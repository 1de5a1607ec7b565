//! Validation boundary between raw remote JSON and [`RemoteRecord`].

use std::collections::BTreeMap;

use serde_json::Value;

use portal_core::config::SourceConfig;
use portal_core::types::RemoteRecord;

use crate::error::RecordRejection;

const ANNOTATIONS_FIELD: &str = "annotations";

/// Shape every fetched item must have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    /// Field holding the stable remote identifier (string or integer).
    pub id_field: String,
    /// Fields that must be present and non-null.
    pub required_fields: Vec<String>,
}

impl Default for RecordSchema {
    fn default() -> Self {
        Self {
            id_field: "id".to_string(),
            required_fields: vec![],
        }
    }
}

impl From<&SourceConfig> for RecordSchema {
    fn from(source: &SourceConfig) -> Self {
        Self {
            id_field: source.id_field.clone(),
            required_fields: source.required_fields.clone(),
        }
    }
}

impl RecordSchema {
    /// Validate item `index` of a fetch.
    pub fn validate(&self, index: usize, raw: Value) -> Result<RemoteRecord, RecordRejection> {
        let Value::Object(mut fields) = raw else {
            return Err(RecordRejection::NotAnObject { index });
        };

        let id = match fields.get(&self.id_field) {
            Some(Value::String(id)) if !id.trim().is_empty() => id.trim().to_string(),
            Some(Value::Number(id)) if id.is_i64() || id.is_u64() => id.to_string(),
            _ => {
                return Err(RecordRejection::MissingId {
                    index,
                    field: self.id_field.clone(),
                })
            }
        };

        for field in &self.required_fields {
            if fields.get(field).map_or(true, Value::is_null) {
                return Err(RecordRejection::MissingField {
                    id,
                    field: field.clone(),
                });
            }
        }

        let annotations = match fields.remove(ANNOTATIONS_FIELD) {
            Some(Value::Object(raw)) => raw
                .into_iter()
                .filter_map(|(key, value)| match value {
                    Value::String(value) => Some((key, value)),
                    _ => None,
                })
                .collect(),
            Some(other) => {
                // not an annotation map; keep it as an ordinary field
                fields.insert(ANNOTATIONS_FIELD.to_string(), other);
                BTreeMap::new()
            }
            None => BTreeMap::new(),
        };

        Ok(RemoteRecord {
            id,
            fields,
            annotations,
        })
    }

    /// Validate every item, splitting accepted records from rejections.
    pub fn validate_all(&self, items: Vec<Value>) -> (Vec<RemoteRecord>, Vec<RecordRejection>) {
        let mut records = Vec::with_capacity(items.len());
        let mut rejected = Vec::new();
        for (index, raw) in items.into_iter().enumerate() {
            match self.validate(index, raw) {
                Ok(record) => records.push(record),
                Err(rejection) => rejected.push(rejection),
            }
        }
        (records, rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn schema(required: &[&str]) -> RecordSchema {
        RecordSchema {
            id_field: "id".to_string(),
            required_fields: required.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn accepts_object_with_id() {
        let record = schema(&[])
            .validate(0, json!({"id": "r1", "name": "repo"}))
            .unwrap();
        assert_eq!(record.id, "r1");
        assert_eq!(record.field_str("name"), Some("repo"));
    }

    #[test]
    fn integer_ids_are_stringified() {
        let record = schema(&[]).validate(0, json!({"id": 42})).unwrap();
        assert_eq!(record.id, "42");
    }

    #[rstest]
    #[case(json!("just a string"))]
    #[case(json!([1, 2]))]
    #[case(json!(null))]
    fn non_objects_rejected(#[case] raw: Value) {
        assert_eq!(
            schema(&[]).validate(3, raw),
            Err(RecordRejection::NotAnObject { index: 3 })
        );
    }

    #[rstest]
    #[case(json!({}))]
    #[case(json!({"id": ""}))]
    #[case(json!({"id": 1.5}))]
    #[case(json!({"id": {"nested": 1}}))]
    fn unusable_ids_rejected(#[case] raw: Value) {
        assert!(matches!(
            schema(&[]).validate(0, raw),
            Err(RecordRejection::MissingId { .. })
        ));
    }

    #[test]
    fn required_fields_enforced() {
        let err = schema(&["owner"])
            .validate(0, json!({"id": "r1", "owner": null}))
            .unwrap_err();
        assert_eq!(
            err,
            RecordRejection::MissingField {
                id: "r1".to_string(),
                field: "owner".to_string()
            }
        );
    }

    #[test]
    fn string_annotations_are_lifted() {
        let record = schema(&[])
            .validate(
                0,
                json!({"id": "r1", "annotations": {"a/b": "c", "count": 3}}),
            )
            .unwrap();
        assert_eq!(record.annotations.get("a/b").map(String::as_str), Some("c"));
        assert!(!record.annotations.contains_key("count"));
        assert!(!record.fields.contains_key("annotations"));
    }

    #[test]
    fn custom_id_field() {
        let schema = RecordSchema {
            id_field: "uuid".to_string(),
            required_fields: vec![],
        };
        assert_eq!(schema.validate(0, json!({"uuid": "u-1"})).unwrap().id, "u-1");
    }

    #[test]
    fn validate_all_splits_results() {
        let (records, rejected) = schema(&[]).validate_all(vec![
            json!({"id": "a"}),
            json!(7),
            json!({"id": "b"}),
        ]);
        assert_eq!(records.len(), 2);
        assert_eq!(rejected, vec![RecordRejection::NotAnObject { index: 1 }]);
    }
}
