//! Dynamic records
//!
//! A [`Record`] is one model instance as the hydrator sees it: declared
//! fields mapped to either a scalar, an unloaded key, a nested record or a
//! collection of records. Typed models convert to and from records through
//! JSON (see [`crate::model::core_trait::Model`]).

use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue};

use crate::backends::DatabaseValue;
use crate::error::{ModelError, ModelResult};
use crate::relationships::metadata::{FieldKind, ModelEntry};
use crate::relationships::registry::RelationshipGraph;

/// Value of one field of a [`Record`]
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Not loaded at this depth
    Absent,
    /// A scalar column value, or an explicit null relationship
    Value(DatabaseValue),
    /// Primary key of a related record that was not loaded
    Key(DatabaseValue),
    /// A loaded related record
    Entity(Box<Record>),
    /// Loaded related records
    Collection(Vec<Record>),
}

impl FieldValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Value(DatabaseValue::Null))
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            FieldValue::Absent => JsonValue::Null,
            FieldValue::Value(value) | FieldValue::Key(value) => value.to_json(),
            FieldValue::Entity(record) => record.to_json(),
            FieldValue::Collection(records) => {
                JsonValue::Array(records.iter().map(Record::to_json).collect())
            }
        }
    }
}

impl From<DatabaseValue> for FieldValue {
    fn from(value: DatabaseValue) -> Self {
        FieldValue::Value(value)
    }
}

impl From<Record> for FieldValue {
    fn from(record: Record) -> Self {
        FieldValue::Entity(Box::new(record))
    }
}

impl From<Vec<Record>> for FieldValue {
    fn from(records: Vec<Record>) -> Self {
        FieldValue::Collection(records)
    }
}

/// One model instance with its fields in declaration order
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    model: String,
    fields: IndexMap<String, FieldValue>,
}

impl Record {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Builder-style field assignment
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Scalar value or unloaded key of a field
    pub fn value(&self, field: &str) -> Option<&DatabaseValue> {
        match self.fields.get(field)? {
            FieldValue::Value(value) | FieldValue::Key(value) => Some(value),
            _ => None,
        }
    }

    pub fn entity(&self, field: &str) -> Option<&Record> {
        match self.fields.get(field)? {
            FieldValue::Entity(record) => Some(record),
            _ => None,
        }
    }

    pub fn collection(&self, field: &str) -> Option<&[Record]> {
        match self.fields.get(field)? {
            FieldValue::Collection(records) => Some(records),
            _ => None,
        }
    }

    /// Key of a relationship field, whether loaded or not
    pub fn related_key(&self, field: &str, related_pk: &str) -> Option<&DatabaseValue> {
        match self.fields.get(field)? {
            FieldValue::Key(value) | FieldValue::Value(value) => Some(value),
            FieldValue::Entity(record) => record.value(related_pk),
            _ => None,
        }
    }

    /// Sort a collection field by one of its records' fields
    pub fn sort_collection_by(&mut self, collection: &str, field: &str) {
        if let Some(FieldValue::Collection(records)) = self.fields.get_mut(collection) {
            records.sort_by_key(|record| match record.value(field) {
                Some(DatabaseValue::Int32(i)) => (0, i64::from(*i), String::new()),
                Some(DatabaseValue::Int64(i)) => (0, *i, String::new()),
                Some(other) => (1, 0, other.key_repr().unwrap_or_default()),
                None => (2, 0, String::new()),
            });
        }
    }

    pub fn to_json(&self) -> JsonValue {
        let object: Map<String, JsonValue> = self
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        JsonValue::Object(object)
    }

    /// Build a record of `model` from a JSON object, nested objects becoming related records
    pub fn from_json(graph: &RelationshipGraph, model: &str, json: &JsonValue) -> ModelResult<Self> {
        let entry = graph.entry(model)?;
        let object = json.as_object().ok_or_else(|| {
            ModelError::Serialization(format!("expected an object for model '{}', found {}", model, json))
        })?;

        if let Some(unknown) = object.keys().find(|key| !entry.fields.contains_key(*key)) {
            return Err(ModelError::Validation(format!(
                "model '{}' has no field '{}'",
                model, unknown
            )));
        }

        let mut record = Record::new(model);
        for (name, kind) in &entry.fields {
            let Some(json) = object.get(name) else { continue };
            record.set(name.clone(), field_from_json(graph, entry, name, kind, json)?);
        }
        Ok(record)
    }
}

fn field_from_json(
    graph: &RelationshipGraph,
    entry: &ModelEntry,
    name: &str,
    kind: &FieldKind,
    json: &JsonValue,
) -> ModelResult<FieldValue> {
    let invalid = |message: String| {
        ModelError::Serialization(format!("field '{}.{}': {}", entry.name, name, message))
    };

    let value = match kind {
        FieldKind::Scalar { ty, .. } => FieldValue::Value(ty.value_from_json(json).map_err(invalid)?),
        FieldKind::ForeignKey { target, key_type, .. } => match json {
            JsonValue::Null => FieldValue::Value(DatabaseValue::Null),
            JsonValue::Object(_) => Record::from_json(graph, target, json)?.into(),
            other => FieldValue::Key(key_type.value_from_json(other).map_err(invalid)?),
        },
        FieldKind::Inverse { target } => match json {
            JsonValue::Null => FieldValue::Absent,
            other => Record::from_json(graph, target, other)?.into(),
        },
        FieldKind::Collection { target } => match json {
            JsonValue::Null => FieldValue::Absent,
            JsonValue::Array(items) => FieldValue::Collection(
                items
                    .iter()
                    .map(|item| Record::from_json(graph, target, item))
                    .collect::<ModelResult<_>>()?,
            ),
            other => return Err(invalid(format!("expected a list, found {}", other))),
        },
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let id = uuid::Uuid::new_v4();
        let child = Record::new("Many").with("id", DatabaseValue::Int64(1));
        let record = Record::new("One")
            .with("id", DatabaseValue::Uuid(id))
            .with("owner", FieldValue::Key(DatabaseValue::Int64(9)))
            .with("best", child.clone())
            .with("many", vec![child.clone()]);

        assert_eq!(record.model(), "One");
        assert_eq!(record.value("id"), Some(&DatabaseValue::Uuid(id)));
        assert_eq!(record.value("owner"), Some(&DatabaseValue::Int64(9)));
        assert_eq!(record.entity("best"), Some(&child));
        assert_eq!(record.collection("many").map(<[Record]>::len), Some(1));
        assert_eq!(record.related_key("best", "id"), Some(&DatabaseValue::Int64(1)));
        assert!(record.get("missing").is_none());
    }

    #[test]
    fn test_to_json_renders_nested_records() {
        let record = Record::new("One")
            .with("id", DatabaseValue::Int64(1))
            .with("many", vec![Record::new("Many").with("id", DatabaseValue::Int64(2))])
            .with("other", FieldValue::Absent);

        assert_eq!(
            record.to_json(),
            serde_json::json!({"id": 1, "many": [{"id": 2}], "other": null})
        );
    }

    #[test]
    fn test_sort_collection_by() {
        let item = |id: i64| Record::new("Many").with("id", DatabaseValue::Int64(id));
        let mut record = Record::new("One").with("many", vec![item(3), item(1), item(2)]);

        record.sort_collection_by("many", "id");

        let ids: Vec<_> = record
            .collection("many")
            .unwrap()
            .iter()
            .map(|r| r.value("id").cloned())
            .collect();
        assert_eq!(
            ids,
            vec![
                Some(DatabaseValue::Int64(1)),
                Some(DatabaseValue::Int64(2)),
                Some(DatabaseValue::Int64(3))
            ]
        );
    }
}
