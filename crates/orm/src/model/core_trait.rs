//! Core Model Trait - Typed models on top of dynamic records
//!
//! A typed model declares its shape once through [`Model::descriptor`] and
//! converts to and from [`Record`]s through serde. Relationship fields use
//! [`ForeignRef`] for single references and `Option<Vec<_>>` for collections,
//! so an unloaded relationship deserializes cleanly.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use super::descriptor::ModelDescriptor;
use super::record::Record;
use crate::error::ModelResult;
use crate::relationships::registry::RelationshipGraph;

/// Core trait for typed models
pub trait Model: Send + Sync + Debug + Serialize + for<'de> Deserialize<'de> {
    /// Registered model name
    fn model_name() -> &'static str;

    /// Field and table declarations for registration
    fn descriptor() -> ModelDescriptor;

    /// Convert this instance into a record; nested models become related records
    fn to_record(&self, graph: &RelationshipGraph) -> ModelResult<Record> {
        let json = serde_json::to_value(self)?;
        Record::from_json(graph, Self::model_name(), &json)
    }

    /// Build an instance from a hydrated record
    fn from_record(record: &Record) -> ModelResult<Self>
    where
        Self: Sized,
    {
        Ok(serde_json::from_value(record.to_json())?)
    }
}

/// A single relationship value: the related model when loaded, its key otherwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ForeignRef<T, K = uuid::Uuid> {
    Loaded(Box<T>),
    Key(K),
}

impl<T, K> ForeignRef<T, K> {
    pub fn loaded(value: T) -> Self {
        ForeignRef::Loaded(Box::new(value))
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, ForeignRef::Loaded(_))
    }

    pub fn as_loaded(&self) -> Option<&T> {
        match self {
            ForeignRef::Loaded(value) => Some(value),
            ForeignRef::Key(_) => None,
        }
    }

    pub fn as_key(&self) -> Option<&K> {
        match self {
            ForeignRef::Key(key) => Some(key),
            ForeignRef::Loaded(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Parent {
        id: uuid::Uuid,
        name: String,
    }

    #[test]
    fn test_foreign_ref_deserializes_key_or_model() {
        let id = uuid::Uuid::new_v4();

        let key: ForeignRef<Parent> = serde_json::from_value(serde_json::json!(id.to_string())).unwrap();
        assert_eq!(key.as_key(), Some(&id));
        assert!(!key.is_loaded());

        let loaded: ForeignRef<Parent> =
            serde_json::from_value(serde_json::json!({"id": id.to_string(), "name": "p"})).unwrap();
        assert_eq!(loaded.as_loaded().map(|p| p.name.as_str()), Some("p"));
    }

    #[test]
    fn test_foreign_ref_serializes_transparently() {
        let ref_: ForeignRef<Parent, i64> = ForeignRef::Key(4);
        assert_eq!(serde_json::to_value(&ref_).unwrap(), serde_json::json!(4));
    }
}
