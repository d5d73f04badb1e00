//! Model Declarations - Explicit field and option descriptors for models
//!
//! A [`ModelDescriptor`] is the static shape of one model: its ordered fields
//! with declared types, plus table options (primary key, indexes,
//! back-references). Relationship kinds are not declared here. They are
//! inferred from the declared types when the registry is initialized.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::backends::DatabaseValue;
use crate::relationships::metadata::ColumnType;

/// Scalar types with a fixed physical column mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    Bool,
    Int32,
    Int64,
    Float64,
    Text,
    Uuid,
    DateTime,
    Date,
    Time,
    Json,
    Bytes,
}

impl ScalarType {
    /// Resolve a scalar type from a type name or common alias
    pub fn from_name(name: &str) -> Option<Self> {
        let scalar = match name.trim().to_ascii_lowercase().as_str() {
            "bool" | "boolean" => ScalarType::Bool,
            "i32" | "int" | "int4" | "integer" => ScalarType::Int32,
            "i64" | "int8" | "bigint" | "long" => ScalarType::Int64,
            "f64" | "f32" | "float" | "double" | "real" => ScalarType::Float64,
            "string" | "str" | "&str" | "text" | "varchar" => ScalarType::Text,
            "uuid" => ScalarType::Uuid,
            "datetime" | "datetime<utc>" | "timestamp" | "timestamptz" => ScalarType::DateTime,
            "date" | "naivedate" => ScalarType::Date,
            "time" | "naivetime" => ScalarType::Time,
            "json" | "jsonb" | "value" | "dict" | "map" => ScalarType::Json,
            "bytes" | "vec<u8>" | "bytea" => ScalarType::Bytes,
            _ => return None,
        };
        Some(scalar)
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Int32 => "i32",
            ScalarType::Int64 => "i64",
            ScalarType::Float64 => "f64",
            ScalarType::Text => "String",
            ScalarType::Uuid => "Uuid",
            ScalarType::DateTime => "DateTime",
            ScalarType::Date => "NaiveDate",
            ScalarType::Time => "NaiveTime",
            ScalarType::Json => "Json",
            ScalarType::Bytes => "Bytes",
        }
    }

    /// Physical column type for this scalar
    pub fn column_type(self) -> ColumnType {
        match self {
            ScalarType::Bool => ColumnType::Boolean,
            ScalarType::Int32 => ColumnType::Integer,
            ScalarType::Int64 => ColumnType::BigInt,
            ScalarType::Float64 => ColumnType::Double,
            ScalarType::Text => ColumnType::Text,
            ScalarType::Uuid => ColumnType::Uuid,
            ScalarType::DateTime => ColumnType::Timestamp,
            ScalarType::Date => ColumnType::Date,
            ScalarType::Time => ColumnType::Time,
            ScalarType::Json => ColumnType::Json,
            ScalarType::Bytes => ColumnType::Bytes,
        }
    }

    /// Convert a JSON value (as produced by serde for this scalar) to a database value
    pub fn value_from_json(self, json: &JsonValue) -> Result<DatabaseValue, String> {
        if json.is_null() {
            return Ok(DatabaseValue::Null);
        }

        let mismatch = || format!("expected {} but found {}", self.name(), json);

        match self {
            ScalarType::Bool => json.as_bool().map(DatabaseValue::Bool).ok_or_else(mismatch),
            ScalarType::Int32 => json
                .as_i64()
                .and_then(|i| i32::try_from(i).ok())
                .map(DatabaseValue::Int32)
                .ok_or_else(mismatch),
            ScalarType::Int64 => json.as_i64().map(DatabaseValue::Int64).ok_or_else(mismatch),
            ScalarType::Float64 => json.as_f64().map(DatabaseValue::Float64).ok_or_else(mismatch),
            ScalarType::Text => json
                .as_str()
                .map(|s| DatabaseValue::String(s.to_string()))
                .ok_or_else(mismatch),
            ScalarType::Uuid => json
                .as_str()
                .and_then(|s| uuid::Uuid::parse_str(s).ok())
                .map(DatabaseValue::Uuid)
                .ok_or_else(mismatch),
            ScalarType::DateTime => json
                .as_str()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| DatabaseValue::DateTime(dt.with_timezone(&chrono::Utc)))
                .ok_or_else(mismatch),
            ScalarType::Date => json
                .as_str()
                .and_then(|s| s.parse::<chrono::NaiveDate>().ok())
                .map(DatabaseValue::Date)
                .ok_or_else(mismatch),
            ScalarType::Time => json
                .as_str()
                .and_then(|s| s.parse::<chrono::NaiveTime>().ok())
                .map(DatabaseValue::Time)
                .ok_or_else(mismatch),
            ScalarType::Json => Ok(DatabaseValue::Json(json.clone())),
            ScalarType::Bytes => serde_json::from_value::<Vec<u8>>(json.clone())
                .map(DatabaseValue::Bytes)
                .map_err(|_| mismatch()),
        }
    }
}

/// Declared type of a model field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeDecl {
    /// A known scalar
    Scalar(ScalarType),
    /// A registered model name, or a scalar alias such as `"uuid"`
    Named(String),
    /// The inner type or null
    Optional(Box<TypeDecl>),
    /// A collection of the inner type
    List(Box<TypeDecl>),
    /// Any of the member types
    Union(Vec<TypeDecl>),
}

impl TypeDecl {
    pub fn scalar(ty: ScalarType) -> Self {
        TypeDecl::Scalar(ty)
    }

    /// Reference to a model (or a scalar alias) by name
    pub fn named(name: impl Into<String>) -> Self {
        TypeDecl::Named(name.into())
    }

    pub fn optional(inner: TypeDecl) -> Self {
        TypeDecl::Optional(Box::new(inner))
    }

    pub fn list(inner: TypeDecl) -> Self {
        TypeDecl::List(Box::new(inner))
    }

    pub fn union(members: impl IntoIterator<Item = TypeDecl>) -> Self {
        TypeDecl::Union(members.into_iter().collect())
    }

    /// Make this declaration nullable
    pub fn nullable(self) -> Self {
        TypeDecl::optional(self)
    }

    /// Human readable rendering, used in error messages
    pub fn describe(&self) -> String {
        match self {
            TypeDecl::Scalar(scalar) => scalar.name().to_string(),
            TypeDecl::Named(name) => name.clone(),
            TypeDecl::Optional(inner) => format!("{} | None", inner.describe()),
            TypeDecl::List(inner) => format!("list[{}]", inner.describe()),
            TypeDecl::Union(members) => members
                .iter()
                .map(TypeDecl::describe)
                .collect::<Vec<_>>()
                .join(" | "),
        }
    }
}

impl From<ScalarType> for TypeDecl {
    fn from(scalar: ScalarType) -> Self {
        TypeDecl::Scalar(scalar)
    }
}

/// One declared field of a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: TypeDecl,
}

/// Registration options for a model's table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOptions {
    /// Explicit table name; defaults to the snake-cased model name
    pub tablename: Option<String>,
    /// Primary key field name
    pub pk: String,
    pub indexed: Vec<String>,
    pub unique: Vec<String>,
    pub unique_constraints: Vec<Vec<String>>,
    /// Relationship field on this model -> field on the related model pointing back here
    pub back_references: IndexMap<String, String>,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            tablename: None,
            pk: "id".to_string(),
            indexed: Vec::new(),
            unique: Vec::new(),
            unique_constraints: Vec::new(),
            back_references: IndexMap::new(),
        }
    }
}

/// Static shape of one model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
    pub options: TableOptions,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            options: TableOptions::default(),
        }
    }

    /// Append a field declaration
    pub fn field(mut self, name: impl Into<String>, ty: impl Into<TypeDecl>) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            ty: ty.into(),
        });
        self
    }

    /// Set the primary key field (defaults to `id`)
    pub fn pk(mut self, field: impl Into<String>) -> Self {
        self.options.pk = field.into();
        self
    }

    pub fn tablename(mut self, tablename: impl Into<String>) -> Self {
        self.options.tablename = Some(tablename.into());
        self
    }

    pub fn indexed(mut self, field: impl Into<String>) -> Self {
        self.options.indexed.push(field.into());
        self
    }

    pub fn unique(mut self, field: impl Into<String>) -> Self {
        self.options.unique.push(field.into());
        self
    }

    pub fn unique_together<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options
            .unique_constraints
            .push(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Declare that `field` on this model is paired with `target_field` on the related model
    pub fn back_reference(mut self, field: impl Into<String>, target_field: impl Into<String>) -> Self {
        self.options
            .back_references
            .insert(field.into(), target_field.into());
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.get_field(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_aliases() {
        assert_eq!(ScalarType::from_name("uuid"), Some(ScalarType::Uuid));
        assert_eq!(ScalarType::from_name("String"), Some(ScalarType::Text));
        assert_eq!(ScalarType::from_name("i64"), Some(ScalarType::Int64));
        assert_eq!(ScalarType::from_name("Decimal"), None);
    }

    #[test]
    fn test_describe_renders_unions() {
        let ty = TypeDecl::optional(TypeDecl::union([
            TypeDecl::named("One"),
            TypeDecl::scalar(ScalarType::Uuid),
        ]));
        assert_eq!(ty.describe(), "One | Uuid | None");
        assert_eq!(TypeDecl::list(TypeDecl::named("Many")).describe(), "list[Many]");
    }

    #[test]
    fn test_descriptor_builder() {
        let descriptor = ModelDescriptor::new("One")
            .field("id", ScalarType::Uuid)
            .field("many_a", TypeDecl::list(TypeDecl::named("Many")).nullable())
            .back_reference("many_a", "one_a")
            .unique("id");

        assert_eq!(descriptor.options.pk, "id");
        assert_eq!(descriptor.fields.len(), 2);
        assert!(descriptor.has_field("many_a"));
        assert_eq!(
            descriptor.options.back_references.get("many_a").map(String::as_str),
            Some("one_a")
        );
    }

    #[test]
    fn test_value_from_json() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(
            ScalarType::Uuid.value_from_json(&JsonValue::String(id.to_string())),
            Ok(DatabaseValue::Uuid(id))
        );
        assert_eq!(
            ScalarType::Int64.value_from_json(&serde_json::json!(7)),
            Ok(DatabaseValue::Int64(7))
        );
        assert_eq!(ScalarType::Text.value_from_json(&JsonValue::Null), Ok(DatabaseValue::Null));
        assert!(ScalarType::Bool.value_from_json(&serde_json::json!("yes")).is_err());
    }
}
