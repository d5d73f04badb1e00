//! Relationship Metadata System - Tables, columns, field kinds and relationship edges

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::backends::SqlDialect;
use crate::model::descriptor::ScalarType;

/// Physical column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Boolean,
    Integer,
    BigInt,
    Double,
    Text,
    Uuid,
    Timestamp,
    Date,
    Time,
    Json,
    Bytes,
}

impl ColumnType {
    /// SQL type name for the given dialect
    pub fn sql_type(self, dialect: SqlDialect) -> &'static str {
        match dialect {
            SqlDialect::PostgreSQL => match self {
                ColumnType::Boolean => "BOOLEAN",
                ColumnType::Integer => "INTEGER",
                ColumnType::BigInt => "BIGINT",
                ColumnType::Double => "DOUBLE PRECISION",
                ColumnType::Text => "TEXT",
                ColumnType::Uuid => "UUID",
                ColumnType::Timestamp => "TIMESTAMPTZ",
                ColumnType::Date => "DATE",
                ColumnType::Time => "TIME",
                ColumnType::Json => "JSONB",
                ColumnType::Bytes => "BYTEA",
            },
            SqlDialect::MySQL => match self {
                ColumnType::Boolean => "BOOLEAN",
                ColumnType::Integer => "INT",
                ColumnType::BigInt => "BIGINT",
                ColumnType::Double => "DOUBLE",
                ColumnType::Text => "TEXT",
                ColumnType::Uuid => "CHAR(36)",
                ColumnType::Timestamp => "DATETIME",
                ColumnType::Date => "DATE",
                ColumnType::Time => "TIME",
                ColumnType::Json => "JSON",
                ColumnType::Bytes => "BLOB",
            },
            SqlDialect::SQLite => match self {
                ColumnType::Boolean | ColumnType::Integer | ColumnType::BigInt => "INTEGER",
                ColumnType::Double => "REAL",
                ColumnType::Bytes => "BLOB",
                _ => "TEXT",
            },
        }
    }

    /// Auto-incrementing key type, where the dialect has one
    pub fn serial_type(self, dialect: SqlDialect) -> Option<&'static str> {
        match (dialect, self) {
            (SqlDialect::PostgreSQL, ColumnType::Integer) => Some("SERIAL"),
            (SqlDialect::PostgreSQL, ColumnType::BigInt) => Some("BIGSERIAL"),
            _ => None,
        }
    }

    /// Whether storage can generate a key of this type
    pub fn is_generated_key(self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::BigInt | ColumnType::Uuid)
    }
}

/// Foreign key target of a column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnReference {
    pub table: String,
    pub column: String,
}

/// One physical column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub indexed: bool,
    pub references: Option<ColumnReference>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            primary_key: false,
            unique: false,
            indexed: false,
            references: None,
        }
    }
}

/// Physical table of one model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    /// Primary key column name
    pub primary_key: String,
    pub columns: Vec<ColumnDef>,
    pub unique_constraints: Vec<Vec<String>>,
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn primary_key_column(&self) -> Option<&ColumnDef> {
        self.column(&self.primary_key)
    }

    /// Columns carrying a foreign key reference
    pub fn foreign_keys(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|column| column.references.is_some())
    }
}

/// One side of a junction table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JunctionColumn {
    pub name: String,
    pub column_type: ColumnType,
    /// Referenced table and its primary key
    pub references: ColumnReference,
}

/// Two-column junction table for a many-to-many relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JunctionTableDef {
    pub name: String,
    pub left: JunctionColumn,
    pub right: JunctionColumn,
}

impl JunctionTableDef {
    pub fn column(&self, name: &str) -> Option<&JunctionColumn> {
        if self.left.name == name {
            Some(&self.left)
        } else if self.right.name == name {
            Some(&self.right)
        } else {
            None
        }
    }

    /// The column opposite to `name`
    pub fn other_column(&self, name: &str) -> Option<&JunctionColumn> {
        if self.left.name == name {
            Some(&self.right)
        } else if self.right.name == name {
            Some(&self.left)
        } else {
            None
        }
    }
}

/// Classification of a declared field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Plain column
    Scalar { ty: ScalarType, nullable: bool },
    /// Column holding the related model's primary key
    ForeignKey {
        target: String,
        nullable: bool,
        key_type: ScalarType,
    },
    /// Collection of related records with no column on this table
    Collection { target: String },
    /// Single related record owning the foreign key; no column on this table
    Inverse { target: String },
}

impl FieldKind {
    pub fn target(&self) -> Option<&str> {
        match self {
            FieldKind::Scalar { .. } => None,
            FieldKind::ForeignKey { target, .. }
            | FieldKind::Collection { target }
            | FieldKind::Inverse { target } => Some(target),
        }
    }

    pub fn is_relationship(&self) -> bool {
        self.target().is_some()
    }

    pub fn is_foreign_key_to(&self, model: &str) -> bool {
        matches!(self, FieldKind::ForeignKey { target, .. } if target == model)
    }

    pub fn is_collection_of(&self, model: &str) -> bool {
        matches!(self, FieldKind::Collection { target } if target == model)
    }
}

/// Defines the type of relationship between models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipType {
    /// Foreign key column on this table (many-to-one)
    BelongsTo,
    /// Single child owning a foreign key to this table (one-to-one)
    HasOne,
    /// Children owning a foreign key to this table (one-to-many)
    HasMany,
    /// Related records linked through a junction table
    ManyToMany,
}

impl RelationshipType {
    /// Returns true if this relationship returns a collection
    pub fn is_collection(self) -> bool {
        matches!(self, Self::HasMany | Self::ManyToMany)
    }

    /// Returns true if this relationship requires a pivot table
    pub fn requires_pivot(self) -> bool {
        matches!(self, Self::ManyToMany)
    }

    /// Returns true if the foreign key lives on this model's table
    pub fn owns_foreign_key(self) -> bool {
        matches!(self, Self::BelongsTo)
    }
}

/// Location of the foreign key column a relationship is loaded through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyConfig {
    /// Table holding the column
    pub table: String,
    pub column: String,
}

impl ForeignKeyConfig {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

/// Junction table columns as seen from one side of a many-to-many relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotConfig {
    pub table: String,
    /// Column holding this model's primary key
    pub local_key: String,
    /// Column holding the related model's primary key
    pub foreign_key: String,
}

/// One resolved relationship edge, keyed by its field name on the owning model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipMetadata {
    pub relationship_type: RelationshipType,
    /// Field name on the owning model
    pub name: String,
    pub related_model: String,
    pub related_table: String,
    /// Where the linking column lives; for many-to-many this is the local junction column
    pub foreign_key: ForeignKeyConfig,
    pub pivot_config: Option<PivotConfig>,
    /// Paired field on the related model
    pub inverse: Option<String>,
}

impl RelationshipMetadata {
    pub fn new(
        relationship_type: RelationshipType,
        name: impl Into<String>,
        related_model: impl Into<String>,
        related_table: impl Into<String>,
        foreign_key: ForeignKeyConfig,
    ) -> Self {
        Self {
            relationship_type,
            name: name.into(),
            related_model: related_model.into(),
            related_table: related_table.into(),
            foreign_key,
            pivot_config: None,
            inverse: None,
        }
    }

    pub fn with_pivot(mut self, pivot_config: PivotConfig) -> Self {
        self.pivot_config = Some(pivot_config);
        self
    }

    pub fn with_inverse(mut self, inverse: Option<String>) -> Self {
        self.inverse = inverse;
        self
    }
}

/// Everything known about one registered model after initialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub table: TableDef,
    /// Primary key field name
    pub primary_key: String,
    pub pk_type: ScalarType,
    /// Declared fields in declaration order
    pub fields: IndexMap<String, FieldKind>,
    /// Relationship edges keyed by field name, in declaration order
    pub relationships: IndexMap<String, RelationshipMetadata>,
}

impl ModelEntry {
    pub fn field(&self, name: &str) -> Option<&FieldKind> {
        self.fields.get(name)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipMetadata> {
        self.relationships.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn junction() -> JunctionTableDef {
        JunctionTableDef {
            name: "post__tag".to_string(),
            left: JunctionColumn {
                name: "post_id".to_string(),
                column_type: ColumnType::Uuid,
                references: ColumnReference {
                    table: "post".to_string(),
                    column: "id".to_string(),
                },
            },
            right: JunctionColumn {
                name: "tag_id".to_string(),
                column_type: ColumnType::Uuid,
                references: ColumnReference {
                    table: "tag".to_string(),
                    column: "id".to_string(),
                },
            },
        }
    }

    #[test]
    fn test_relationship_type_properties() {
        assert!(RelationshipType::HasMany.is_collection());
        assert!(RelationshipType::ManyToMany.is_collection());
        assert!(!RelationshipType::HasOne.is_collection());
        assert!(RelationshipType::ManyToMany.requires_pivot());
        assert!(RelationshipType::BelongsTo.owns_foreign_key());
        assert!(!RelationshipType::HasMany.owns_foreign_key());
    }

    #[test]
    fn test_junction_other_column() {
        let junction = junction();
        assert_eq!(junction.other_column("post_id").map(|c| c.name.as_str()), Some("tag_id"));
        assert_eq!(junction.other_column("tag_id").map(|c| c.name.as_str()), Some("post_id"));
        assert!(junction.other_column("nope").is_none());
    }

    #[test]
    fn test_field_kind_targets() {
        let fk = FieldKind::ForeignKey {
            target: "One".to_string(),
            nullable: false,
            key_type: ScalarType::Uuid,
        };
        assert!(fk.is_foreign_key_to("One"));
        assert!(!fk.is_collection_of("One"));
        assert_eq!(
            FieldKind::Scalar {
                ty: ScalarType::Text,
                nullable: true
            }
            .target(),
            None
        );
    }

    #[test]
    fn test_column_types_per_dialect() {
        assert_eq!(ColumnType::Uuid.sql_type(SqlDialect::PostgreSQL), "UUID");
        assert_eq!(ColumnType::Uuid.sql_type(SqlDialect::SQLite), "TEXT");
        assert_eq!(ColumnType::Json.sql_type(SqlDialect::PostgreSQL), "JSONB");
        assert_eq!(ColumnType::BigInt.serial_type(SqlDialect::PostgreSQL), Some("BIGSERIAL"));
        assert_eq!(ColumnType::Uuid.serial_type(SqlDialect::PostgreSQL), None);
    }
}
