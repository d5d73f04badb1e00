//! # relgraph-orm
//!
//! Relationship-aware ORM core. Models are declared with plain field types;
//! foreign keys, one-to-many and many-to-many relationships, junction tables
//! and the physical schema are inferred from those declarations. Records are
//! loaded with depth-bounded hydration over a pluggable storage engine.
//!
//! ```ignore
//! let mut db = Database::new(MemoryStorage::new(), OrmConfig::default());
//! db.register::<One>()?;
//! db.register::<Many>()?;
//! db.init()?;
//!
//! let one = db.crud::<One>().find_one(id, 2).await?;
//! ```

pub mod backends;
pub mod config;
pub mod database;
pub mod error;
pub mod migrations;
pub mod model;
pub mod naming;
pub mod relationships;


// Re-export core traits and types
pub use backends::{
    DatabaseValue, Filter, MemoryStorage, Order, PostgresStorage, Row, SqlDialect, StorageEngine, StorageStats,
};
pub use config::{ConfigError, OrmConfig};
pub use database::{Crud, Database};
pub use error::*;
pub use migrations::SchemaDefinition;
pub use model::{FieldValue, ForeignRef, Model, ModelDescriptor, Record, ScalarType, TypeDecl};
pub use relationships::{
    FieldKind, FindOptions, ModelRegistry, Page, RelationshipGraph, RelationshipMetadata, RelationshipType,
};
