//! Schema generation
//!
//! DDL for the schema inferred from model declarations.

pub mod schema_builder;

pub use schema_builder::{SchemaBuilder, SchemaDefinition, TableBuilder};
