//! Model System - Declarations, records and typed models
//!
//! - `descriptor`: field and table declarations
//! - `record`: dynamic records produced by hydration
//! - `core_trait`: typed models converting to and from records
//! - `crud_operations`: insert, update and delete

pub mod core_trait;
pub mod crud_operations;
pub mod descriptor;
pub mod record;

// Re-export main types and traits for convenience
pub use core_trait::{ForeignRef, Model};
pub use crud_operations::CrudOperations;
pub use descriptor::{FieldDescriptor, ModelDescriptor, ScalarType, TableOptions, TypeDecl};
pub use record::{FieldValue, Record};
