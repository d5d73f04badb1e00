//! Relationships Module - Inference, back-reference resolution and hydration

pub mod back_reference;
pub mod hydration;
pub mod inference;
pub mod metadata;
pub mod registry;

// Re-export main types
pub use back_reference::{BackReferenceResolver, ResolvedRelationships};
pub use hydration::{FindOptions, Hydrator, Page};
pub use inference::{InferredModel, SchemaInferenceEngine};
pub use metadata::*;
pub use registry::{GraphStats, ModelRegistry, RelationshipGraph};
