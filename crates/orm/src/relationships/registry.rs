//! Model Registry - Declarations and the initialized relationship graph
//!
//! Models are declared one at a time with [`ModelRegistry::table`]. Nothing
//! that depends on other models is checked until [`ModelRegistry::init`],
//! which classifies every field, resolves back-references and freezes the
//! result into an immutable [`RelationshipGraph`] shared behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use super::back_reference::BackReferenceResolver;
use super::inference::{validate_declaration, SchemaInferenceEngine};
use super::metadata::{FieldKind, JunctionTableDef, ModelEntry, RelationshipMetadata, RelationshipType, TableDef};
use crate::error::{ModelError, ModelResult, SchemaError, SchemaResult};
use crate::migrations::SchemaDefinition;
use crate::model::core_trait::Model;
use crate::model::descriptor::ModelDescriptor;

/// Immutable relationship graph of an initialized declaration set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationshipGraph {
    models: IndexMap<String, ModelEntry>,
    junctions: IndexMap<String, JunctionTableDef>,
}

/// Relationship graph statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub total_models: usize,
    pub total_relationships: usize,
    pub junction_tables: usize,
    pub relationships_by_type: HashMap<String, usize>,
}

impl RelationshipGraph {
    /// Run inference and back-reference resolution over a complete declaration set
    pub fn build(declarations: &[ModelDescriptor]) -> SchemaResult<Self> {
        let mut declared: IndexMap<String, ModelDescriptor> = IndexMap::with_capacity(declarations.len());
        for descriptor in declarations {
            validate_declaration(descriptor)?;
            if declared.insert(descriptor.name.clone(), descriptor.clone()).is_some() {
                return Err(SchemaError::configuration(&descriptor.name, "model is declared twice"));
            }
        }

        let engine = SchemaInferenceEngine::new(&declared);
        let mut inferred = IndexMap::with_capacity(declared.len());
        let mut tables: HashMap<String, String> = HashMap::new();
        for descriptor in declared.values() {
            let model = engine.infer_model(descriptor)?;
            if let Some(other) = tables.insert(model.table.name.clone(), descriptor.name.clone()) {
                return Err(SchemaError::configuration(
                    &descriptor.name,
                    format!("table '{}' is already used by model '{}'", model.table.name, other),
                ));
            }
            inferred.insert(descriptor.name.clone(), model);
        }

        let mut resolved = BackReferenceResolver::new(&inferred).resolve()?;

        for name in resolved.junctions.keys() {
            if let Some(model) = tables.get(name) {
                return Err(SchemaError::configuration(
                    model,
                    format!("table name '{}' collides with a junction table", name),
                ));
            }
        }

        for (model, field) in &resolved.inverse_fields {
            if let Some(entry) = inferred.get_mut(model) {
                if let Some(kind) = entry.fields.get_mut(field) {
                    let target = kind.target().unwrap_or_default().to_string();
                    *kind = FieldKind::Inverse { target };
                }
                entry.table.columns.retain(|column| column.name != *field);
            }
        }

        let models = inferred
            .into_iter()
            .map(|(name, model)| {
                let relationships = resolved.relationships.shift_remove(&name).unwrap_or_default();
                let entry = ModelEntry {
                    name: name.clone(),
                    primary_key: model.descriptor.options.pk.clone(),
                    pk_type: model.pk_type,
                    table: model.table,
                    fields: model.fields,
                    relationships,
                };
                (name, entry)
            })
            .collect();

        Ok(Self {
            models,
            junctions: resolved.junctions,
        })
    }

    /// Entry of a registered model
    pub fn entry(&self, model: &str) -> ModelResult<&ModelEntry> {
        self.models
            .get(model)
            .ok_or_else(|| ModelError::UnknownModel(model.to_string()))
    }

    pub fn model(&self, model: &str) -> Option<&ModelEntry> {
        self.models.get(model)
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelEntry> {
        self.models.values()
    }

    /// Table definition of a registered model
    pub fn table(&self, model: &str) -> Option<&TableDef> {
        self.models.get(model).map(|entry| &entry.table)
    }

    /// Relationships declared on a model, in field order
    pub fn relations(&self, model: &str) -> ModelResult<impl Iterator<Item = &RelationshipMetadata>> {
        Ok(self.entry(model)?.relationships.values())
    }

    pub fn junction(&self, name: &str) -> ModelResult<&JunctionTableDef> {
        self.junctions
            .get(name)
            .ok_or_else(|| ModelError::Query(format!("junction table '{}' is not part of the schema", name)))
    }

    pub fn junctions(&self) -> impl Iterator<Item = &JunctionTableDef> {
        self.junctions.values()
    }

    pub fn relationship(&self, model: &str, field: &str) -> Option<&RelationshipMetadata> {
        self.models.get(model)?.relationships.get(field)
    }

    /// Relationships whose related model is `model`
    pub fn relationships_targeting<'a>(
        &'a self,
        model: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a RelationshipMetadata)> + 'a {
        self.models.values().flat_map(move |entry| {
            entry
                .relationships
                .values()
                .filter(move |relationship| relationship.related_model == model)
                .map(move |relationship| (entry.name.as_str(), relationship))
        })
    }

    /// Physical schema: model tables first, then junction tables
    pub fn schema(&self) -> SchemaDefinition {
        SchemaDefinition {
            tables: self.models.values().map(|entry| entry.table.clone()).collect(),
            junctions: self.junctions.values().cloned().collect(),
        }
    }

    /// Get registry statistics
    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            total_models: self.models.len(),
            junction_tables: self.junctions.len(),
            ..GraphStats::default()
        };

        for relationship in self.models.values().flat_map(|entry| entry.relationships.values()) {
            stats.total_relationships += 1;
            let key = match relationship.relationship_type {
                RelationshipType::BelongsTo => "belongs_to",
                RelationshipType::HasOne => "has_one",
                RelationshipType::HasMany => "has_many",
                RelationshipType::ManyToMany => "many_to_many",
            };
            *stats.relationships_by_type.entry(key.to_string()).or_default() += 1;
        }

        stats
    }
}

/// Mutable set of model declarations
#[derive(Debug, Default)]
pub struct ModelRegistry {
    declarations: IndexMap<String, ModelDescriptor>,
    initialized: Option<(Vec<ModelDescriptor>, Arc<RelationshipGraph>)>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a model. Options are checked now; cross-model checks wait for `init`.
    ///
    /// Declaring an existing name again replaces the earlier declaration.
    pub fn table(&mut self, descriptor: ModelDescriptor) -> SchemaResult<()> {
        validate_declaration(&descriptor)?;

        match self.declarations.get(&descriptor.name) {
            Some(existing) if *existing == descriptor => {}
            Some(_) => {
                tracing::debug!(model = %descriptor.name, "replacing model declaration");
                self.declarations.insert(descriptor.name.clone(), descriptor);
            }
            None => {
                tracing::debug!(model = %descriptor.name, fields = descriptor.fields.len(), "declared model");
                self.declarations.insert(descriptor.name.clone(), descriptor);
            }
        }
        Ok(())
    }

    /// Declare a typed model
    pub fn register<T: Model>(&mut self) -> SchemaResult<()> {
        self.table(T::descriptor())
    }

    pub fn is_declared(&self, model: &str) -> bool {
        self.declarations.contains_key(model)
    }

    pub fn declarations(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.declarations.values()
    }

    /// Graph from the last successful `init`
    pub fn graph(&self) -> Option<Arc<RelationshipGraph>> {
        self.initialized.as_ref().map(|(_, graph)| Arc::clone(graph))
    }

    /// Build the relationship graph for the current declarations.
    ///
    /// Unchanged declarations return the cached graph. On error the previous
    /// graph stays in place.
    pub fn init(&mut self) -> SchemaResult<Arc<RelationshipGraph>> {
        let declarations: Vec<ModelDescriptor> = self.declarations.values().cloned().collect();

        if let Some((cached, graph)) = &self.initialized {
            if *cached == declarations {
                tracing::trace!("declarations unchanged; reusing relationship graph");
                return Ok(Arc::clone(graph));
            }
        }

        let graph = match RelationshipGraph::build(&declarations) {
            Ok(graph) => Arc::new(graph),
            Err(error) => {
                tracing::warn!(model = %error.model(), error = %error, "model initialization failed");
                return Err(error);
            }
        };

        let stats = graph.stats();
        tracing::info!(
            models = stats.total_models,
            relationships = stats.total_relationships,
            junctions = stats.junction_tables,
            "relationship graph initialized"
        );

        self.initialized = Some((declarations, Arc::clone(&graph)));
        Ok(graph)
    }
}
