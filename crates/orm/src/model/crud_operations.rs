//! CRUD Operations - Insert, update and delete for records
//!
//! Writes touch one model row plus its junction links. Nested records are
//! never written: a related record given for a foreign key contributes only
//! its primary key, and records listed in a many-to-many collection only get
//! linked. Collections owned by a child's foreign key are left to the child.
//!
//! Every check runs before the first storage call, so a rejected write leaves
//! storage as it was.

use crate::backends::{DatabaseValue, Row, StorageEngine};
use crate::error::{ModelError, ModelResult};
use crate::model::record::{FieldValue, Record};
use crate::relationships::metadata::{FieldKind, JunctionTableDef, ModelEntry, RelationshipMetadata, RelationshipType};
use crate::relationships::registry::RelationshipGraph;

/// Junction rows to add once the owning row's key is known
struct PendingLinks<'g> {
    junction: &'g JunctionTableDef,
    /// The owning record's key goes in the junction's left column
    owner_left: bool,
    remotes: Vec<DatabaseValue>,
}

/// Write path for records
pub struct CrudOperations<'a> {
    graph: &'a RelationshipGraph,
    storage: &'a dyn StorageEngine,
}

impl<'a> CrudOperations<'a> {
    pub fn new(graph: &'a RelationshipGraph, storage: &'a dyn StorageEngine) -> Self {
        Self { graph, storage }
    }

    /// Insert a record and link its many-to-many collections.
    ///
    /// Returns the record with its primary key set.
    pub async fn insert(&self, mut record: Record) -> ModelResult<Record> {
        let entry = self.graph.entry(record.model())?;
        let row = self.build_row(entry, &record, false)?;
        let links = self.plan_links(entry, &record)?;

        let key = self.storage.insert_row(&entry.table, row).await?;
        tracing::debug!(model = %entry.name, key = %key, "inserted record");

        record.set(entry.primary_key.clone(), FieldValue::Value(key.clone()));
        self.link(&links, &key).await?;
        Ok(record)
    }

    /// Overwrite the given columns of an existing record and add missing links
    pub async fn update(&self, record: Record) -> ModelResult<Record> {
        let entry = self.graph.entry(record.model())?;
        let key = required_key(entry, &record)?;
        let row = self.build_row(entry, &record, true)?;
        let links = self.plan_links(entry, &record)?;

        if !self.storage.update_row(&entry.table, &key, row).await? {
            return Err(ModelError::NotFound(entry.table.name.clone()));
        }
        tracing::debug!(model = %entry.name, key = %key, "updated record");

        self.link(&links, &key).await?;
        Ok(record)
    }

    /// Insert a record without a primary key; otherwise update the row with
    /// that key, inserting it under the given key when it does not exist.
    ///
    /// The update branch is link-only, the same as [`CrudOperations::update`].
    pub async fn upsert(&self, record: Record) -> ModelResult<Record> {
        let entry = self.graph.entry(record.model())?;
        let Some(key) = record.value(&entry.primary_key).filter(|key| !key.is_null()).cloned() else {
            return self.insert(record).await;
        };

        let changes = self.build_row(entry, &record, true)?;
        let links = self.plan_links(entry, &record)?;

        if self.storage.update_row(&entry.table, &key, changes).await? {
            tracing::debug!(model = %entry.name, key = %key, "upsert updated record");
        } else {
            // a missing row needs every required column
            let full = self.build_row(entry, &record, false)?;
            self.storage.insert_row(&entry.table, full).await?;
            tracing::debug!(model = %entry.name, key = %key, "upsert inserted record");
        }

        self.link(&links, &key).await?;
        Ok(record)
    }

    /// Delete a record and every junction link that references it.
    ///
    /// Returns false if no such record existed.
    pub async fn delete(&self, model: &str, key: &DatabaseValue) -> ModelResult<bool> {
        let entry = self.graph.entry(model)?;

        for relationship in entry.relationships.values() {
            if let Some(pivot) = &relationship.pivot_config {
                let junction = self.graph.junction(&pivot.table)?;
                let removed = self.storage.delete_junction(junction, &pivot.local_key, key).await?;
                tracing::trace!(junction = %junction.name, removed, "removed links");
            }
        }

        let deleted = self.storage.delete_row(&entry.table, key).await?;
        tracing::debug!(model = %model, key = %key, deleted, "deleted record");
        Ok(deleted)
    }

    /// Column values of a record. On update, fields the record leaves out are left untouched.
    fn build_row(&self, entry: &ModelEntry, record: &Record, for_update: bool) -> ModelResult<Row> {
        if let Some((unknown, _)) = record.fields().find(|(name, _)| !entry.fields.contains_key(*name)) {
            return Err(ModelError::Validation(format!(
                "model '{}' has no field '{}'",
                entry.name, unknown
            )));
        }

        let mut row = Row::with_capacity(entry.table.columns.len());
        for column in &entry.table.columns {
            if for_update && column.primary_key {
                continue;
            }

            let value = match record.get(&column.name) {
                None | Some(FieldValue::Absent) if for_update => continue,
                None | Some(FieldValue::Absent) => DatabaseValue::Null,
                Some(FieldValue::Value(value)) | Some(FieldValue::Key(value)) => value.clone(),
                Some(FieldValue::Entity(related)) => self.foreign_key_of(entry, &column.name, related)?,
                Some(FieldValue::Collection(_)) => {
                    return Err(ModelError::Validation(format!(
                        "field '{}.{}' holds a single value, not a list",
                        entry.name, column.name
                    )))
                }
            };

            if value.is_null() && !column.nullable && !column.primary_key {
                return Err(ModelError::Validation(format!(
                    "field '{}.{}' is required",
                    entry.name, column.name
                )));
            }
            row.insert(column.name.clone(), value);
        }
        Ok(row)
    }

    /// Primary key of a related record given for a foreign key field
    fn foreign_key_of(&self, entry: &ModelEntry, field: &str, related: &Record) -> ModelResult<DatabaseValue> {
        let Some(FieldKind::ForeignKey { target, .. }) = entry.fields.get(field) else {
            return Err(ModelError::Validation(format!(
                "field '{}.{}' is not a relationship",
                entry.name, field
            )));
        };

        if related.model() != target {
            return Err(ModelError::Validation(format!(
                "field '{}.{}' expects '{}', got '{}'",
                entry.name,
                field,
                target,
                related.model()
            )));
        }

        let target_entry = self.graph.entry(target)?;
        related
            .value(&target_entry.primary_key)
            .filter(|key| !key.is_null())
            .cloned()
            .ok_or_else(|| {
                ModelError::Validation(format!(
                    "related '{}' for '{}.{}' has no primary key; insert it first",
                    target, entry.name, field
                ))
            })
    }

    /// Check every many-to-many collection and collect the links it asks for
    fn plan_links(&self, entry: &ModelEntry, record: &Record) -> ModelResult<Vec<PendingLinks<'a>>> {
        let mut planned = Vec::new();

        for relationship in entry.relationships.values() {
            let value = record.get(&relationship.name);
            match relationship.relationship_type {
                RelationshipType::ManyToMany => {
                    if let Some(FieldValue::Collection(items)) = value {
                        planned.push(self.plan_many_to_many(relationship, items)?);
                    }
                }
                RelationshipType::HasMany | RelationshipType::HasOne => {
                    let given = matches!(value, Some(FieldValue::Entity(_)))
                        || matches!(value, Some(FieldValue::Collection(items)) if !items.is_empty());
                    if given {
                        tracing::warn!(
                            model = %entry.name,
                            field = %relationship.name,
                            "related records are linked through their own foreign key; ignoring"
                        );
                    }
                }
                RelationshipType::BelongsTo => {}
            }
        }

        Ok(planned)
    }

    fn plan_many_to_many(
        &self,
        relationship: &RelationshipMetadata,
        items: &[Record],
    ) -> ModelResult<PendingLinks<'a>> {
        let pivot = relationship.pivot_config.as_ref().ok_or_else(|| {
            ModelError::Query(format!("relationship '{}' has no junction table", relationship.name))
        })?;
        let junction = self.graph.junction(&pivot.table)?;
        let target = self.graph.entry(&relationship.related_model)?;

        let remotes = items
            .iter()
            .map(|item| {
                if item.model() != target.name {
                    return Err(ModelError::Validation(format!(
                        "'{}' expects '{}' records, got '{}'",
                        relationship.name,
                        target.name,
                        item.model()
                    )));
                }

                item.value(&target.primary_key)
                    .filter(|key| !key.is_null())
                    .cloned()
                    .ok_or_else(|| {
                        ModelError::Validation(format!(
                            "'{}' record in '{}' has no primary key; insert it first",
                            target.name, relationship.name
                        ))
                    })
            })
            .collect::<ModelResult<Vec<_>>>()?;

        Ok(PendingLinks {
            junction,
            owner_left: junction.left.name == pivot.local_key,
            remotes,
        })
    }

    /// Add the planned junction rows for the owning record `key`
    async fn link(&self, planned: &[PendingLinks<'a>], key: &DatabaseValue) -> ModelResult<u64> {
        let mut linked = 0;
        for links in planned {
            for remote in &links.remotes {
                let (left, right) = if links.owner_left { (key, remote) } else { (remote, key) };
                if self.storage.insert_junction(links.junction, left, right).await? {
                    linked += 1;
                }
            }
        }
        Ok(linked)
    }
}

fn required_key(entry: &ModelEntry, record: &Record) -> ModelResult<DatabaseValue> {
    record
        .value(&entry.primary_key)
        .filter(|key| !key.is_null())
        .cloned()
        .ok_or_else(|| ModelError::Validation(format!("updating '{}' requires its primary key", entry.name)))
}
