//! Depth-bounded hydration
//!
//! Loads a record and follows its relationship edges until the requested
//! depth is spent. At depth 0 a record is exactly its row: foreign keys stay
//! keys and collections stay unloaded. Each level below spends one unit of
//! depth, so cycles in the model graph terminate and the number of storage
//! reads is bounded by the depth.

use std::future::Future;
use std::pin::Pin;

use futures::future::try_join_all;
use serde::Serialize;

use super::metadata::{FieldKind, ModelEntry, RelationshipMetadata, RelationshipType};
use super::registry::RelationshipGraph;
use crate::backends::{DatabaseValue, Filter, Order, Row, StorageEngine};
use crate::config::OrmConfig;
use crate::error::{ModelError, ModelResult};
use crate::model::record::{FieldValue, Record};

type LoadFuture<'s, T> = Pin<Box<dyn Future<Output = ModelResult<T>> + Send + 's>>;

/// Query options for [`Hydrator::find_many`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub filters: Vec<Filter>,
    /// Sort columns, most significant first
    pub order_by: Vec<String>,
    pub order: Order,
    pub limit: Option<usize>,
    pub offset: usize,
    /// Hydration depth; the configured default when unset
    pub depth: Option<u32>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality filter
    pub fn filter(mut self, column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    /// Sort by `column`, after any columns already given
    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(column.into());
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub offset: usize,
    pub limit: Option<usize>,
    pub data: Vec<T>,
}

impl<T> Page<T> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Convert every item, keeping the paging window
    pub fn try_map<U, F>(self, f: F) -> ModelResult<Page<U>>
    where
        F: FnMut(T) -> ModelResult<U>,
    {
        Ok(Page {
            offset: self.offset,
            limit: self.limit,
            data: self.data.into_iter().map(f).collect::<ModelResult<_>>()?,
        })
    }
}

/// Loads records and their relationships from storage
pub struct Hydrator<'a> {
    graph: &'a RelationshipGraph,
    storage: &'a dyn StorageEngine,
    parallel: bool,
    default_depth: u32,
    max_depth: u32,
}

impl<'a> Hydrator<'a> {
    pub fn new(graph: &'a RelationshipGraph, storage: &'a dyn StorageEngine, config: &OrmConfig) -> Self {
        Self {
            graph,
            storage,
            parallel: config.parallel_siblings,
            default_depth: config.default_depth,
            max_depth: config.max_depth,
        }
    }

    fn check_depth(&self, depth: u32) -> ModelResult<()> {
        if depth > self.max_depth {
            return Err(ModelError::Query(format!(
                "depth {} exceeds the configured maximum of {}",
                depth, self.max_depth
            )));
        }
        Ok(())
    }

    /// Load one record by primary key and hydrate it to `depth`
    pub async fn find_one(&self, model: &str, key: &DatabaseValue, depth: u32) -> ModelResult<Option<Record>> {
        self.check_depth(depth)?;
        let entry = self.graph.entry(model)?;
        tracing::debug!(model = %model, key = %key, depth, "find_one");
        self.load_by_key(entry, key.clone(), depth).await
    }

    /// Load a page of records matching the filters, each hydrated to the requested depth
    pub async fn find_many(&self, model: &str, options: &FindOptions) -> ModelResult<Page<Record>> {
        let depth = options.depth.unwrap_or(self.default_depth);
        self.check_depth(depth)?;
        let entry = self.graph.entry(model)?;

        if let Some(filter) = options.filters.iter().find(|f| !entry.table.has_column(&f.column)) {
            return Err(ModelError::Query(format!(
                "cannot filter '{}' on '{}': not a column",
                model, filter.column
            )));
        }

        if let Some(column) = options.order_by.iter().find(|c| !entry.table.has_column(c)) {
            return Err(ModelError::Query(format!(
                "cannot order '{}' by '{}': not a column",
                model, column
            )));
        }

        tracing::debug!(model = %model, filters = options.filters.len(), depth, "find_many");
        let rows = self
            .storage
            .select_rows(
                &entry.table,
                &options.filters,
                &options.order_by,
                options.order,
                options.limit,
                options.offset,
            )
            .await?;

        let loads = rows
            .into_iter()
            .map(|row| self.hydrate_row(entry, row, depth))
            .collect();
        let data = join_all(self.parallel, loads).await?;

        Ok(Page {
            offset: options.offset,
            limit: options.limit,
            data,
        })
    }

    fn load_by_key<'s>(&'s self, entry: &'a ModelEntry, key: DatabaseValue, depth: u32) -> LoadFuture<'s, Option<Record>> {
        Box::pin(async move {
            match self.storage.select_by_key(&entry.table, &key).await? {
                Some(row) => self.hydrate_row(entry, row, depth).await.map(Some),
                None => Ok(None),
            }
        })
    }

    /// Hydrate an already fetched row without reading it again
    pub fn hydrate_row<'s>(&'s self, entry: &'a ModelEntry, row: Row, depth: u32) -> LoadFuture<'s, Record> {
        Box::pin(async move {
            let mut record = record_from_row(entry, &row);
            if depth == 0 || entry.relationships.is_empty() {
                return Ok(record);
            }

            let key = row
                .get(&entry.table.primary_key)
                .cloned()
                .unwrap_or(DatabaseValue::Null);

            let loads = entry
                .relationships
                .values()
                .map(|relationship| {
                    let local = match relationship.relationship_type {
                        RelationshipType::BelongsTo => row
                            .get(&relationship.name)
                            .cloned()
                            .unwrap_or(DatabaseValue::Null),
                        _ => key.clone(),
                    };
                    self.load_relationship(relationship, local, depth - 1)
                })
                .collect();

            let values = join_all(self.parallel, loads).await?;
            for (relationship, value) in entry.relationships.values().zip(values) {
                record.set(relationship.name.clone(), value);
            }
            Ok(record)
        })
    }

    fn load_relationship<'s>(
        &'s self,
        relationship: &'a RelationshipMetadata,
        local: DatabaseValue,
        depth: u32,
    ) -> LoadFuture<'s, FieldValue> {
        Box::pin(async move {
            let target = self.graph.entry(&relationship.related_model)?;

            match relationship.relationship_type {
                RelationshipType::BelongsTo => {
                    if local.is_null() {
                        return Ok(FieldValue::Value(DatabaseValue::Null));
                    }
                    match self.load_by_key(target, local.clone(), depth).await? {
                        Some(related) => Ok(FieldValue::Entity(Box::new(related))),
                        None => {
                            tracing::warn!(
                                field = %relationship.name,
                                target = %relationship.related_model,
                                key = %local,
                                "foreign key points at a missing row"
                            );
                            Ok(FieldValue::Key(local))
                        }
                    }
                }
                RelationshipType::HasOne => {
                    let rows = self
                        .storage
                        .select_by_foreign_key(&target.table, &relationship.foreign_key.column, &local)
                        .await?;
                    if rows.len() > 1 {
                        tracing::warn!(
                            field = %relationship.name,
                            matches = rows.len(),
                            "one-to-one relationship matched several rows; using the first"
                        );
                    }
                    match rows.into_iter().next() {
                        Some(row) => Ok(FieldValue::Entity(Box::new(self.hydrate_row(target, row, depth).await?))),
                        None => Ok(FieldValue::Value(DatabaseValue::Null)),
                    }
                }
                RelationshipType::HasMany => {
                    let rows = self
                        .storage
                        .select_by_foreign_key(&target.table, &relationship.foreign_key.column, &local)
                        .await?;
                    let loads = rows
                        .into_iter()
                        .map(|row| self.hydrate_row(target, row, depth))
                        .collect();
                    Ok(FieldValue::Collection(join_all(self.parallel, loads).await?))
                }
                RelationshipType::ManyToMany => {
                    let pivot = relationship.pivot_config.as_ref().ok_or_else(|| {
                        ModelError::Query(format!("relationship '{}' has no junction table", relationship.name))
                    })?;
                    let junction = self.graph.junction(&pivot.table)?;
                    let keys = self
                        .storage
                        .select_junction(junction, &pivot.local_key, &local)
                        .await?;
                    let loads = keys
                        .into_iter()
                        .map(|key| self.load_by_key(target, key, depth))
                        .collect();
                    let related = join_all(self.parallel, loads).await?;
                    Ok(FieldValue::Collection(related.into_iter().flatten().collect()))
                }
            }
        })
    }
}

/// Depth-0 view of a row: keys for foreign keys, nothing for collections
pub fn record_from_row(entry: &ModelEntry, row: &Row) -> Record {
    let mut record = Record::new(entry.name.clone());
    for (field, kind) in &entry.fields {
        let value = match kind {
            FieldKind::Scalar { .. } => {
                FieldValue::Value(row.get(field).cloned().unwrap_or(DatabaseValue::Null))
            }
            FieldKind::ForeignKey { .. } => match row.get(field) {
                Some(key) if !key.is_null() => FieldValue::Key(key.clone()),
                _ => FieldValue::Value(DatabaseValue::Null),
            },
            FieldKind::Collection { .. } | FieldKind::Inverse { .. } => FieldValue::Absent,
        };
        record.set(field.clone(), value);
    }
    record
}

/// Await sibling loads concurrently or one after another
async fn join_all<T>(parallel: bool, loads: Vec<LoadFuture<'_, T>>) -> ModelResult<Vec<T>> {
    if parallel {
        return try_join_all(loads).await;
    }

    let mut results = Vec::with_capacity(loads.len());
    for load in loads {
        results.push(load.await?);
    }
    Ok(results)
}
