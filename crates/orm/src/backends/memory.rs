//! In-memory storage engine
//!
//! Rows live in insertion order per table; junction links are plain pairs.
//! Used by tests and by callers that want hydration without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::RwLock;

use super::core::{
    DatabaseValue, Filter, Order, Row, StorageCounters, StorageEngine, StorageOperation, StorageStats,
};
use crate::error::{ModelError, OrmResult};
use crate::relationships::metadata::{ColumnType, JunctionTableDef, TableDef};

#[derive(Debug, Default)]
struct MemoryTable {
    /// key repr -> row
    rows: IndexMap<String, Row>,
    next_id: i64,
}

/// Storage engine keeping everything in process memory
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: RwLock<HashMap<String, MemoryTable>>,
    junctions: RwLock<HashMap<String, Vec<(DatabaseValue, DatabaseValue)>>>,
    counters: StorageCounters,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently stored in `table`
    pub async fn row_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    /// Number of links currently stored in `junction`
    pub async fn link_count(&self, junction: &str) -> usize {
        self.junctions
            .read()
            .await
            .get(junction)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

fn key_of(table: &TableDef, key: &DatabaseValue) -> OrmResult<String> {
    key.key_repr().ok_or_else(|| {
        ModelError::Query(format!("null primary key for table '{}'", table.name))
    })
}

fn generate_key(table: &TableDef, state: &mut MemoryTable) -> OrmResult<DatabaseValue> {
    let column_type = table
        .primary_key_column()
        .map(|column| column.column_type)
        .ok_or_else(|| ModelError::Database(format!("table '{}' has no primary key column", table.name)))?;

    match column_type {
        ColumnType::Uuid => Ok(DatabaseValue::Uuid(uuid::Uuid::new_v4())),
        ColumnType::Integer => {
            state.next_id += 1;
            i32::try_from(state.next_id)
                .map(DatabaseValue::Int32)
                .map_err(|_| ModelError::Database(format!("key space of '{}' exhausted", table.name)))
        }
        ColumnType::BigInt => {
            state.next_id += 1;
            Ok(DatabaseValue::Int64(state.next_id))
        }
        other => Err(ModelError::Validation(format!(
            "primary key of '{}' has type {:?} and must be provided",
            table.name, other
        ))),
    }
}

fn check_columns(table: &TableDef, row: &Row) -> OrmResult<()> {
    match row.keys().find(|column| !table.has_column(column)) {
        Some(unknown) => Err(ModelError::Database(format!(
            "column '{}' does not exist in table '{}'",
            unknown, table.name
        ))),
        None => Ok(()),
    }
}

#[async_trait]
impl StorageEngine for MemoryStorage {
    async fn insert_row(&self, table: &TableDef, mut row: Row) -> OrmResult<DatabaseValue> {
        self.counters.record(StorageOperation::InsertRow);
        check_columns(table, &row)?;

        let mut tables = self.tables.write().await;
        let state = tables.entry(table.name.clone()).or_default();

        let key = match row.get(&table.primary_key) {
            Some(key) if !key.is_null() => key.clone(),
            _ => generate_key(table, state)?,
        };

        if let DatabaseValue::Int32(i) = key {
            state.next_id = state.next_id.max(i64::from(i));
        } else if let DatabaseValue::Int64(i) = key {
            state.next_id = state.next_id.max(i);
        }

        let repr = key_of(table, &key)?;
        if state.rows.contains_key(&repr) {
            return Err(ModelError::Database(format!(
                "duplicate key {} in table '{}'",
                key, table.name
            )));
        }

        row.insert(table.primary_key.clone(), key.clone());
        let stored: Row = table
            .columns
            .iter()
            .map(|column| {
                let value = row.shift_remove(&column.name).unwrap_or(DatabaseValue::Null);
                (column.name.clone(), value)
            })
            .collect();

        tracing::trace!(table = %table.name, key = %key, "memory insert");
        state.rows.insert(repr, stored);
        Ok(key)
    }

    async fn update_row(&self, table: &TableDef, key: &DatabaseValue, row: Row) -> OrmResult<bool> {
        self.counters.record(StorageOperation::UpdateRow);
        check_columns(table, &row)?;
        let repr = key_of(table, key)?;

        let mut tables = self.tables.write().await;
        let Some(stored) = tables.get_mut(&table.name).and_then(|t| t.rows.get_mut(&repr)) else {
            return Ok(false);
        };

        for (column, value) in row {
            if column != table.primary_key {
                stored.insert(column, value);
            }
        }
        Ok(true)
    }

    async fn delete_row(&self, table: &TableDef, key: &DatabaseValue) -> OrmResult<bool> {
        self.counters.record(StorageOperation::DeleteRow);
        let repr = key_of(table, key)?;

        let mut tables = self.tables.write().await;
        Ok(tables
            .get_mut(&table.name)
            .and_then(|t| t.rows.shift_remove(&repr))
            .is_some())
    }

    async fn select_by_key(&self, table: &TableDef, key: &DatabaseValue) -> OrmResult<Option<Row>> {
        self.counters.record(StorageOperation::SelectByKey);
        let Some(repr) = key.key_repr() else {
            return Ok(None);
        };

        let tables = self.tables.read().await;
        Ok(tables.get(&table.name).and_then(|t| t.rows.get(&repr)).cloned())
    }

    async fn select_by_foreign_key(
        &self,
        table: &TableDef,
        column: &str,
        key: &DatabaseValue,
    ) -> OrmResult<Vec<Row>> {
        self.counters.record(StorageOperation::SelectByForeignKey);
        if !table.has_column(column) {
            return Err(ModelError::Query(format!(
                "column '{}' does not exist in table '{}'",
                column, table.name
            )));
        }

        let tables = self.tables.read().await;
        Ok(tables
            .get(&table.name)
            .map(|t| {
                t.rows
                    .values()
                    .filter(|row| row.get(column).map_or(false, |value| value.matches(key)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn select_rows(
        &self,
        table: &TableDef,
        filters: &[Filter],
        order_by: &[String],
        order: Order,
        limit: Option<usize>,
        offset: usize,
    ) -> OrmResult<Vec<Row>> {
        self.counters.record(StorageOperation::SelectRows);
        if let Some(unknown) = order_by.iter().find(|column| !table.has_column(column)) {
            return Err(ModelError::Query(format!(
                "column '{}' does not exist in table '{}'",
                unknown, table.name
            )));
        }

        let tables = self.tables.read().await;
        let Some(state) = tables.get(&table.name) else {
            return Ok(Vec::new());
        };

        let matching = state.rows.values().filter(|row| {
            filters.iter().all(|filter| match row.get(&filter.column) {
                Some(DatabaseValue::Null) => filter.value.is_null(),
                Some(value) => value.matches(&filter.value) || *value == filter.value,
                None => false,
            })
        });

        let mut matching: Vec<&Row> = matching.collect();
        if order_by.is_empty() && order == Order::Desc {
            matching.reverse();
        } else if !order_by.is_empty() {
            // stable, so ties keep insertion order
            matching.sort_by(|a, b| {
                let ordering = order_by
                    .iter()
                    .map(|column| {
                        let left = a.get(column).unwrap_or(&DatabaseValue::Null);
                        let right = b.get(column).unwrap_or(&DatabaseValue::Null);
                        left.sort_cmp(right)
                    })
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal);
                match order {
                    Order::Asc => ordering,
                    Order::Desc => ordering.reverse(),
                }
            });
        }

        Ok(matching
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn insert_junction(
        &self,
        junction: &JunctionTableDef,
        left: &DatabaseValue,
        right: &DatabaseValue,
    ) -> OrmResult<bool> {
        self.counters.record(StorageOperation::InsertJunction);
        if left.is_null() || right.is_null() {
            return Err(ModelError::Validation(format!(
                "cannot link null keys in '{}'",
                junction.name
            )));
        }

        let mut junctions = self.junctions.write().await;
        let links = junctions.entry(junction.name.clone()).or_default();
        if links.iter().any(|(l, r)| l.matches(left) && r.matches(right)) {
            return Ok(false);
        }
        links.push((left.clone(), right.clone()));
        Ok(true)
    }

    async fn select_junction(
        &self,
        junction: &JunctionTableDef,
        column: &str,
        key: &DatabaseValue,
    ) -> OrmResult<Vec<DatabaseValue>> {
        self.counters.record(StorageOperation::SelectJunction);
        let from_left = junction_side(junction, column)?;

        let junctions = self.junctions.read().await;
        Ok(junctions
            .get(&junction.name)
            .map(|links| {
                links
                    .iter()
                    .filter_map(|(left, right)| {
                        if from_left && left.matches(key) {
                            Some(right.clone())
                        } else if !from_left && right.matches(key) {
                            Some(left.clone())
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_junction(
        &self,
        junction: &JunctionTableDef,
        column: &str,
        key: &DatabaseValue,
    ) -> OrmResult<u64> {
        self.counters.record(StorageOperation::DeleteJunction);
        let from_left = junction_side(junction, column)?;

        let mut junctions = self.junctions.write().await;
        let Some(links) = junctions.get_mut(&junction.name) else {
            return Ok(0);
        };

        let before = links.len();
        links.retain(|(left, right)| {
            let side = if from_left { left } else { right };
            !side.matches(key)
        });
        Ok((before - links.len()) as u64)
    }

    fn stats(&self) -> StorageStats {
        self.counters.snapshot()
    }

    fn reset_stats(&self) {
        self.counters.reset();
    }
}

/// true when `column` is the junction's left column
fn junction_side(junction: &JunctionTableDef, column: &str) -> OrmResult<bool> {
    if junction.left.name == column {
        Ok(true)
    } else if junction.right.name == column {
        Ok(false)
    } else {
        Err(ModelError::Query(format!(
            "column '{}' does not exist in junction '{}'",
            column, junction.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationships::metadata::{ColumnDef, ColumnReference, JunctionColumn};

    fn table() -> TableDef {
        let mut id = ColumnDef::new("id", ColumnType::BigInt);
        id.primary_key = true;
        let mut owner = ColumnDef::new("owner", ColumnType::BigInt);
        owner.nullable = true;
        TableDef {
            name: "item".to_string(),
            primary_key: "id".to_string(),
            columns: vec![id, owner, ColumnDef::new("label", ColumnType::Text)],
            unique_constraints: Vec::new(),
        }
    }

    fn junction() -> JunctionTableDef {
        let side = |name: &str| JunctionColumn {
            name: name.to_string(),
            column_type: ColumnType::BigInt,
            references: ColumnReference {
                table: "item".to_string(),
                column: "id".to_string(),
            },
        };
        JunctionTableDef {
            name: "item__item".to_string(),
            left: side("parents_id"),
            right: side("children_id"),
        }
    }

    fn row(pairs: &[(&str, DatabaseValue)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn test_insert_generates_sequential_keys() {
        let storage = MemoryStorage::new();
        let table = table();

        let first = storage.insert_row(&table, row(&[("label", "a".into())])).await.unwrap();
        let second = storage.insert_row(&table, row(&[("label", "b".into())])).await.unwrap();

        assert_eq!(first, DatabaseValue::Int64(1));
        assert_eq!(second, DatabaseValue::Int64(2));

        let stored = storage.select_by_key(&table, &second).await.unwrap().unwrap();
        assert_eq!(stored.get("owner"), Some(&DatabaseValue::Null));
        assert_eq!(stored.keys().collect::<Vec<_>>(), vec!["id", "owner", "label"]);
    }

    #[tokio::test]
    async fn test_duplicate_key_is_rejected() {
        let storage = MemoryStorage::new();
        let table = table();

        storage.insert_row(&table, row(&[("id", 5i64.into())])).await.unwrap();
        let result = storage.insert_row(&table, row(&[("id", 5i64.into())])).await;
        assert!(matches!(result, Err(ModelError::Database(_))));

        let next = storage.insert_row(&table, Row::new()).await.unwrap();
        assert_eq!(next, DatabaseValue::Int64(6));
    }

    #[tokio::test]
    async fn test_unknown_column_is_rejected() {
        let storage = MemoryStorage::new();
        let result = storage.insert_row(&table(), row(&[("missing", true.into())])).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_select_by_foreign_key_and_filters() {
        let storage = MemoryStorage::new();
        let table = table();

        for owner in [1i64, 2, 1] {
            storage
                .insert_row(&table, row(&[("owner", owner.into()), ("label", "x".into())]))
                .await
                .unwrap();
        }

        let owned = storage
            .select_by_foreign_key(&table, "owner", &DatabaseValue::Int32(1))
            .await
            .unwrap();
        assert_eq!(owned.len(), 2);

        let page = storage
            .select_rows(&table, &[Filter::eq("label", "x")], &[], Order::Asc, Some(2), 1)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].get("id"), Some(&DatabaseValue::Int64(2)));

        let stats = storage.stats();
        assert_eq!(stats.insert_row, 3);
        assert_eq!(stats.select_by_foreign_key, 1);
        assert_eq!(stats.select_rows, 1);
    }

    #[tokio::test]
    async fn test_select_rows_ordering() {
        let storage = MemoryStorage::new();
        let table = table();

        for (owner, label) in [(2i64, "b"), (1, "c"), (2, "a")] {
            storage
                .insert_row(&table, row(&[("owner", owner.into()), ("label", label.into())]))
                .await
                .unwrap();
        }
        storage.insert_row(&table, row(&[("label", "d".into())])).await.unwrap();

        let labels = |rows: Vec<Row>| -> Vec<String> {
            rows.into_iter()
                .filter_map(|r| r.get("label").map(ToString::to_string))
                .collect()
        };

        let by_owner = vec!["owner".to_string(), "label".to_string()];
        let ascending = storage.select_rows(&table, &[], &by_owner, Order::Asc, None, 0).await.unwrap();
        assert_eq!(labels(ascending), ["c", "a", "b", "d"]);

        let descending = storage.select_rows(&table, &[], &by_owner, Order::Desc, Some(2), 0).await.unwrap();
        assert_eq!(labels(descending), ["d", "b"]);

        let unknown = storage
            .select_rows(&table, &[], &["rank".to_string()], Order::Asc, None, 0)
            .await;
        assert!(matches!(unknown, Err(ModelError::Query(_))));
    }

    #[tokio::test]
    async fn test_junction_links_are_directional_and_unique() {
        let storage = MemoryStorage::new();
        let junction = junction();

        assert!(storage.insert_junction(&junction, &1i64.into(), &2i64.into()).await.unwrap());
        assert!(!storage.insert_junction(&junction, &1i64.into(), &2i64.into()).await.unwrap());
        assert!(storage.insert_junction(&junction, &3i64.into(), &1i64.into()).await.unwrap());

        let children = storage.select_junction(&junction, "parents_id", &1i64.into()).await.unwrap();
        assert_eq!(children, vec![DatabaseValue::Int64(2)]);

        let parents = storage.select_junction(&junction, "children_id", &1i64.into()).await.unwrap();
        assert_eq!(parents, vec![DatabaseValue::Int64(3)]);

        let removed = storage.delete_junction(&junction, "parents_id", &1i64.into()).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(storage.link_count("item__item").await, 1);

        assert!(storage.select_junction(&junction, "nope", &1i64.into()).await.is_err());
    }

    #[tokio::test]
    async fn test_update_and_delete_report_missing_rows() {
        let storage = MemoryStorage::new();
        let table = table();

        let key = storage.insert_row(&table, row(&[("label", "old".into())])).await.unwrap();
        assert!(storage.update_row(&table, &key, row(&[("label", "new".into())])).await.unwrap());
        assert!(!storage.update_row(&table, &99i64.into(), Row::new()).await.unwrap());

        let stored = storage.select_by_key(&table, &key).await.unwrap().unwrap();
        assert_eq!(stored.get("label"), Some(&DatabaseValue::String("new".to_string())));

        assert!(storage.delete_row(&table, &key).await.unwrap());
        assert!(!storage.delete_row(&table, &key).await.unwrap());
        assert_eq!(storage.row_count("item").await, 0);
    }
}
