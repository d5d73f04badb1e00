//! Core Storage Traits
//!
//! The ORM talks to persistence only through [`StorageEngine`]: keyed row
//! access on model tables plus link rows on junction tables. Backends never
//! see models or relationships, only [`TableDef`]s and [`JunctionTableDef`]s.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::OrmResult;
use crate::relationships::metadata::{JunctionTableDef, TableDef};

/// Column name -> value, in table column order
pub type Row = IndexMap<String, DatabaseValue>;

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    DateTime(chrono::DateTime<chrono::Utc>),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    Json(JsonValue),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int32(i) => JsonValue::Number(serde_json::Number::from(*i)),
            DatabaseValue::Int64(i) => JsonValue::Number(serde_json::Number::from(*i)),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::Bytes(b) => JsonValue::Array(
                b.iter()
                    .map(|&x| JsonValue::Number(serde_json::Number::from(x)))
                    .collect(),
            ),
            DatabaseValue::Uuid(u) => JsonValue::String(u.to_string()),
            DatabaseValue::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            DatabaseValue::Date(d) => JsonValue::String(d.to_string()),
            DatabaseValue::Time(t) => JsonValue::String(t.to_string()),
            DatabaseValue::Json(j) => j.clone(),
        }
    }

    /// Best-effort conversion from an untyped JSON value
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => DatabaseValue::Null,
            JsonValue::Bool(b) => DatabaseValue::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    DatabaseValue::Int64(i)
                } else if let Some(f) = n.as_f64() {
                    DatabaseValue::Float64(f)
                } else {
                    DatabaseValue::Json(JsonValue::Number(n))
                }
            }
            JsonValue::String(s) => match uuid::Uuid::parse_str(&s) {
                Ok(uuid) => DatabaseValue::Uuid(uuid),
                Err(_) => DatabaseValue::String(s),
            },
            other => DatabaseValue::Json(other),
        }
    }

    /// Canonical form for key comparisons: integer widths compare equal
    pub fn key_repr(&self) -> Option<String> {
        match self {
            DatabaseValue::Null => None,
            DatabaseValue::Int32(i) => Some(format!("i:{}", i)),
            DatabaseValue::Int64(i) => Some(format!("i:{}", i)),
            DatabaseValue::Uuid(u) => Some(format!("u:{}", u)),
            DatabaseValue::String(s) => Some(format!("s:{}", s)),
            other => Some(format!("v:{}", other.to_json())),
        }
    }

    /// Equality used when matching keys and filters
    pub fn matches(&self, other: &DatabaseValue) -> bool {
        match (self.key_repr(), other.key_repr()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Ascending sort order. Nulls sort last, integer widths compare by value.
    pub fn sort_cmp(&self, other: &DatabaseValue) -> CmpOrdering {
        use DatabaseValue::*;
        match (self, other) {
            (Null, Null) => CmpOrdering::Equal,
            (Null, _) => CmpOrdering::Greater,
            (_, Null) => CmpOrdering::Less,
            (Int32(a), Int32(b)) => a.cmp(b),
            (Int32(a), Int64(b)) => i64::from(*a).cmp(b),
            (Int64(a), Int32(b)) => a.cmp(&i64::from(*b)),
            (Int64(a), Int64(b)) => a.cmp(b),
            (Float64(a), Float64(b)) => a.total_cmp(b),
            (Float64(a), Int32(b)) => a.total_cmp(&f64::from(*b)),
            (Int32(a), Float64(b)) => f64::from(*a).total_cmp(b),
            (Bool(a), Bool(b)) => a.cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (Uuid(a), Uuid(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Time(a), Time(b)) => a.cmp(b),
            (a, b) => a.to_json().to_string().cmp(&b.to_json().to_string()),
        }
    }
}

/// Direction of an ordered select
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Order::Asc => write!(f, "ASC"),
            Order::Desc => write!(f, "DESC"),
        }
    }
}

impl fmt::Display for DatabaseValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseValue::Null => write!(f, "NULL"),
            DatabaseValue::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl From<uuid::Uuid> for DatabaseValue {
    fn from(value: uuid::Uuid) -> Self {
        DatabaseValue::Uuid(value)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for DatabaseValue {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl From<chrono::NaiveDate> for DatabaseValue {
    fn from(value: chrono::NaiveDate) -> Self {
        DatabaseValue::Date(value)
    }
}

impl From<chrono::NaiveTime> for DatabaseValue {
    fn from(value: chrono::NaiveTime) -> Self {
        DatabaseValue::Time(value)
    }
}

impl From<JsonValue> for DatabaseValue {
    fn from(value: JsonValue) -> Self {
        DatabaseValue::Json(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// Equality filter on one column
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: DatabaseValue,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// Per-operation call counters of a storage engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub insert_row: u64,
    pub update_row: u64,
    pub delete_row: u64,
    pub select_by_key: u64,
    pub select_by_foreign_key: u64,
    pub select_rows: u64,
    pub insert_junction: u64,
    pub select_junction: u64,
    pub delete_junction: u64,
}

impl StorageStats {
    /// Every read issued against storage
    pub fn reads(&self) -> u64 {
        self.select_by_key + self.select_by_foreign_key + self.select_rows + self.select_junction
    }

    /// Reads issued to follow relationship edges
    pub fn relationship_reads(&self) -> u64 {
        self.select_by_foreign_key + self.select_junction
    }

    pub fn total(&self) -> u64 {
        self.reads()
            + self.insert_row
            + self.update_row
            + self.delete_row
            + self.insert_junction
            + self.delete_junction
    }
}

/// Storage operations a backend counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOperation {
    InsertRow,
    UpdateRow,
    DeleteRow,
    SelectByKey,
    SelectByForeignKey,
    SelectRows,
    InsertJunction,
    SelectJunction,
    DeleteJunction,
}

/// Lock-free counters backing [`StorageStats`]
#[derive(Debug, Default)]
pub struct StorageCounters {
    counters: [AtomicU64; 9],
}

impl StorageCounters {
    pub fn record(&self, operation: StorageOperation) {
        self.counters[operation as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StorageStats {
        let get = |operation: StorageOperation| self.counters[operation as usize].load(Ordering::Relaxed);
        StorageStats {
            insert_row: get(StorageOperation::InsertRow),
            update_row: get(StorageOperation::UpdateRow),
            delete_row: get(StorageOperation::DeleteRow),
            select_by_key: get(StorageOperation::SelectByKey),
            select_by_foreign_key: get(StorageOperation::SelectByForeignKey),
            select_rows: get(StorageOperation::SelectRows),
            insert_junction: get(StorageOperation::InsertJunction),
            select_junction: get(StorageOperation::SelectJunction),
            delete_junction: get(StorageOperation::DeleteJunction),
        }
    }

    pub fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Keyed row storage with junction links
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Insert a row and return its primary key. A null or missing key is generated.
    async fn insert_row(&self, table: &TableDef, row: Row) -> OrmResult<DatabaseValue>;

    /// Overwrite the given columns of the row with `key`. Returns false if no such row.
    async fn update_row(&self, table: &TableDef, key: &DatabaseValue, row: Row) -> OrmResult<bool>;

    /// Delete the row with `key`. Returns false if no such row.
    async fn delete_row(&self, table: &TableDef, key: &DatabaseValue) -> OrmResult<bool>;

    async fn select_by_key(&self, table: &TableDef, key: &DatabaseValue) -> OrmResult<Option<Row>>;

    /// All rows whose `column` equals `key`, in storage order
    async fn select_by_foreign_key(
        &self,
        table: &TableDef,
        column: &str,
        key: &DatabaseValue,
    ) -> OrmResult<Vec<Row>>;

    /// Rows matching every filter, sorted by `order_by` in `order`.
    /// With no sort columns the engine's natural order is used, reversed for `Desc`.
    async fn select_rows(
        &self,
        table: &TableDef,
        filters: &[Filter],
        order_by: &[String],
        order: Order,
        limit: Option<usize>,
        offset: usize,
    ) -> OrmResult<Vec<Row>>;

    /// Add a link row. Returns false if the link already existed.
    async fn insert_junction(
        &self,
        junction: &JunctionTableDef,
        left: &DatabaseValue,
        right: &DatabaseValue,
    ) -> OrmResult<bool>;

    /// Values of the opposite column for every link whose `column` equals `key`
    async fn select_junction(
        &self,
        junction: &JunctionTableDef,
        column: &str,
        key: &DatabaseValue,
    ) -> OrmResult<Vec<DatabaseValue>>;

    /// Remove every link whose `column` equals `key`
    async fn delete_junction(
        &self,
        junction: &JunctionTableDef,
        column: &str,
        key: &DatabaseValue,
    ) -> OrmResult<u64>;

    fn stats(&self) -> StorageStats;

    fn reset_stats(&self);
}

/// SQL dialect enumeration for database-specific SQL generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlDialect {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl SqlDialect {
    /// Get the parameter placeholder style for this dialect
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::MySQL | SqlDialect::SQLite => "?".to_string(),
        }
    }

    /// Get the quote character for identifiers in this dialect
    pub fn identifier_quote(&self) -> char {
        match self {
            SqlDialect::PostgreSQL | SqlDialect::SQLite => '"',
            SqlDialect::MySQL => '`',
        }
    }

    /// Quote an identifier
    pub fn quote(&self, identifier: &str) -> String {
        let quote = self.identifier_quote();
        format!("{}{}{}", quote, identifier, quote)
    }

    /// Whether foreign keys may be added after table creation
    pub fn supports_alter_foreign_key(&self) -> bool {
        !matches!(self, SqlDialect::SQLite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_widths_match_as_keys() {
        assert!(DatabaseValue::Int32(7).matches(&DatabaseValue::Int64(7)));
        assert!(!DatabaseValue::Int32(7).matches(&DatabaseValue::String("7".to_string())));
        assert!(!DatabaseValue::Null.matches(&DatabaseValue::Null));
    }

    #[test]
    fn test_from_json_detects_uuid() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(
            DatabaseValue::from_json(JsonValue::String(id.to_string())),
            DatabaseValue::Uuid(id)
        );
        assert_eq!(
            DatabaseValue::from_json(serde_json::json!("plain")),
            DatabaseValue::String("plain".to_string())
        );
    }

    #[test]
    fn test_option_conversion() {
        let none: Option<i64> = None;
        assert!(DatabaseValue::from(none).is_null());
        assert_eq!(DatabaseValue::from(Some(3i64)), DatabaseValue::Int64(3));
    }

    #[test]
    fn test_counters_snapshot_and_reset() {
        let counters = StorageCounters::default();
        counters.record(StorageOperation::SelectByKey);
        counters.record(StorageOperation::SelectByKey);
        counters.record(StorageOperation::SelectJunction);

        let stats = counters.snapshot();
        assert_eq!(stats.select_by_key, 2);
        assert_eq!(stats.relationship_reads(), 1);
        assert_eq!(stats.reads(), 3);

        counters.reset();
        assert_eq!(counters.snapshot(), StorageStats::default());
    }

    #[test]
    fn test_dialect_quoting() {
        assert_eq!(SqlDialect::PostgreSQL.quote("one"), "\"one\"");
        assert_eq!(SqlDialect::MySQL.quote("one"), "`one`");
        assert_eq!(SqlDialect::PostgreSQL.parameter_placeholder(0), "$1");
    }
}
