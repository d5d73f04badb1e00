//! PostgreSQL Storage Implementation
//!
//! [`StorageEngine`] on top of a sqlx `PgPool`. Integer primary keys are
//! generated by `SERIAL`/`BIGSERIAL` columns, UUID keys client-side.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Pool, Postgres, Row as SqlxRow, TypeInfo, ValueRef};

use super::core::*;
use crate::config::OrmConfig;
use crate::error::{ModelError, OrmResult};
use crate::migrations::SchemaDefinition;
use crate::relationships::metadata::{ColumnType, JunctionTableDef, TableDef};

const DIALECT: SqlDialect = SqlDialect::PostgreSQL;

/// Storage engine backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: Pool<Postgres>,
    counters: std::sync::Arc<StorageCounters>,
}

impl PostgresStorage {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            counters: std::sync::Arc::new(StorageCounters::default()),
        }
    }

    /// Connect using `database_url`, `max_connections` and `acquire_timeout` from the config
    pub async fn connect(config: &OrmConfig) -> OrmResult<Self> {
        config.validate()?;
        let url = config.database_url.as_deref().ok_or_else(|| {
            ModelError::Database("database_url is not configured".to_string())
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout))
            .connect(url)
            .await?;

        tracing::info!(max_connections = config.max_connections, "connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Create every table and junction table of the schema
    pub async fn apply_schema(&self, schema: &SchemaDefinition) -> OrmResult<()> {
        let mut tx = self.pool.begin().await?;
        for statement in schema.to_sql(DIALECT) {
            tracing::debug!(sql = %statement, "applying schema statement");
            sqlx::query(&statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_rows(&self, sql: &str, params: Vec<(DatabaseValue, ColumnType)>) -> OrmResult<Vec<Row>> {
        tracing::debug!(sql = %sql, "postgres fetch");
        let mut query = sqlx::query(sql);
        for (value, column_type) in &params {
            query = bind_database_value(query, value, *column_type);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_map).collect()
    }

    async fn execute(&self, sql: &str, params: Vec<(DatabaseValue, ColumnType)>) -> OrmResult<u64> {
        tracing::debug!(sql = %sql, "postgres execute");
        let mut query = sqlx::query(sql);
        for (value, column_type) in &params {
            query = bind_database_value(query, value, *column_type);
        }
        Ok(query.execute(&self.pool).await?.rows_affected())
    }
}

fn column_type(table: &TableDef, column: &str) -> OrmResult<ColumnType> {
    table
        .column(column)
        .map(|c| c.column_type)
        .ok_or_else(|| ModelError::Query(format!("column '{}' does not exist in table '{}'", column, table.name)))
}

fn junction_column_type(junction: &JunctionTableDef, column: &str) -> OrmResult<ColumnType> {
    junction
        .column(column)
        .map(|c| c.column_type)
        .ok_or_else(|| ModelError::Query(format!("column '{}' does not exist in junction '{}'", column, junction.name)))
}

#[async_trait]
impl StorageEngine for PostgresStorage {
    async fn insert_row(&self, table: &TableDef, mut row: Row) -> OrmResult<DatabaseValue> {
        self.counters.record(StorageOperation::InsertRow);
        let pk_type = column_type(table, &table.primary_key)?;

        let missing_key = row.get(&table.primary_key).map_or(true, DatabaseValue::is_null);
        if missing_key {
            match pk_type {
                ColumnType::Uuid => {
                    row.insert(table.primary_key.clone(), DatabaseValue::Uuid(uuid::Uuid::new_v4()));
                }
                ColumnType::Integer | ColumnType::BigInt => {
                    row.shift_remove(&table.primary_key);
                }
                other => {
                    return Err(ModelError::Validation(format!(
                        "primary key of '{}' has type {:?} and must be provided",
                        table.name, other
                    )))
                }
            }
        }

        let mut columns = Vec::with_capacity(row.len());
        let mut placeholders = Vec::with_capacity(row.len());
        let mut params = Vec::with_capacity(row.len());
        for (index, (column, value)) in row.into_iter().enumerate() {
            params.push((value, column_type(table, &column)?));
            columns.push(DIALECT.quote(&column));
            placeholders.push(DIALECT.parameter_placeholder(index));
        }

        let sql = if columns.is_empty() {
            format!(
                "INSERT INTO {} DEFAULT VALUES RETURNING {}",
                DIALECT.quote(&table.name),
                DIALECT.quote(&table.primary_key)
            )
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
                DIALECT.quote(&table.name),
                columns.join(", "),
                placeholders.join(", "),
                DIALECT.quote(&table.primary_key)
            )
        };

        let rows = self.fetch_rows(&sql, params).await?;
        rows.into_iter()
            .next()
            .and_then(|row| row.into_iter().next().map(|(_, key)| key))
            .ok_or_else(|| ModelError::Database(format!("insert into '{}' returned no key", table.name)))
    }

    async fn update_row(&self, table: &TableDef, key: &DatabaseValue, row: Row) -> OrmResult<bool> {
        self.counters.record(StorageOperation::UpdateRow);

        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for (column, value) in row {
            if column == table.primary_key {
                continue;
            }
            let column_type = column_type(table, &column)?;
            assignments.push(format!(
                "{} = {}",
                DIALECT.quote(&column),
                DIALECT.parameter_placeholder(params.len())
            ));
            params.push((value, column_type));
        }

        if assignments.is_empty() {
            return Ok(self.select_by_key(table, key).await?.is_some());
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {}",
            DIALECT.quote(&table.name),
            assignments.join(", "),
            DIALECT.quote(&table.primary_key),
            DIALECT.parameter_placeholder(params.len())
        );
        params.push((key.clone(), column_type(table, &table.primary_key)?));

        Ok(self.execute(&sql, params).await? > 0)
    }

    async fn delete_row(&self, table: &TableDef, key: &DatabaseValue) -> OrmResult<bool> {
        self.counters.record(StorageOperation::DeleteRow);
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1",
            DIALECT.quote(&table.name),
            DIALECT.quote(&table.primary_key)
        );
        let params = vec![(key.clone(), column_type(table, &table.primary_key)?)];
        Ok(self.execute(&sql, params).await? > 0)
    }

    async fn select_by_key(&self, table: &TableDef, key: &DatabaseValue) -> OrmResult<Option<Row>> {
        self.counters.record(StorageOperation::SelectByKey);
        if key.is_null() {
            return Ok(None);
        }
        let sql = format!(
            "SELECT * FROM {} WHERE {} = $1",
            DIALECT.quote(&table.name),
            DIALECT.quote(&table.primary_key)
        );
        let params = vec![(key.clone(), column_type(table, &table.primary_key)?)];
        Ok(self.fetch_rows(&sql, params).await?.into_iter().next())
    }

    async fn select_by_foreign_key(
        &self,
        table: &TableDef,
        column: &str,
        key: &DatabaseValue,
    ) -> OrmResult<Vec<Row>> {
        self.counters.record(StorageOperation::SelectByForeignKey);
        let sql = format!(
            "SELECT * FROM {} WHERE {} = $1",
            DIALECT.quote(&table.name),
            DIALECT.quote(column)
        );
        let params = vec![(key.clone(), column_type(table, column)?)];
        self.fetch_rows(&sql, params).await
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

        let mut conditions = Vec::new();
        let mut params = Vec::new();
        for filter in filters {
            let column_type = column_type(table, &filter.column)?;
            if filter.value.is_null() {
                conditions.push(format!("{} IS NULL", DIALECT.quote(&filter.column)));
            } else {
                conditions.push(format!(
                    "{} = {}",
                    DIALECT.quote(&filter.column),
                    DIALECT.parameter_placeholder(params.len())
                ));
                params.push((filter.value.clone(), column_type));
            }
        }

        let mut sql = format!("SELECT * FROM {}", DIALECT.quote(&table.name));
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        let sort = if order_by.is_empty() {
            format!("{} {}", DIALECT.quote(&table.primary_key), order)
        } else {
            order_by
                .iter()
                .map(|column| {
                    column_type(table, column)?;
                    Ok(format!("{} {}", DIALECT.quote(column), order))
                })
                .collect::<OrmResult<Vec<_>>>()?
                .join(", ")
        };
        sql.push_str(&format!(" ORDER BY {}", sort));
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if offset > 0 {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        self.fetch_rows(&sql, params).await
    }

    async fn insert_junction(
        &self,
        junction: &JunctionTableDef,
        left: &DatabaseValue,
        right: &DatabaseValue,
    ) -> OrmResult<bool> {
        self.counters.record(StorageOperation::InsertJunction);
        let sql = format!(
            "INSERT INTO {} ({}, {}) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            DIALECT.quote(&junction.name),
            DIALECT.quote(&junction.left.name),
            DIALECT.quote(&junction.right.name)
        );
        let params = vec![
            (left.clone(), junction.left.column_type),
            (right.clone(), junction.right.column_type),
        ];
        Ok(self.execute(&sql, params).await? > 0)
    }

    async fn select_junction(
        &self,
        junction: &JunctionTableDef,
        column: &str,
        key: &DatabaseValue,
    ) -> OrmResult<Vec<DatabaseValue>> {
        self.counters.record(StorageOperation::SelectJunction);
        let other = junction.other_column(column).ok_or_else(|| {
            ModelError::Query(format!("column '{}' does not exist in junction '{}'", column, junction.name))
        })?;

        let sql = format!(
            "SELECT {} FROM {} WHERE {} = $1",
            DIALECT.quote(&other.name),
            DIALECT.quote(&junction.name),
            DIALECT.quote(column)
        );
        let params = vec![(key.clone(), junction_column_type(junction, column)?)];
        let rows = self.fetch_rows(&sql, params).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().map(|(_, value)| value))
            .collect())
    }

    async fn delete_junction(
        &self,
        junction: &JunctionTableDef,
        column: &str,
        key: &DatabaseValue,
    ) -> OrmResult<u64> {
        self.counters.record(StorageOperation::DeleteJunction);
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1",
            DIALECT.quote(&junction.name),
            DIALECT.quote(column)
        );
        let params = vec![(key.clone(), junction_column_type(junction, column)?)];
        self.execute(&sql, params).await
    }

    fn stats(&self) -> StorageStats {
        self.counters.snapshot()
    }

    fn reset_stats(&self) {
        self.counters.reset();
    }
}

/// Helper function to bind DatabaseValue to sqlx query; nulls are typed by their column
fn bind_database_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &DatabaseValue,
    column_type: ColumnType,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        DatabaseValue::Null => bind_null(query, column_type),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::Uuid(u) => query.bind(*u),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Date(d) => query.bind(*d),
        DatabaseValue::Time(t) => query.bind(*t),
        DatabaseValue::Json(j) => query.bind(j.clone()),
    }
}

fn bind_null(query: Query<'_, Postgres, PgArguments>, column_type: ColumnType) -> Query<'_, Postgres, PgArguments> {
    match column_type {
        ColumnType::Boolean => query.bind(Option::<bool>::None),
        ColumnType::Integer => query.bind(Option::<i32>::None),
        ColumnType::BigInt => query.bind(Option::<i64>::None),
        ColumnType::Double => query.bind(Option::<f64>::None),
        ColumnType::Text => query.bind(Option::<String>::None),
        ColumnType::Uuid => query.bind(Option::<uuid::Uuid>::None),
        ColumnType::Timestamp => query.bind(Option::<chrono::DateTime<chrono::Utc>>::None),
        ColumnType::Date => query.bind(Option::<chrono::NaiveDate>::None),
        ColumnType::Time => query.bind(Option::<chrono::NaiveTime>::None),
        ColumnType::Json => query.bind(Option::<serde_json::Value>::None),
        ColumnType::Bytes => query.bind(Option::<Vec<u8>>::None),
    }
}

fn row_to_map(row: &PgRow) -> OrmResult<Row> {
    let mut map = Row::with_capacity(row.columns().len());
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), postgres_value_to_database_value(row, index)?);
    }
    Ok(map)
}

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &PgRow, index: usize) -> OrmResult<DatabaseValue> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_string();
    let value = match type_name.as_str() {
        "BOOL" => DatabaseValue::Bool(row.try_get(index)?),
        "INT2" => DatabaseValue::Int32(i32::from(row.try_get::<i16, _>(index)?)),
        "INT4" => DatabaseValue::Int32(row.try_get(index)?),
        "INT8" => DatabaseValue::Int64(row.try_get(index)?),
        "FLOAT4" => DatabaseValue::Float64(f64::from(row.try_get::<f32, _>(index)?)),
        "FLOAT8" => DatabaseValue::Float64(row.try_get(index)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => DatabaseValue::String(row.try_get(index)?),
        "BYTEA" => DatabaseValue::Bytes(row.try_get(index)?),
        "UUID" => DatabaseValue::Uuid(row.try_get(index)?),
        "TIMESTAMPTZ" => DatabaseValue::DateTime(row.try_get(index)?),
        "TIMESTAMP" => DatabaseValue::DateTime(
            row.try_get::<chrono::NaiveDateTime, _>(index)?.and_utc(),
        ),
        "DATE" => DatabaseValue::Date(row.try_get(index)?),
        "TIME" => DatabaseValue::Time(row.try_get(index)?),
        "JSON" | "JSONB" => DatabaseValue::Json(row.try_get(index)?),
        other => {
            return Err(ModelError::Database(format!(
                "unsupported PostgreSQL type '{}' in column {}",
                other, index
            )))
        }
    };
    Ok(value)
}
