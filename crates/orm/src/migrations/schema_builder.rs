//! Schema Builder - DDL for the inferred schema
//!
//! [`SchemaDefinition`] is the physical schema of an initialized relationship
//! graph. It renders to `CREATE TABLE` statements through the
//! [`SchemaBuilder`] / [`TableBuilder`] DSL: model tables first, junction
//! tables next, then indexes, then foreign keys between model tables (added
//! afterwards so that declaration order and cycles do not matter).

use serde::{Deserialize, Serialize};

use crate::backends::SqlDialect;
use crate::relationships::metadata::{ColumnDef, ColumnType, JunctionColumn, JunctionTableDef, TableDef};

/// Physical schema: model tables and junction tables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub tables: Vec<TableDef>,
    pub junctions: Vec<JunctionTableDef>,
}

impl SchemaDefinition {
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|table| table.name == name)
    }

    pub fn junction(&self, name: &str) -> Option<&JunctionTableDef> {
        self.junctions.iter().find(|junction| junction.name == name)
    }

    /// Statements creating the whole schema
    pub fn to_sql(&self, dialect: SqlDialect) -> Vec<String> {
        let mut schema = SchemaBuilder::new(dialect);
        let inline_foreign_keys = !dialect.supports_alter_foreign_key();

        for table in &self.tables {
            schema.create_table(&table.name, |builder| {
                for column in &table.columns {
                    builder.column(column);
                }
                for constraint in &table.unique_constraints {
                    let columns: Vec<&str> = constraint.iter().map(String::as_str).collect();
                    builder.unique(&columns);
                }
                if inline_foreign_keys {
                    for column in table.foreign_keys() {
                        if let Some(target) = &column.references {
                            builder.foreign_key(&column.name, &target.table, &target.column, None);
                        }
                    }
                }
            });
        }

        for junction in &self.junctions {
            schema.create_table(&junction.name, |builder| {
                builder
                    .junction_column(&junction.left)
                    .junction_column(&junction.right)
                    .primary_key(&[&junction.left.name, &junction.right.name]);
                for side in [&junction.left, &junction.right] {
                    builder.foreign_key(
                        &side.name,
                        &side.references.table,
                        &side.references.column,
                        Some("CASCADE"),
                    );
                }
            });
        }

        for table in &self.tables {
            for column in table.columns.iter().filter(|c| c.indexed && !c.primary_key) {
                schema.create_index(&table.name, &[&column.name], None);
            }
        }

        for junction in &self.junctions {
            schema.create_index(&junction.name, &[&junction.right.name], None);
        }

        if !inline_foreign_keys {
            for table in &self.tables {
                for column in table.foreign_keys() {
                    if let Some(target) = &column.references {
                        schema.add_foreign_key(&table.name, &column.name, &target.table, &target.column);
                    }
                }
            }
        }

        schema.to_sql()
    }

    /// Statements dropping the whole schema, junctions first
    pub fn drop_sql(&self, dialect: SqlDialect) -> Vec<String> {
        let mut schema = SchemaBuilder::new(dialect);
        for junction in self.junctions.iter().rev() {
            schema.drop_table(&junction.name);
        }
        for table in self.tables.iter().rev() {
            schema.drop_table(&table.name);
        }
        schema.to_sql()
    }
}

/// Basic schema operations
pub struct SchemaBuilder {
    dialect: SqlDialect,
    statements: Vec<String>,
}

impl SchemaBuilder {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            statements: Vec::new(),
        }
    }

    /// Create a new table
    pub fn create_table<F>(&mut self, table_name: &str, callback: F) -> &mut Self
    where
        F: FnOnce(&mut TableBuilder),
    {
        let mut table_builder = TableBuilder::new(table_name, self.dialect);
        callback(&mut table_builder);

        self.statements.push(table_builder.to_sql());
        self
    }

    /// Drop a table
    pub fn drop_table(&mut self, table_name: &str) -> &mut Self {
        self.statements
            .push(format!("DROP TABLE IF EXISTS {};", self.dialect.quote(table_name)));
        self
    }

    /// Create an index
    pub fn create_index(&mut self, table_name: &str, column_names: &[&str], index_name: Option<&str>) -> &mut Self {
        let default_name = format!("idx_{}_{}", table_name, column_names.join("_"));
        let index_name = index_name.unwrap_or(&default_name);
        self.statements.push(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({});",
            self.dialect.quote(index_name),
            self.dialect.quote(table_name),
            quote_all(self.dialect, column_names)
        ));
        self
    }

    /// Add a foreign key to an existing table.
    ///
    /// On PostgreSQL the statement is a no-op when the constraint already
    /// exists, so a schema can be applied more than once.
    pub fn add_foreign_key(
        &mut self,
        table_name: &str,
        column: &str,
        references_table: &str,
        references_column: &str,
    ) -> &mut Self {
        let constraint = format!("fk_{}_{}", table_name, column);
        let alter = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({});",
            self.dialect.quote(table_name),
            self.dialect.quote(&constraint),
            self.dialect.quote(column),
            self.dialect.quote(references_table),
            self.dialect.quote(references_column)
        );
        let statement = match self.dialect {
            SqlDialect::PostgreSQL => format!(
                "DO $$ BEGIN {} EXCEPTION WHEN duplicate_object THEN NULL; END $$;",
                alter
            ),
            _ => alter,
        };
        self.statements.push(statement);
        self
    }

    /// Get all SQL statements
    pub fn to_sql(&self) -> Vec<String> {
        self.statements.clone()
    }

    /// All statements as a single SQL string
    pub fn build(&self) -> String {
        self.statements.join("\n")
    }
}

/// Table builder for CREATE TABLE statements
pub struct TableBuilder {
    dialect: SqlDialect,
    table_name: String,
    columns: Vec<String>,
    constraints: Vec<String>,
}

impl TableBuilder {
    pub fn new(table_name: &str, dialect: SqlDialect) -> Self {
        Self {
            dialect,
            table_name: table_name.to_string(),
            columns: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Add a model column
    pub fn column(&mut self, column: &ColumnDef) -> &mut Self {
        let name = self.dialect.quote(&column.name);

        let definition = if column.primary_key {
            match (self.dialect, column.column_type.serial_type(self.dialect)) {
                (_, Some(serial)) => format!("{} {} PRIMARY KEY", name, serial),
                (SqlDialect::MySQL, None) if matches!(column.column_type, ColumnType::Integer | ColumnType::BigInt) => {
                    format!("{} {} AUTO_INCREMENT PRIMARY KEY", name, column.column_type.sql_type(self.dialect))
                }
                _ => format!("{} {} PRIMARY KEY", name, column.column_type.sql_type(self.dialect)),
            }
        } else {
            let mut definition = format!("{} {}", name, column.column_type.sql_type(self.dialect));
            if !column.nullable {
                definition.push_str(" NOT NULL");
            }
            if column.unique {
                definition.push_str(" UNIQUE");
            }
            definition
        };

        self.columns.push(definition);
        self
    }

    /// Add a junction column
    pub fn junction_column(&mut self, column: &JunctionColumn) -> &mut Self {
        self.columns.push(format!(
            "{} {} NOT NULL",
            self.dialect.quote(&column.name),
            column.column_type.sql_type(self.dialect)
        ));
        self
    }

    /// Add a primary key constraint
    pub fn primary_key(&mut self, columns: &[&str]) -> &mut Self {
        self.constraints
            .push(format!("PRIMARY KEY ({})", quote_all(self.dialect, columns)));
        self
    }

    /// Add a foreign key constraint
    pub fn foreign_key(
        &mut self,
        column: &str,
        references_table: &str,
        references_column: &str,
        on_delete: Option<&str>,
    ) -> &mut Self {
        let mut constraint = format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            self.dialect.quote(column),
            self.dialect.quote(references_table),
            self.dialect.quote(references_column)
        );
        if let Some(action) = on_delete {
            constraint.push_str(" ON DELETE ");
            constraint.push_str(action);
        }
        self.constraints.push(constraint);
        self
    }

    /// Add a unique constraint
    pub fn unique(&mut self, columns: &[&str]) -> &mut Self {
        self.constraints
            .push(format!("UNIQUE ({})", quote_all(self.dialect, columns)));
        self
    }

    /// Build the CREATE TABLE SQL
    pub fn to_sql(&self) -> String {
        let mut parts = self.columns.clone();
        parts.extend(self.constraints.iter().cloned());

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
            self.dialect.quote(&self.table_name),
            parts.join(",\n    ")
        )
    }
}

fn quote_all(dialect: SqlDialect, columns: &[&str]) -> String {
    columns
        .iter()
        .map(|column| dialect.quote(column))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationships::metadata::ColumnReference;

    fn schema() -> SchemaDefinition {
        let mut id = ColumnDef::new("id", ColumnType::BigInt);
        id.primary_key = true;
        let mut author = ColumnDef::new("author", ColumnType::BigInt);
        author.nullable = true;
        author.indexed = true;
        author.references = Some(ColumnReference {
            table: "author".to_string(),
            column: "id".to_string(),
        });

        let mut author_id = ColumnDef::new("id", ColumnType::BigInt);
        author_id.primary_key = true;

        let side = |name: &str, table: &str| JunctionColumn {
            name: name.to_string(),
            column_type: ColumnType::BigInt,
            references: ColumnReference {
                table: table.to_string(),
                column: "id".to_string(),
            },
        };

        SchemaDefinition {
            tables: vec![
                TableDef {
                    name: "book".to_string(),
                    primary_key: "id".to_string(),
                    columns: vec![id, ColumnDef::new("title", ColumnType::Text), author],
                    unique_constraints: vec![vec!["title".to_string(), "author".to_string()]],
                },
                TableDef {
                    name: "author".to_string(),
                    primary_key: "id".to_string(),
                    columns: vec![author_id],
                    unique_constraints: Vec::new(),
                },
            ],
            junctions: vec![JunctionTableDef {
                name: "author__book".to_string(),
                left: side("author_id", "author"),
                right: side("book_id", "book"),
            }],
        }
    }

    #[test]
    fn test_postgres_ddl_order() {
        let statements = schema().to_sql(SqlDialect::PostgreSQL);
        assert_eq!(statements.len(), 6);

        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS \"book\""));
        assert!(statements[0].contains("\"id\" BIGSERIAL PRIMARY KEY"));
        assert!(statements[0].contains("\"title\" TEXT NOT NULL"));
        assert!(statements[0].contains("UNIQUE (\"title\", \"author\")"));
        assert!(!statements[0].contains("FOREIGN KEY"));

        assert!(statements[2].contains("PRIMARY KEY (\"author_id\", \"book_id\")"));
        assert!(statements[2].contains("ON DELETE CASCADE"));

        assert_eq!(
            statements[3],
            "CREATE INDEX IF NOT EXISTS \"idx_book_author\" ON \"book\" (\"author\");"
        );
        assert_eq!(
            statements[5],
            "DO $$ BEGIN ALTER TABLE \"book\" ADD CONSTRAINT \"fk_book_author\" FOREIGN KEY (\"author\") REFERENCES \"author\" (\"id\"); EXCEPTION WHEN duplicate_object THEN NULL; END $$;"
        );
    }

    #[test]
    fn test_mysql_adds_plain_foreign_keys() {
        let statements = schema().to_sql(SqlDialect::MySQL);
        let alter = statements.last().unwrap();
        assert!(alter.starts_with("ALTER TABLE `book` ADD CONSTRAINT `fk_book_author`"));
    }

    #[test]
    fn test_sqlite_inlines_foreign_keys() {
        let statements = schema().to_sql(SqlDialect::SQLite);
        assert_eq!(statements.len(), 5);
        assert!(statements[0].contains("FOREIGN KEY (\"author\") REFERENCES \"author\" (\"id\")"));
        assert!(statements.iter().all(|s| !s.starts_with("ALTER TABLE")));
    }

    #[test]
    fn test_drop_sql_drops_junctions_first() {
        let statements = schema().drop_sql(SqlDialect::PostgreSQL);
        assert_eq!(
            statements,
            vec![
                "DROP TABLE IF EXISTS \"author__book\";",
                "DROP TABLE IF EXISTS \"author\";",
                "DROP TABLE IF EXISTS \"book\";",
            ]
        );
    }
}
