//! Additive schema synchronization
//!
//! Each table declares the columns it expects. On startup the declared list is
//! compared with `PRAGMA table_info` and any missing column is added with
//! `ALTER TABLE ... ADD COLUMN`. Nothing is ever dropped or retyped: type and
//! constraint drift is reported and left for a manual migration.
//!
//! ```rust,ignore
//! pub struct ThreadsTable;
//!
//! impl TableSchema for ThreadsTable {
//!     fn table_name() -> &'static str { "conversation_threads" }
//!     fn expected_columns() -> Vec<ColumnDefinition> {
//!         vec![
//!             ColumnDefinition::new("id", "INTEGER").primary_key(),
//!             ColumnDefinition::new("correction_reason", "TEXT"),
//!         ]
//!     }
//! }
//!
//! SchemaSync::sync_table::<ThreadsTable>(&pool).await?;
//! ```

use crate::Result;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

/// Expected column with the constraints SQLite can express inline
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    /// Declared SQL type ("TEXT", "INTEGER", "REAL", ...)
    pub sql_type: String,
    pub not_null: bool,
    pub primary_key: bool,
    pub unique: bool,
    /// Raw SQL default expression, e.g. `'pending'` or `0`
    pub default_value: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
            primary_key: false,
            unique: false,
            default_value: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

/// One row of `PRAGMA table_info`
#[derive(Debug, Clone)]
pub struct ActualColumn {
    pub cid: i32,
    pub name: String,
    pub type_name: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub pk: bool,
}

/// Difference between a declared column and the live table
#[derive(Debug, Clone)]
pub enum SchemaDrift {
    /// Fixable: column absent from the table
    MissingColumn { table: String, column: ColumnDefinition },
    /// Not fixable automatically
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },
    /// Not fixable automatically
    ConstraintMismatch {
        table: String,
        column: String,
        constraint: &'static str,
    },
}

/// Declarative description of a table's columns
pub trait TableSchema {
    fn table_name() -> &'static str;

    /// Columns in creation order
    fn expected_columns() -> Vec<ColumnDefinition>;
}

/// Reads the live schema
pub struct SchemaIntrospector;

impl SchemaIntrospector {
    /// Columns of `table_name` ordered by `cid`
    pub async fn introspect_table(pool: &SqlitePool, table_name: &str) -> Result<Vec<ActualColumn>> {
        let rows = sqlx::query(&format!("PRAGMA table_info({})", table_name))
            .fetch_all(pool)
            .await?;

        let mut columns: Vec<ActualColumn> = rows
            .iter()
            .map(|row| ActualColumn {
                cid: row.get("cid"),
                name: row.get("name"),
                type_name: row.get("type"),
                not_null: row.get::<i32, _>("notnull") != 0,
                default_value: row.get("dflt_value"),
                pk: row.get::<i32, _>("pk") != 0,
            })
            .collect();

        columns.sort_by_key(|c| c.cid);
        Ok(columns)
    }

    pub async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
        )
        .bind(table_name)
        .fetch_one(pool)
        .await?;

        Ok(exists)
    }
}

/// Compares declared and live schemas
pub struct SchemaDiff;

impl SchemaDiff {
    pub fn compare(table_name: &str, expected: &[ColumnDefinition], actual: &[ActualColumn]) -> Vec<SchemaDrift> {
        let mut drift = Vec::new();

        for want in expected {
            let Some(have) = actual.iter().find(|c| c.name.eq_ignore_ascii_case(&want.name)) else {
                drift.push(SchemaDrift::MissingColumn {
                    table: table_name.to_string(),
                    column: want.clone(),
                });
                continue;
            };

            if !Self::types_compatible(&want.sql_type, &have.type_name) {
                drift.push(SchemaDrift::TypeMismatch {
                    table: table_name.to_string(),
                    column: want.name.clone(),
                    expected: want.sql_type.clone(),
                    actual: have.type_name.clone(),
                });
            }

            if want.not_null && !have.not_null && !want.primary_key {
                drift.push(SchemaDrift::ConstraintMismatch {
                    table: table_name.to_string(),
                    column: want.name.clone(),
                    constraint: "NOT NULL",
                });
            }

            if want.primary_key && !have.pk {
                drift.push(SchemaDrift::ConstraintMismatch {
                    table: table_name.to_string(),
                    column: want.name.clone(),
                    constraint: "PRIMARY KEY",
                });
            }
        }

        drift
    }

    /// SQLite type affinity comparison
    pub(crate) fn types_compatible(expected: &str, actual: &str) -> bool {
        Self::affinity(expected) == Self::affinity(actual)
    }

    fn affinity(declared: &str) -> &'static str {
        let t = declared.to_uppercase();
        if t.contains("INT") {
            "INTEGER"
        } else if t.contains("CHAR") || t.contains("CLOB") || t.contains("TEXT") {
            "TEXT"
        } else if t.contains("REAL") || t.contains("FLOA") || t.contains("DOUB") {
            "REAL"
        } else if t.is_empty() || t.contains("BLOB") {
            "BLOB"
        } else {
            "NUMERIC"
        }
    }
}

/// Applies additive fixes
pub struct SchemaSync;

impl SchemaSync {
    /// Add every missing column of `T`; returns how many were added
    ///
    /// A table that does not exist yet is left alone (creation happens in
    /// `init_database`).
    pub async fn sync_table<T: TableSchema>(pool: &SqlitePool) -> Result<usize> {
        let table_name = T::table_name();

        if !SchemaIntrospector::table_exists(pool, table_name).await? {
            warn!(table = table_name, "Schema sync skipped: table does not exist");
            return Ok(0);
        }

        let actual = SchemaIntrospector::introspect_table(pool, table_name).await?;
        let drift = SchemaDiff::compare(table_name, &T::expected_columns(), &actual);

        if drift.is_empty() {
            debug!(table = table_name, "Schema up to date");
            return Ok(0);
        }

        let mut added = 0;
        for change in drift {
            match change {
                SchemaDrift::MissingColumn { table, column } => {
                    Self::add_column(pool, &table, &column).await?;
                    added += 1;
                }
                SchemaDrift::TypeMismatch { table, column, expected, actual } => {
                    warn!(
                        "Type mismatch in {}.{}: expected '{}', found '{}'; manual migration required",
                        table, column, expected, actual
                    );
                }
                SchemaDrift::ConstraintMismatch { table, column, constraint } => {
                    warn!(
                        "Constraint mismatch in {}.{}: missing {}; manual migration required",
                        table, column, constraint
                    );
                }
            }
        }

        Ok(added)
    }

    /// `ALTER TABLE ADD COLUMN`, dropping constraints SQLite cannot add in place
    pub(crate) async fn add_column(pool: &SqlitePool, table: &str, column: &ColumnDefinition) -> Result<()> {
        let mut sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column.name, column.sql_type);

        if column.primary_key || column.unique {
            warn!(
                "Column {}.{} added without PRIMARY KEY/UNIQUE (not supported by ALTER TABLE)",
                table, column.name
            );
        }

        match (&column.default_value, column.not_null) {
            (Some(default), true) => sql.push_str(&format!(" NOT NULL DEFAULT {}", default)),
            (Some(default), false) => sql.push_str(&format!(" DEFAULT {}", default)),
            (None, true) => warn!(
                "Column {}.{} added as nullable (NOT NULL needs a DEFAULT)",
                table, column.name
            ),
            (None, false) => {}
        }

        info!("Adding column {}.{} ({})", table, column.name, column.sql_type);

        match sqlx::query(&sql).execute(pool).await {
            Ok(_) => Ok(()),
            // Another connection won the race
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("duplicate column") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
