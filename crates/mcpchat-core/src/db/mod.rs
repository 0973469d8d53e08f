//! SQLite access for the database tools.
//!
//! [`Database`] wraps a single connection behind a mutex. The schema
//! catalog (`sqlite_master` and `PRAGMA table_info`) drives both the
//! `list_tables` tool and the fake-data populator.

pub mod fake;
pub mod populate;

use anyhow::Context;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// One column from the schema catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type as written in `CREATE TABLE`, e.g. `VARCHAR(40)`.
    pub sql_type: String,
    pub nullable: bool,
    /// Length cap parsed from the declared type, if any.
    pub max_length: Option<usize>,
    pub primary_key: bool,
}

/// Rows returned by [`Database::query`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    /// Whether rows past the limit were dropped.
    pub truncated: bool,
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database file.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.execute_batch("PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")?;
        info!(path = %path.display(), "Opened database");
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// User tables, sorted by name.
    pub fn tables(&self) -> anyhow::Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Column metadata for `table`, in declaration order.
    pub fn columns(&self, table: &str) -> anyhow::Result<Vec<ColumnInfo>> {
        let conn = self.lock();
        let sql = format!("PRAGMA table_info({})", quote_ident(table));
        let mut stmt = conn.prepare(&sql)?;
        let columns = stmt
            .query_map([], |row| {
                let sql_type: String = row.get("type")?;
                let not_null: bool = row.get("notnull")?;
                let pk: i64 = row.get("pk")?;
                Ok(ColumnInfo {
                    name: row.get("name")?,
                    max_length: declared_length(&sql_type),
                    sql_type,
                    nullable: !not_null && pk == 0,
                    primary_key: pk > 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if columns.is_empty() {
            anyhow::bail!("no such table: {}", table);
        }
        Ok(columns)
    }

    /// Whether `table` keeps a rowid, i.e. was not declared `WITHOUT ROWID`.
    pub fn has_rowid(&self, table: &str) -> anyhow::Result<bool> {
        let sql: Option<String> = self
            .lock()
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()?;
        let Some(sql) = sql else {
            anyhow::bail!("no such table: {}", table);
        };
        let normalized = sql
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();
        Ok(!normalized.contains("WITHOUT ROWID"))
    }

    /// Largest value of `column` read as an integer; `None` for an empty table.
    pub fn max_integer(&self, table: &str, column: &str) -> anyhow::Result<Option<i64>> {
        let sql = format!(
            "SELECT MAX(CAST({} AS INTEGER)) FROM {}",
            quote_ident(column),
            quote_ident(table)
        );
        Ok(self.lock().query_row(&sql, [], |row| row.get(0))?)
    }

    /// Every value already stored in `column`, rendered as a SQL literal.
    pub fn literal_values(&self, table: &str, column: &str) -> anyhow::Result<HashSet<String>> {
        let conn = self.lock();
        let sql = format!("SELECT quote({}) FROM {}", quote_ident(column), quote_ident(table));
        let mut stmt = conn.prepare(&sql)?;
        let values = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(values)
    }

    /// Run a read-only statement and return up to `max_rows` rows.
    ///
    /// Statements that would modify the database are refused before they
    /// run.
    pub fn query(&self, sql: &str, max_rows: usize) -> anyhow::Result<QueryRows> {
        let conn = self.lock();
        let mut stmt = conn.prepare(sql)?;
        if !stmt.readonly() {
            anyhow::bail!("only read-only statements are allowed");
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut out = QueryRows {
            columns: columns.clone(),
            ..QueryRows::default()
        };

        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            if out.rows.len() == max_rows {
                out.truncated = true;
                break;
            }
            let mut record = Map::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                record.insert(name.clone(), to_json(row.get_ref(i)?));
            }
            out.rows.push(record);
        }
        debug!(rows = out.rows.len(), truncated = out.truncated, "Query finished");
        Ok(out)
    }

    /// Execute one or more statements with no result rows.
    pub fn execute_batch(&self, sql: &str) -> anyhow::Result<()> {
        self.lock().execute_batch(sql)?;
        Ok(())
    }
}

/// Quote an identifier with `"`, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `VARCHAR(40)` → 40, `DECIMAL(10, 2)` → 10, `TEXT` → None.
fn declared_length(sql_type: &str) -> Option<usize> {
    let open = sql_type.find('(')?;
    let inner = &sql_type[open + 1..];
    let end = inner.find(|c: char| c == ')' || c == ',')?;
    inner[..end].trim().parse().ok()
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(b.iter().map(|byte| format!("{byte:02x}")).collect()),
    }
}
