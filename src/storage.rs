//! Persistent table store interface and its `SQLite` implementation.
//!
//! The core writes through the narrow [`TableStore`] trait: table creation
//! and drop are idempotent, rows are inserted and updated by field map, and
//! `exists` answers predicate probes. There is intentionally no row delete;
//! managers mirror deletions by flipping a `deleted` column.

use crate::error::Result;
use rusqlite::types::ToSqlOutput;
use rusqlite::{Connection, ToSql};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// A value storable in a table column.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// A 64-bit integer.
    Integer(i64),
    /// A double-precision float.
    Real(f64),
    /// A text value.
    Text(String),
    /// SQL NULL.
    Null,
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Self::Integer(v) => v.to_sql(),
            Self::Real(v) => v.to_sql(),
            Self::Text(v) => v.to_sql(),
            Self::Null => Ok(ToSqlOutput::from(rusqlite::types::Null)),
        }
    }
}

/// An ordered set of column/value pairs for insert and update calls.
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    fields: Vec<(String, FieldValue)>,
}

impl FieldMap {
    /// Create an empty field map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column/value pair, builder style.
    #[must_use]
    pub fn set(mut self, column: &str, value: FieldValue) -> Self {
        self.fields.push((column.to_string(), value));
        self
    }

    /// The column/value pairs in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    /// Whether the map holds no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// An equality predicate on a single column.
///
/// Deliberately narrower than a raw WHERE string: values are always bound as
/// parameters, never interpolated.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// The column to compare.
    pub column: String,
    /// The value the column must equal.
    pub value: FieldValue,
}

impl Predicate {
    /// Build a `column = value` predicate.
    #[must_use]
    pub fn eq(column: &str, value: FieldValue) -> Self {
        Self { column: column.to_string(), value }
    }
}

/// Narrow interface to the persistent table store.
///
/// Table and column names are supplied by crate-internal callers only and
/// are interpolated into SQL; values always go through bind parameters.
pub trait TableStore: Send + Sync {
    /// Create a table. No-op if the table already exists.
    fn create_table(&self, table: &str, column_defs: &[&str]) -> Result<()>;

    /// Drop a table. No-op if the table is absent.
    fn drop_table(&self, table: &str) -> Result<()>;

    /// Insert one row; returns a store-assigned row handle.
    fn insert(&self, table: &str, fields: &FieldMap) -> Result<i64>;

    /// Update rows matching the predicate.
    fn update(&self, table: &str, fields: &FieldMap, predicate: &Predicate) -> Result<()>;

    /// Whether at least one row matches the predicate.
    fn exists(&self, table: &str, predicate: &Predicate) -> Result<bool>;
}

/// `SQLite`-backed table store.
///
/// Each operation opens a new connection to the database file. This avoids
/// thread safety issues and is acceptable for the low frequency of writes.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Create a store backed by the given database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let store = Self { db_path: db_path.as_ref().to_path_buf() };
        // Probe the connection once so misconfiguration fails early.
        store.open()?;
        Ok(store)
    }

    /// Get the database path.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Open a connection to the database.
    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        Ok(conn)
    }
}

impl TableStore for SqliteStore {
    fn create_table(&self, table: &str, column_defs: &[&str]) -> Result<()> {
        let conn = self.open()?;
        let sql = format!("CREATE TABLE IF NOT EXISTS {table} ({})", column_defs.join(", "));
        conn.execute(&sql, [])?;
        Ok(())
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute(&format!("DROP TABLE IF EXISTS {table}"), [])?;
        Ok(())
    }

    fn insert(&self, table: &str, fields: &FieldMap) -> Result<i64> {
        let conn = self.open()?;
        let mut columns = String::new();
        let mut placeholders = String::new();
        let mut params: Vec<&dyn ToSql> = Vec::new();

        for (i, (column, value)) in fields.entries().iter().enumerate() {
            if i > 0 {
                columns.push_str(", ");
                placeholders.push_str(", ");
            }
            columns.push_str(column);
            let _ = write!(placeholders, "?{}", i + 1);
            params.push(value);
        }

        let sql = format!("INSERT INTO {table} ({columns}) VALUES ({placeholders})");
        conn.execute(&sql, params.as_slice())?;
        Ok(conn.last_insert_rowid())
    }

    fn update(&self, table: &str, fields: &FieldMap, predicate: &Predicate) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let conn = self.open()?;
        let mut assignments = String::new();
        let mut params: Vec<&dyn ToSql> = Vec::new();

        for (i, (column, value)) in fields.entries().iter().enumerate() {
            if i > 0 {
                assignments.push_str(", ");
            }
            let _ = write!(assignments, "{column} = ?{}", i + 1);
            params.push(value);
        }

        let where_param = fields.entries().len() + 1;
        let sql =
            format!("UPDATE {table} SET {assignments} WHERE {} = ?{where_param}", predicate.column);
        params.push(&predicate.value);
        conn.execute(&sql, params.as_slice())?;
        Ok(())
    }

    fn exists(&self, table: &str, predicate: &Predicate) -> Result<bool> {
        let conn = self.open()?;
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE {} = ?1)", predicate.column);
        let found: bool = conn.query_row(&sql, [&predicate.value], |row| row.get(0))?;
        Ok(found)
    }
}

/// Column layout shared by all entity tables: raw id plus a JSON body.
pub(crate) const ENTITY_COLUMNS: &[&str] =
    &["id INTEGER PRIMARY KEY", "body TEXT NOT NULL", "deleted INTEGER NOT NULL DEFAULT 0"];

/// Column layout of the issuer high-water-mark table.
pub(crate) const COUNTER_COLUMNS: &[&str] =
    &["collection TEXT PRIMARY KEY", "last_id INTEGER NOT NULL"];

/// Name of the issuer high-water-mark table.
pub(crate) const COUNTERS_TABLE: &str = "counters";

/// Insert-or-update an entity row keyed by raw id.
#[allow(clippy::cast_possible_wrap)]
pub(crate) fn put_row(store: &dyn TableStore, table: &str, id: u64, body: &str) -> Result<()> {
    let pred = Predicate::eq("id", FieldValue::Integer(id as i64));
    if store.exists(table, &pred)? {
        let fields = FieldMap::new()
            .set("body", FieldValue::Text(body.to_string()))
            .set("deleted", FieldValue::Integer(0));
        store.update(table, &fields, &pred)?;
    } else {
        let fields = FieldMap::new()
            .set("id", FieldValue::Integer(id as i64))
            .set("body", FieldValue::Text(body.to_string()))
            .set("deleted", FieldValue::Integer(0));
        store.insert(table, &fields)?;
    }
    Ok(())
}

/// Mirror an entity deletion. The store has no row delete, so the row is
/// flagged instead. No-op if the row was never persisted.
#[allow(clippy::cast_possible_wrap)]
pub(crate) fn mark_deleted(store: &dyn TableStore, table: &str, id: u64) -> Result<()> {
    let pred = Predicate::eq("id", FieldValue::Integer(id as i64));
    if store.exists(table, &pred)? {
        let fields = FieldMap::new().set("deleted", FieldValue::Integer(1));
        store.update(table, &fields, &pred)?;
    }
    Ok(())
}

/// Persist an issuer high-water mark for one collection.
#[allow(clippy::cast_possible_wrap)]
pub(crate) fn save_counter(store: &dyn TableStore, collection: &str, last_id: u64) -> Result<()> {
    let pred = Predicate::eq("collection", FieldValue::Text(collection.to_string()));
    if store.exists(COUNTERS_TABLE, &pred)? {
        let fields = FieldMap::new().set("last_id", FieldValue::Integer(last_id as i64));
        store.update(COUNTERS_TABLE, &fields, &pred)?;
    } else {
        let fields = FieldMap::new()
            .set("collection", FieldValue::Text(collection.to_string()))
            .set("last_id", FieldValue::Integer(last_id as i64));
        store.insert(COUNTERS_TABLE, &fields)?;
    }
    Ok(())
}
