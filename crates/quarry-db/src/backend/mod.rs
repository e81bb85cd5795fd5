//! The contract every database backend satisfies.
//!
//! A backend owns the physical handle and knows its own dialect. The driver
//! core only ever talks to `dyn Backend`, so the default methods here produce
//! MySQL-flavoured SQL and a backend overrides just the pieces that differ.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::ConnectionConfig;
use crate::{DbError, Result, Value};

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(test)]
pub(crate) mod mock;

/// Column metadata reported by a live result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    pub name: String,
    /// Declared type, if the backend knows it
    pub type_name: Option<String>,
    pub max_length: Option<usize>,
    pub primary_key: bool,
}

impl FieldMeta {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: None,
            max_length: None,
            primary_key: false,
        }
    }
}

/// A live result handle produced by one executed statement.
pub trait RawResult: fmt::Debug + Send {
    fn num_rows(&self) -> usize;

    fn num_fields(&self) -> usize {
        self.field_names().len()
    }

    fn field_names(&self) -> Vec<String>;

    fn field_data(&self) -> Vec<FieldMeta> {
        self.field_names().iter().map(|n| FieldMeta::named(n)).collect()
    }

    /// Moves the fetch position to row `n`. Returns false past the end.
    fn seek(&mut self, n: usize) -> bool;

    /// Fetches the row at the fetch position and advances it.
    fn fetch_row(&mut self) -> Option<Vec<Value>>;

    /// Releases the backend resource.
    fn free(&mut self) {}
}

/// One database backend.
pub trait Backend: Send {
    /// Short platform name (e.g. "sqlite").
    fn platform(&self) -> &'static str;

    /// Character used to quote identifiers, `None` to never quote.
    fn escape_char(&self) -> Option<char> {
        Some('`')
    }

    fn connect(&mut self, config: &ConnectionConfig) -> Result<()>;

    fn persistent_connect(&mut self, config: &ConnectionConfig) -> Result<()> {
        self.connect(config)
    }

    fn is_connected(&self) -> bool;

    fn reconnect(&mut self) -> Result<()> {
        Ok(())
    }

    fn select_database(&mut self, name: &str) -> Result<()>;

    fn set_charset(&mut self, charset: &str, collation: &str) -> Result<()>;

    /// Runs one statement. Statements that produce no rows return `None`.
    fn execute(&mut self, sql: &str) -> Result<Option<Box<dyn RawResult>>>;

    fn begin(&mut self) -> Result<()> {
        self.execute("START TRANSACTION").map(|_| ())
    }

    fn commit(&mut self) -> Result<()> {
        self.execute("COMMIT").map(|_| ())
    }

    fn rollback(&mut self) -> Result<()> {
        self.execute("ROLLBACK").map(|_| ())
    }

    /// Escapes string content for use inside single quotes.
    ///
    /// With `like` set, LIKE wildcards are escaped too.
    fn escape_str(&self, s: &str, like: bool) -> String {
        let mut out = String::with_capacity(s.len());
        for ch in s.chars() {
            match ch {
                '\\' => out.push_str("\\\\"),
                '\'' => out.push_str("\\'"),
                '"' => out.push_str("\\\""),
                '\0' => out.push_str("\\0"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\u{1a}' => out.push_str("\\Z"),
                '%' if like => out.push_str("\\%"),
                '_' if like => out.push_str("\\_"),
                c => out.push(c),
            }
        }
        out
    }

    /// Clause appended to LIKE predicates, e.g. ` ESCAPE '!'`.
    fn like_escape_clause(&self) -> Option<String> {
        None
    }

    fn random_keyword(&self) -> &'static str {
        "RAND()"
    }

    fn count_string(&self) -> &'static str {
        "SELECT COUNT(*) AS "
    }

    fn insert_id(&self) -> u64;

    fn affected_rows(&self) -> u64;

    fn error_message(&self) -> String;

    fn error_number(&self) -> i64;

    /// SQL listing table names, `None` when unsupported.
    fn list_tables_sql(&self, prefix_limit: Option<&str>) -> Option<String>;

    /// SQL listing a table's column names, `None` when unsupported.
    fn list_columns_sql(&self, table: &str) -> Option<String>;

    fn field_data_sql(&self, table: &str) -> String {
        format!("SELECT * FROM {} LIMIT 1", table)
    }

    fn version_sql(&self) -> Option<String> {
        None
    }

    fn from_tables(&self, tables: &[String]) -> String {
        tables.join(", ")
    }

    fn insert_sql(&self, table: &str, keys: &[String], values: &[String]) -> String {
        format!("INSERT INTO {} ({}) VALUES ({})", table, keys.join(", "), values.join(", "))
    }

    fn replace_sql(&self, table: &str, keys: &[String], values: &[String]) -> String {
        format!("REPLACE INTO {} ({}) VALUES ({})", table, keys.join(", "), values.join(", "))
    }

    /// `rows` are already parenthesised value tuples.
    fn insert_batch_sql(&self, table: &str, keys: &[String], rows: &[String]) -> String {
        format!("INSERT INTO {} ({}) VALUES {}", table, keys.join(", "), rows.join(", "))
    }

    fn update_sql(
        &self,
        table: &str,
        set: &[(String, String)],
        wheres: &[String],
        order_by: &[String],
        limit: Option<u64>,
    ) -> String {
        let assignments: Vec<String> = set.iter().map(|(k, v)| format!("{} = {}", k, v)).collect();
        let mut sql = format!("UPDATE {} SET {}", table, assignments.join(", "));
        if !wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&wheres.join(" "));
        }
        if !order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_by.join(", "));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        sql
    }

    /// One UPDATE with a CASE per column, keyed on `index`.
    fn update_batch_sql(
        &self,
        table: &str,
        rows: &[Vec<(String, String)>],
        index: &str,
        wheres: &[String],
    ) -> String {
        let mut ids = Vec::with_capacity(rows.len());
        let mut cases: IndexMap<&str, Vec<String>> = IndexMap::new();
        for row in rows {
            let Some((_, id)) = row.iter().find(|(k, _)| k == index) else {
                continue;
            };
            ids.push(id.clone());
            for (field, value) in row.iter().filter(|(k, _)| k != index) {
                cases
                    .entry(field.as_str())
                    .or_default()
                    .push(format!("WHEN {} = {} THEN {}", index, id, value));
            }
        }

        let set: Vec<String> = cases
            .iter()
            .map(|(field, whens)| format!("{} = CASE {} ELSE {} END", field, whens.join(" "), field))
            .collect();

        let mut sql = format!("UPDATE {} SET {} WHERE ", table, set.join(", "));
        if !wheres.is_empty() {
            sql.push_str(&wheres.join(" "));
            sql.push_str(" AND ");
        }
        sql.push_str(&format!("{} IN ({})", index, ids.join(",")));
        sql
    }

    fn delete_sql(&self, table: &str, wheres: &[String], likes: &[String], limit: Option<u64>) -> String {
        let mut sql = format!("DELETE FROM {}", table);
        if !wheres.is_empty() || !likes.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&wheres.join(" "));
            if !wheres.is_empty() && !likes.is_empty() {
                sql.push_str(" AND ");
            }
            sql.push_str(&likes.join(" "));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        sql
    }

    fn truncate_sql(&self, table: &str) -> String {
        format!("TRUNCATE {}", table)
    }

    fn empty_table_sql(&self, table: &str) -> String {
        format!("DELETE FROM {}", table)
    }

    fn limit_sql(&self, sql: String, limit: u64, offset: Option<u64>) -> String {
        match offset {
            Some(offset) if offset > 0 => format!("{} LIMIT {}, {}", sql, offset, limit),
            _ => format!("{} LIMIT {}", sql, limit),
        }
    }

    /// Releases the physical connection.
    fn close(&mut self);
}

/// Builds a backend for a connection config.
pub type BackendFactory = Arc<dyn Fn(&ConnectionConfig) -> Result<Box<dyn Backend>> + Send + Sync>;

/// Registration table from backend kind to factory.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&String> = self.factories.keys().collect();
        kinds.sort();
        f.debug_struct("BackendRegistry").field("kinds", &kinds).finish()
    }
}

impl BackendRegistry {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The table with every backend compiled into this crate.
    pub fn bundled() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "sqlite")]
        registry.register("sqlite", |_config| Ok(Box::new(sqlite::SqliteBackend::new())));
        registry
    }

    /// Registers (or replaces) the factory for a backend kind.
    pub fn register<F>(&mut self, kind: &str, factory: F) -> &mut Self
    where
        F: Fn(&ConnectionConfig) -> Result<Box<dyn Backend>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_ascii_lowercase(), Arc::new(factory));
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(&kind.to_ascii_lowercase())
    }

    /// Constructs the backend named by `config.dbdriver`.
    pub fn build(&self, config: &ConnectionConfig) -> Result<Box<dyn Backend>> {
        let kind = config.dbdriver.trim().to_ascii_lowercase();
        let factory = self.factories.get(&kind).ok_or_else(|| {
            DbError::Configuration(format!("Unknown database backend: '{}'", config.dbdriver))
        })?;
        factory(config)
    }
}

/// In-memory rows, used by backends that fetch eagerly.
#[derive(Debug, Clone, Default)]
pub struct BufferedRows {
    fields: Vec<FieldMeta>,
    rows: Vec<Vec<Value>>,
    position: usize,
}

impl BufferedRows {
    pub fn new(fields: Vec<FieldMeta>, rows: Vec<Vec<Value>>) -> Self {
        Self { fields, rows, position: 0 }
    }
}

impl RawResult for BufferedRows {
    fn num_rows(&self) -> usize {
        self.rows.len()
    }

    fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    fn field_data(&self) -> Vec<FieldMeta> {
        self.fields.clone()
    }

    fn seek(&mut self, n: usize) -> bool {
        if n > self.rows.len() {
            return false;
        }
        self.position = n;
        true
    }

    fn fetch_row(&mut self) -> Option<Vec<Value>> {
        let row = self.rows.get(self.position).cloned()?;
        self.position += 1;
        Some(row)
    }

    fn free(&mut self) {
        self.rows.clear();
        self.position = 0;
    }
}
