//! SQLite backend on top of rusqlite.
//!
//! `database` names the file to open; an empty name opens an in-memory
//! database. Rows are fetched eagerly into a `BufferedRows` so the result
//! handle does not borrow the connection.

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use super::{Backend, BufferedRows, FieldMeta, RawResult};
use crate::config::ConnectionConfig;
use crate::{DbError, Result, Value};

const LIKE_ESCAPE_CHR: char = '!';

/// SQLite implementation of the backend contract.
#[derive(Debug, Default)]
pub struct SqliteBackend {
    conn: Option<Connection>,
    last_error: Option<(i64, String)>,
    insert_id: u64,
    affected_rows: u64,
}

impl SqliteBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn open(&mut self, config: &ConnectionConfig) -> Result<()> {
        let path = if config.database.is_empty() {
            ":memory:"
        } else {
            config.database.as_str()
        };
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags).map_err(|e| {
            self.record_error(&e);
            DbError::Connection(format!("Unable to open SQLite database '{}': {}", path, e))
        })?;
        info!(target: "quarry::sqlite", path = %path, "SQLite database opened");
        self.conn = Some(conn);
        Ok(())
    }

    fn record_error(&mut self, err: &rusqlite::Error) {
        let code = match err {
            rusqlite::Error::SqliteFailure(failure, _) => failure.extended_code as i64,
            _ => 0,
        };
        let message = match err {
            rusqlite::Error::SqliteFailure(_, Some(message)) => message.clone(),
            other => other.to_string(),
        };
        self.last_error = Some((code, message));
    }

    fn connection(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| DbError::Connection("SQLite connection is not open".to_string()))
    }

    fn batch(&mut self, sql: &str) -> Result<()> {
        let outcome = self.connection()?.execute_batch(sql);
        outcome.map_err(|e| {
            self.record_error(&e);
            DbError::from(e)
        })
    }

    /// Rewrites a LIMIT on UPDATE/DELETE as a rowid subquery.
    fn limited(&self, table: &str, wheres: &[String], limit: u64) -> String {
        let mut inner = format!("SELECT rowid FROM {}", table);
        if !wheres.is_empty() {
            inner.push_str(" WHERE ");
            inner.push_str(&wheres.join(" "));
        }
        format!("rowid IN ({} LIMIT {})", inner, limit)
    }
}

fn to_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    }
}

type Execution = (Option<Box<dyn RawResult>>, u64, u64);

fn run(conn: &Connection, sql: &str) -> rusqlite::Result<Execution> {
    let mut stmt = conn.prepare(sql)?;
    let column_count = stmt.column_count();

    if column_count == 0 {
        let changed = stmt.execute([])?;
        return Ok((None, changed as u64, conn.last_insert_rowid() as u64));
    }

    let fields: Vec<FieldMeta> = stmt.column_names().into_iter().map(FieldMeta::named).collect();
    let mut rows = stmt.raw_query();
    let mut buffered = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            values.push(to_value(row.get_ref(i)?));
        }
        buffered.push(values);
    }

    let result: Box<dyn RawResult> = Box::new(BufferedRows::new(fields, buffered));
    Ok((Some(result), 0, conn.last_insert_rowid() as u64))
}

impl Backend for SqliteBackend {
    fn platform(&self) -> &'static str {
        "sqlite"
    }

    fn escape_char(&self) -> Option<char> {
        Some('"')
    }

    fn connect(&mut self, config: &ConnectionConfig) -> Result<()> {
        self.open(config)
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn select_database(&mut self, _name: &str) -> Result<()> {
        // The database file is chosen when the connection opens.
        Ok(())
    }

    fn set_charset(&mut self, _charset: &str, _collation: &str) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> Result<Option<Box<dyn RawResult>>> {
        let outcome = run(self.connection()?, sql);
        match outcome {
            Ok((result, changed, insert_id)) => {
                self.last_error = None;
                self.affected_rows = changed;
                self.insert_id = insert_id;
                Ok(result)
            }
            Err(e) => {
                debug!(target: "quarry::sqlite", error = %e, "statement failed");
                self.record_error(&e);
                Err(DbError::from(e))
            }
        }
    }

    fn begin(&mut self) -> Result<()> {
        self.batch("BEGIN TRANSACTION")
    }

    fn commit(&mut self) -> Result<()> {
        self.batch("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.batch("ROLLBACK")
    }

    fn escape_str(&self, s: &str, like: bool) -> String {
        let mut out = String::with_capacity(s.len());
        for ch in s.chars() {
            match ch {
                '\'' => out.push_str("''"),
                '%' | '_' | LIKE_ESCAPE_CHR if like => {
                    out.push(LIKE_ESCAPE_CHR);
                    out.push(ch);
                }
                c => out.push(c),
            }
        }
        out
    }

    fn like_escape_clause(&self) -> Option<String> {
        Some(format!(" ESCAPE '{}'", LIKE_ESCAPE_CHR))
    }

    fn random_keyword(&self) -> &'static str {
        "RANDOM()"
    }

    fn insert_id(&self) -> u64 {
        self.insert_id
    }

    fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    fn error_message(&self) -> String {
        self.last_error.as_ref().map(|(_, m)| m.clone()).unwrap_or_default()
    }

    fn error_number(&self) -> i64 {
        self.last_error.as_ref().map(|(c, _)| *c).unwrap_or(0)
    }

    fn list_tables_sql(&self, prefix_limit: Option<&str>) -> Option<String> {
        let mut sql =
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite!_%' ESCAPE '!'"
                .to_string();
        if let Some(prefix) = prefix_limit.filter(|p| !p.is_empty()) {
            sql.push_str(&format!(
                " AND name LIKE '{}%'{}",
                self.escape_str(prefix, true),
                self.like_escape_clause().unwrap_or_default()
            ));
        }
        sql.push_str(" ORDER BY name");
        Some(sql)
    }

    fn list_columns_sql(&self, table: &str) -> Option<String> {
        Some(format!(
            "SELECT name FROM pragma_table_info('{}')",
            self.escape_str(table, false)
        ))
    }

    fn version_sql(&self) -> Option<String> {
        Some("SELECT sqlite_version() AS ver".to_string())
    }

    fn update_sql(
        &self,
        table: &str,
        set: &[(String, String)],
        wheres: &[String],
        _order_by: &[String],
        limit: Option<u64>,
    ) -> String {
        let assignments: Vec<String> = set.iter().map(|(k, v)| format!("{} = {}", k, v)).collect();
        let mut sql = format!("UPDATE {} SET {}", table, assignments.join(", "));
        match limit {
            Some(limit) => {
                sql.push_str(" WHERE ");
                sql.push_str(&self.limited(table, wheres, limit));
            }
            None if !wheres.is_empty() => {
                sql.push_str(" WHERE ");
                sql.push_str(&wheres.join(" "));
            }
            None => {}
        }
        // ORDER BY on UPDATE needs a compile-time SQLite option; it is dropped.
        sql
    }

    fn delete_sql(&self, table: &str, wheres: &[String], likes: &[String], limit: Option<u64>) -> String {
        let mut conditions: Vec<String> = Vec::new();
        if !wheres.is_empty() {
            conditions.push(wheres.join(" "));
        }
        if !likes.is_empty() {
            conditions.push(likes.join(" "));
        }
        let conditions = conditions.join(" AND ");

        match limit {
            Some(limit) => {
                let inner: Vec<String> = if conditions.is_empty() { Vec::new() } else { vec![conditions] };
                format!("DELETE FROM {} WHERE {}", table, self.limited(table, &inner, limit))
            }
            None if conditions.is_empty() => format!("DELETE FROM {}", table),
            None => format!("DELETE FROM {} WHERE {}", table, conditions),
        }
    }

    fn truncate_sql(&self, table: &str) -> String {
        format!("DELETE FROM {}", table)
    }

    fn limit_sql(&self, sql: String, limit: u64, offset: Option<u64>) -> String {
        match offset {
            Some(offset) if offset > 0 => format!("{} LIMIT {} OFFSET {}", sql, limit, offset),
            _ => format!("{} LIMIT {}", sql, limit),
        }
    }

    fn close(&mut self) {
        if self.conn.take().is_some() {
            info!(target: "quarry::sqlite", "SQLite database closed");
        }
    }
}
