//! Scripted backend for unit tests.
//!
//! Records every executed statement and physical transaction call in a shared
//! log the test keeps a handle to. Statements can be scripted to fail or to
//! return rows by substring match.

use parking_lot::Mutex;
use std::sync::Arc;

use super::{Backend, BufferedRows, FieldMeta, RawResult};
use crate::config::ConnectionConfig;
use crate::database::Database;
use crate::{DbError, Result, Value};

#[derive(Debug, Default)]
struct Script {
    statements: Vec<String>,
    begins: usize,
    commits: usize,
    rollbacks: usize,
    connects: usize,
    closes: usize,
    fail_on: Vec<String>,
    fail_connect: bool,
    responses: Vec<(String, Vec<String>, Vec<Vec<Value>>)>,
}

/// Test-side view of a `MockBackend`.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockHandle(Arc<Mutex<Script>>);

impl MockHandle {
    pub(crate) fn statements(&self) -> Vec<String> {
        self.0.lock().statements.clone()
    }

    pub(crate) fn last_statement(&self) -> Option<String> {
        self.0.lock().statements.last().cloned()
    }

    pub(crate) fn begins(&self) -> usize {
        self.0.lock().begins
    }

    pub(crate) fn commits(&self) -> usize {
        self.0.lock().commits
    }

    pub(crate) fn rollbacks(&self) -> usize {
        self.0.lock().rollbacks
    }

    pub(crate) fn connects(&self) -> usize {
        self.0.lock().connects
    }

    pub(crate) fn closes(&self) -> usize {
        self.0.lock().closes
    }

    /// Any statement containing `pattern` fails.
    pub(crate) fn fail_on(&self, pattern: &str) {
        self.0.lock().fail_on.push(pattern.to_string());
    }

    pub(crate) fn fail_connect(&self) {
        self.0.lock().fail_connect = true;
    }

    /// Any statement containing `pattern` returns these rows.
    pub(crate) fn respond(&self, pattern: &str, columns: &[&str], rows: Vec<Vec<Value>>) {
        let columns = columns.iter().map(|c| c.to_string()).collect();
        self.0.lock().responses.push((pattern.to_string(), columns, rows));
    }

    pub(crate) fn clear_statements(&self) {
        self.0.lock().statements.clear();
    }
}

/// MySQL-flavoured backend that never touches a real database.
#[derive(Debug, Default)]
pub(crate) struct MockBackend {
    script: MockHandle,
    connected: bool,
    last_error: Option<(i64, String)>,
    affected: u64,
    statements_run: u64,
}

impl MockBackend {
    pub(crate) fn new() -> (Self, MockHandle) {
        let backend = Self::default();
        let handle = backend.script.clone();
        (backend, handle)
    }

    /// Points this backend at an existing script, so several backends built
    /// by a factory share one log.
    pub(crate) fn attach(&mut self, handle: MockHandle) {
        self.script = handle;
    }
}

impl Backend for MockBackend {
    fn platform(&self) -> &'static str {
        "mock"
    }

    fn connect(&mut self, _config: &ConnectionConfig) -> Result<()> {
        let mut script = self.script.0.lock();
        script.connects += 1;
        if script.fail_connect {
            return Err(DbError::Connection("Unable to connect to the mock server".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn select_database(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn set_charset(&mut self, _charset: &str, _collation: &str) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> Result<Option<Box<dyn RawResult>>> {
        let mut script = self.script.0.lock();
        script.statements.push(sql.to_string());
        self.statements_run += 1;

        if script.fail_on.iter().any(|p| sql.contains(p.as_str())) {
            let message = format!("You have an error in your SQL syntax near '{}'", sql);
            self.last_error = Some((1064, message.clone()));
            return Err(DbError::query(1064, message));
        }
        self.last_error = None;

        if let Some((_, columns, rows)) = script.responses.iter().find(|(p, _, _)| sql.contains(p.as_str())) {
            let fields = columns.iter().map(|c| FieldMeta::named(c)).collect();
            self.affected = 0;
            return Ok(Some(Box::new(BufferedRows::new(fields, rows.clone()))));
        }

        if sql.trim_start().to_ascii_uppercase().starts_with("SELECT") {
            self.affected = 0;
            return Ok(Some(Box::new(BufferedRows::default())));
        }
        self.affected = 1;
        Ok(None)
    }

    fn begin(&mut self) -> Result<()> {
        self.script.0.lock().begins += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.script.0.lock().commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.script.0.lock().rollbacks += 1;
        Ok(())
    }

    fn insert_id(&self) -> u64 {
        self.statements_run
    }

    fn affected_rows(&self) -> u64 {
        self.affected
    }

    fn error_message(&self) -> String {
        self.last_error.as_ref().map(|(_, m)| m.clone()).unwrap_or_default()
    }

    fn error_number(&self) -> i64 {
        self.last_error.as_ref().map(|(c, _)| *c).unwrap_or(0)
    }

    fn list_tables_sql(&self, _prefix_limit: Option<&str>) -> Option<String> {
        Some("SHOW TABLES".to_string())
    }

    fn list_columns_sql(&self, table: &str) -> Option<String> {
        Some(format!("SHOW COLUMNS FROM `{}`", table))
    }

    fn close(&mut self) {
        if self.connected {
            self.script.0.lock().closes += 1;
        }
        self.connected = false;
    }
}

/// A database over a fresh mock backend.
pub(crate) fn mock_database(config: ConnectionConfig) -> (Database, MockHandle) {
    let (backend, handle) = MockBackend::new();
    (Database::new(config, Box::new(backend)), handle)
}

/// A mock database with the builder enabled and no prefix.
pub(crate) fn mock_db() -> (Database, MockHandle) {
    mock_database(ConnectionConfig::new("mock"))
}
