//! Driver core: one connection, its execution pipeline and transactions.
//!
//! # Execution pipeline
//!
//! `Driver::query` runs every statement through the same steps:
//! 1. reject empty SQL
//! 2. rewrite the swap prefix to the table prefix
//! 3. substitute bind markers
//! 4. serve cached reads when result caching is on
//! 5. connect lazily, record, time and execute
//! 6. on failure flag the open transaction and return (or raise) the error
//! 7. on success return `Written` for write statements or a cursor for reads

mod metadata;

pub mod identifiers;
pub mod transaction;

pub use identifiers::IdentifierRules;
pub use transaction::{TransactionOutcome, TransactionState};

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::backend::{Backend, RawResult};
use crate::cache::{FileCache, MemoryCache, QueryCache};
use crate::config::ConnectionConfig;
use crate::result::QueryResult;
use crate::{DbError, Result, Value};

/// Placeholder replaced by a bound value.
pub const BIND_MARKER: char = '?';

static WRITE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)^\s*"?(SET|INSERT|UPDATE|DELETE|REPLACE|CREATE|DROP|TRUNCATE|ALTER|GRANT|REVOKE|LOCK|UNLOCK)\s+"#,
    )
    .expect("write-type regex is valid")
});

/// True for statements that change data or schema.
pub fn is_write_type(sql: &str) -> bool {
    WRITE_RE.is_match(sql)
}

/// Matches `swap` at the start of a word, when it differs from `prefix`.
fn swap_regex(prefix: &str, swap: &str) -> Option<Regex> {
    if prefix.is_empty() || swap.is_empty() || prefix == swap {
        return None;
    }
    Regex::new(&format!(r"(\W){}(\S+?)", regex::escape(swap))).ok()
}

/// What a successful `query` produced.
#[derive(Debug)]
pub enum QueryOutcome {
    /// A write statement ran; there is no cursor
    Written,
    /// A read statement ran
    Rows(QueryResult),
}

impl QueryOutcome {
    pub fn is_write(&self) -> bool {
        matches!(self, QueryOutcome::Written)
    }

    /// The cursor of a read, or an empty cursor for a write.
    pub fn into_result(self) -> QueryResult {
        match self {
            QueryOutcome::Rows(result) => result,
            QueryOutcome::Written => QueryResult::empty(),
        }
    }
}

/// Table and column names already read from the backend.
#[derive(Debug, Default)]
pub(crate) struct MetadataCache {
    pub(crate) tables: Option<Vec<String>>,
    pub(crate) fields: HashMap<String, Vec<String>>,
}

/// One database connection.
pub struct Driver {
    config: ConnectionConfig,
    backend: Box<dyn Backend>,
    rules: IdentifierRules,
    swap_re: Option<Regex>,
    trans: TransactionState,
    cache: Option<Box<dyn QueryCache>>,
    cache_on: bool,
    queries: Vec<String>,
    query_times: Vec<Duration>,
    query_count: usize,
    pub(crate) metadata: MetadataCache,
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("platform", &self.backend.platform())
            .field("connected", &self.backend.is_connected())
            .field("trans_depth", &self.trans.depth())
            .field("cache_on", &self.cache_on)
            .field("query_count", &self.query_count)
            .finish()
    }
}

impl Driver {
    /// Wraps a backend. The connection is not opened until `initialize`.
    pub fn new(config: ConnectionConfig, backend: Box<dyn Backend>) -> Self {
        let rules = IdentifierRules {
            prefix: config.dbprefix.clone(),
            swap_pre: config.swap_pre.clone(),
            escape_char: backend.escape_char(),
            protect: config.protect_identifiers,
        };
        let trans = TransactionState::new(config.trans_enabled, config.trans_strict);
        let cache_on = config.cache_on;
        let swap_re = swap_regex(&config.dbprefix, &config.swap_pre);
        Self {
            config,
            backend,
            rules,
            swap_re,
            trans,
            cache: None,
            cache_on,
            queries: Vec::new(),
            query_times: Vec::new(),
            query_count: 0,
            metadata: MetadataCache::default(),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn debug_enabled(&self) -> bool {
        self.config.db_debug
    }

    pub(crate) fn rules(&self) -> &IdentifierRules {
        &self.rules
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Applies the debug-mode upgrade to a loggable failure.
    pub(crate) fn raise(&self, err: DbError) -> DbError {
        if self.config.db_debug {
            err.into_fatal()
        } else {
            err
        }
    }

    /// Logs a refused operation and returns it as an error.
    pub(crate) fn usage_error(&self, message: &str) -> DbError {
        error!(target: "quarry::builder", "{}", message);
        self.raise(DbError::Usage(message.to_string()))
    }

    /// Logs a missing backend feature and returns it as an error.
    pub(crate) fn unsupported(&self, feature: &str) -> DbError {
        let message = format!("This feature is not available for the database you are using: {}", feature);
        warn!(target: "quarry::driver", platform = self.backend.platform(), "{}", message);
        self.raise(DbError::Unsupported(message))
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Opens the connection, selects the database and sets the charset.
    ///
    /// Returns immediately when the connection is already open.
    #[instrument(skip(self), fields(platform = self.backend.platform(), database = %self.config.database))]
    pub fn initialize(&mut self) -> Result<()> {
        if self.backend.is_connected() {
            return Ok(());
        }

        let connected = if self.config.pconnect {
            self.backend.persistent_connect(&self.config)
        } else {
            self.backend.connect(&self.config)
        };
        if let Err(e) = connected {
            error!(target: "quarry::driver", error = %e, "Unable to connect to the database");
            return Err(self.raise(e));
        }

        if !self.config.database.is_empty() {
            if let Err(e) = self.backend.select_database(&self.config.database) {
                error!(target: "quarry::driver", error = %e, "Unable to select the specified database");
                let err = DbError::Connection(format!(
                    "Unable to select the specified database: {}",
                    self.config.database
                ));
                return Err(self.raise(err));
            }
        }

        if let Err(e) = self.backend.set_charset(&self.config.char_set, &self.config.dbcollat) {
            error!(target: "quarry::driver", error = %e, "Unable to set client connection character set");
            let err = DbError::Connection(format!(
                "Unable to set client connection character set: {}",
                self.config.char_set
            ));
            return Err(self.raise(err));
        }

        info!(target: "quarry::driver", "Database connection initialized");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.backend.is_connected()
    }

    /// Keeps an open connection alive, or opens a closed one.
    pub fn reconnect(&mut self) -> Result<()> {
        if self.backend.is_connected() {
            return self.backend.reconnect().map_err(|e| self.raise(e));
        }
        self.initialize()
    }

    /// Closes the physical connection.
    pub fn close(&mut self) {
        if self.backend.is_connected() {
            self.backend.close();
            info!(target: "quarry::driver", "Database connection closed");
        }
    }

    pub fn platform(&self) -> &'static str {
        self.backend.platform()
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Runs a statement through the full pipeline.
    pub fn query(&mut self, sql: &str, binds: &[Value]) -> Result<QueryOutcome> {
        if sql.trim().is_empty() {
            error!(target: "quarry::driver", "Invalid query: empty statement");
            return Err(self.raise(DbError::query(0, "The query you submitted is not valid.")));
        }

        let mut sql = self.swap_prefix(sql);
        if !binds.is_empty() {
            sql = self.compile_binds(&sql, binds);
        }

        if self.cache_on && sql.to_ascii_uppercase().contains("SELECT") {
            if let Some(snapshot) = self.cache_store().and_then(|c| c.read(&sql)) {
                debug!(target: "quarry::cache", sql = %sql, "cache hit");
                return Ok(QueryOutcome::Rows(QueryResult::from_cached(snapshot)));
            }
            debug!(target: "quarry::cache", sql = %sql, "cache miss");
        }

        if !self.backend.is_connected() {
            self.initialize()?;
        }

        if self.config.save_queries {
            self.queries.push(sql.clone());
        }

        let started = Instant::now();
        let executed = self.backend.execute(&sql);
        let elapsed = started.elapsed();
        if self.config.save_queries {
            self.query_times.push(elapsed);
        }
        self.query_count += 1;

        let raw = match executed {
            Ok(raw) => raw,
            Err(err) => return Err(self.fail_query(err, &sql)),
        };

        if is_write_type(&sql) {
            if self.cache_on && self.config.cache_autodel {
                if let Some(cache) = self.cache_store() {
                    cache.delete_all();
                }
            }
            return Ok(QueryOutcome::Written);
        }

        let mut result = match raw {
            Some(raw) => QueryResult::from_raw(raw),
            None => QueryResult::empty(),
        };

        if self.cache_on {
            let snapshot = result.to_cached();
            if let Some(cache) = self.cache_store() {
                cache.write(&sql, &snapshot);
            }
        }

        Ok(QueryOutcome::Rows(result))
    }

    fn fail_query(&mut self, err: DbError, sql: &str) -> DbError {
        let err = match err {
            DbError::Query { code, message, .. } => DbError::Query {
                code,
                message,
                sql: sql.to_string(),
            },
            other => other,
        };
        self.trans.mark_failed();
        error!(
            target: "quarry::driver",
            code = self.backend.error_number(),
            message = %self.backend.error_message(),
            sql = %sql,
            "Query error"
        );

        if self.config.db_debug {
            while self.trans.depth() > 0 {
                let depth = self.trans.depth();
                if let Err(e) = self.trans_complete() {
                    warn!(target: "quarry::driver", error = %e, "rollback after failed query did not complete");
                }
                if self.trans.depth() == depth {
                    break;
                }
            }
            return err.into_fatal();
        }
        err
    }

    /// Runs a statement directly on the backend: no prefix swap, binds,
    /// recording or caching.
    pub fn simple_query(&mut self, sql: &str) -> Result<Option<Box<dyn RawResult>>> {
        if !self.backend.is_connected() {
            self.initialize()?;
        }
        self.backend.execute(sql).map_err(|e| self.raise(e))
    }

    fn swap_prefix(&self, sql: &str) -> String {
        match &self.swap_re {
            Some(re) => re
                .replace_all(sql, format!("${{1}}{}${{2}}", self.config.dbprefix))
                .into_owned(),
            None => sql.to_string(),
        }
    }

    /// Replaces bind markers left to right with escaped values.
    ///
    /// Extra values are ignored; markers without a value stay in place.
    pub fn compile_binds(&self, sql: &str, binds: &[Value]) -> String {
        let mut out = String::with_capacity(sql.len());
        let mut values = binds.iter();
        for ch in sql.chars() {
            if ch == BIND_MARKER {
                match values.next() {
                    Some(value) => out.push_str(&self.escape(value)),
                    None => out.push(ch),
                }
            } else {
                out.push(ch);
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Escaping and identifiers
    // ------------------------------------------------------------------

    /// Renders a value as a SQL literal.
    pub fn escape(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(v) => if *v { "1".to_string() } else { "0".to_string() },
            Value::Int(v) => v.to_string(),
            Value::Float(v) if v.is_finite() => v.to_string(),
            // NaN and infinities have no SQL literal.
            Value::Float(_) => "NULL".to_string(),
            Value::Text(s) => format!("'{}'", self.backend.escape_str(s, false)),
            Value::Bytes(b) => {
                let hex: String = b.iter().map(|byte| format!("{:02X}", byte)).collect();
                format!("X'{}'", hex)
            }
        }
    }

    pub fn escape_str(&self, s: &str) -> String {
        self.backend.escape_str(s, false)
    }

    /// Escapes a string for use inside a LIKE pattern.
    pub fn escape_like_str(&self, s: &str) -> String {
        self.backend.escape_str(s, true)
    }

    pub fn escape_identifiers(&self, item: &str) -> String {
        self.rules.escape_identifiers(item)
    }

    /// Prefixes and quotes an identifier with no tracked aliases.
    pub fn protect_identifiers(&self, item: &str, prefix_single: bool) -> String {
        self.rules.protect(item, &[], prefix_single, None, true)
    }

    pub(crate) fn protect_with(
        &self,
        item: &str,
        aliases: &[String],
        prefix_single: bool,
        escape: Option<bool>,
        field_exists: bool,
    ) -> String {
        self.rules.protect(item, aliases, prefix_single, escape, field_exists)
    }

    /// Adds the table prefix to a table name.
    pub fn dbprefix(&self, table: &str) -> String {
        self.rules.dbprefix(table)
    }

    /// Changes the table prefix for later statements.
    pub fn set_dbprefix(&mut self, prefix: &str) -> &str {
        self.rules.prefix = prefix.to_string();
        self.config.dbprefix = prefix.to_string();
        self.swap_re = swap_regex(&self.config.dbprefix, &self.config.swap_pre);
        &self.rules.prefix
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub fn last_query(&self) -> Option<&str> {
        self.queries.last().map(String::as_str)
    }

    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    pub fn query_times(&self) -> &[Duration] {
        &self.query_times
    }

    pub fn total_queries(&self) -> usize {
        self.query_count
    }

    /// Total time spent executing recorded statements.
    pub fn elapsed_time(&self) -> Duration {
        self.query_times.iter().sum()
    }

    pub fn insert_id(&self) -> u64 {
        self.backend.insert_id()
    }

    pub fn affected_rows(&self) -> u64 {
        self.backend.affected_rows()
    }

    pub fn error_message(&self) -> String {
        self.backend.error_message()
    }

    pub fn error_number(&self) -> i64 {
        self.backend.error_number()
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub fn trans_off(&mut self) {
        self.trans.enabled = false;
    }

    pub fn trans_strict(&mut self, strict: bool) {
        self.trans.strict = strict;
    }

    /// False once a statement inside the transaction group failed.
    pub fn trans_status(&self) -> bool {
        !self.trans.failed()
    }

    pub fn trans_depth(&self) -> u32 {
        self.trans.depth()
    }

    pub fn transaction(&self) -> &TransactionState {
        &self.trans
    }

    /// Opens a managed transaction level.
    pub fn trans_start(&mut self, test_mode: bool) -> Result<()> {
        if !self.trans.enabled() {
            return Ok(());
        }
        if self.trans.enter(test_mode) {
            if let Err(e) = self.physical_begin() {
                self.trans.depth = 0;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Closes a managed transaction level.
    pub fn trans_complete(&mut self) -> Result<TransactionOutcome> {
        if !self.trans.enabled() {
            return Ok(TransactionOutcome::Disabled);
        }
        let outcome = self.trans.leave();
        match outcome {
            TransactionOutcome::Committed => {
                self.backend.commit().map_err(|e| self.raise(e))?;
            }
            TransactionOutcome::RolledBack => {
                self.backend.rollback().map_err(|e| self.raise(e))?;
                debug!(target: "quarry::driver", "transaction failure");
            }
            _ => {}
        }
        Ok(outcome)
    }

    /// Opens a manual transaction. A no-op inside an open transaction.
    pub fn trans_begin(&mut self, test_mode: bool) -> Result<bool> {
        if !self.trans.enabled() || self.trans.depth() > 0 {
            return Ok(true);
        }
        self.trans.failed = test_mode;
        self.physical_begin()?;
        self.trans.depth = 1;
        Ok(true)
    }

    /// Commits a manual transaction. Only acts at the outermost level.
    pub fn trans_commit(&mut self) -> Result<bool> {
        if !self.trans.enabled() || self.trans.depth() != 1 {
            return Ok(true);
        }
        self.trans.depth = 0;
        self.backend.commit().map_err(|e| self.raise(e))?;
        Ok(true)
    }

    /// Rolls back a manual transaction. Only acts at the outermost level.
    pub fn trans_rollback(&mut self) -> Result<bool> {
        if !self.trans.enabled() || self.trans.depth() != 1 {
            return Ok(true);
        }
        self.trans.depth = 0;
        self.backend.rollback().map_err(|e| self.raise(e))?;
        Ok(true)
    }

    fn physical_begin(&mut self) -> Result<()> {
        if !self.backend.is_connected() {
            self.initialize()?;
        }
        self.backend.begin().map_err(|e| self.raise(e))
    }

    // ------------------------------------------------------------------
    // Result cache
    // ------------------------------------------------------------------

    /// Turns read-result caching on.
    pub fn cache_on(&mut self) -> bool {
        self.cache_on = true;
        true
    }

    pub fn cache_off(&mut self) -> bool {
        self.cache_on = false;
        false
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_on
    }

    /// Deletes every cached result.
    pub fn cache_delete_all(&mut self) -> bool {
        match self.cache_store() {
            Some(cache) => cache.delete_all(),
            None => false,
        }
    }

    /// Moves file caching to another directory.
    pub fn cache_set_path(&mut self, path: impl Into<PathBuf>) {
        self.config.cachedir = Some(path.into());
        self.cache = None;
    }

    /// Replaces the cache store.
    pub fn set_cache(&mut self, cache: Box<dyn QueryCache>) {
        self.cache = Some(cache);
    }

    fn cache_store(&mut self) -> Option<&mut Box<dyn QueryCache>> {
        if self.cache.is_none() {
            let store: Box<dyn QueryCache> = match &self.config.cachedir {
                Some(dir) => {
                    let cache = FileCache::new(dir.clone());
                    if !cache.is_usable() {
                        self.cache_on = false;
                        return None;
                    }
                    Box::new(cache)
                }
                None => Box::new(MemoryCache::new()),
            };
            self.cache = Some(store);
        }
        self.cache.as_mut()
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if self.backend.is_connected() {
            self.backend.close();
        }
    }
}
