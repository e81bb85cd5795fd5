//! QueryBuilder struct and clause accumulators.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::state::{BuilderState, SelectItem};
use super::types::{AggregateKind, Connector, JoinKind, LikeSide, OrderDirection};
use crate::driver::identifiers::alias_of;
use crate::driver::Driver;
use crate::result::Record;
use crate::{DbError, Result, Value};

static OPERATOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\s|<|>|!|=|is null|is not null)").expect("operator regex is valid")
});

static JOIN_CONDITION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\w\.]+)([\W\s]+)(.+)").expect("join condition regex is valid"));

/// True when a condition key already carries a comparison operator.
pub(crate) fn has_operator(key: &str) -> bool {
    OPERATOR_RE.is_match(key.trim())
}

/// Fluent query builder bound to one connection.
///
/// Obtained from `Database::qb`. Clause calls accumulate into the
/// connection's builder state; terminal calls (`get`, `insert`, `update`,
/// `delete`, ...) compile, execute and clear what they consumed.
#[derive(Debug)]
pub struct QueryBuilder<'a> {
    pub(crate) driver: &'a mut Driver,
    pub(crate) state: &'a mut BuilderState,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(driver: &'a mut Driver, state: &'a mut BuilderState) -> Self {
        Self { driver, state }
    }

    /// The connection this builder runs on.
    pub fn driver(&mut self) -> &mut Driver {
        &mut *self.driver
    }

    pub(crate) fn protect(&self, item: &str, prefix_single: bool, escape: Option<bool>, field_exists: bool) -> String {
        let aliases = self.state.aliases();
        self.driver.protect_with(item, &aliases, prefix_single, escape, field_exists)
    }

    fn column(&self, item: &str) -> String {
        self.protect(item, false, None, true)
    }

    // ------------------------------------------------------------------
    // SELECT
    // ------------------------------------------------------------------

    /// Adds comma-separated columns to the select list.
    pub fn select(&mut self, columns: &str) -> &mut Self {
        self.select_escaped(columns, None)
    }

    /// Adds columns with an explicit quoting choice for this call.
    pub fn select_escaped(&mut self, columns: &str, escape: Option<bool>) -> &mut Self {
        for column in columns.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            self.state.add_select(SelectItem {
                text: column.to_string(),
                escape,
            });
        }
        self
    }

    pub fn select_max(&mut self, column: &str, alias: Option<&str>) -> Result<&mut Self> {
        self.select_aggregate_kind(AggregateKind::Max, column, alias)
    }

    pub fn select_min(&mut self, column: &str, alias: Option<&str>) -> Result<&mut Self> {
        self.select_aggregate_kind(AggregateKind::Min, column, alias)
    }

    pub fn select_avg(&mut self, column: &str, alias: Option<&str>) -> Result<&mut Self> {
        self.select_aggregate_kind(AggregateKind::Avg, column, alias)
    }

    pub fn select_sum(&mut self, column: &str, alias: Option<&str>) -> Result<&mut Self> {
        self.select_aggregate_kind(AggregateKind::Sum, column, alias)
    }

    /// Adds `KIND(column) AS alias` for a kind named by string.
    ///
    /// # Errors
    ///
    /// Returns a usage error for a kind other than MAX, MIN, AVG or SUM.
    pub fn select_aggregate(&mut self, kind: &str, column: &str, alias: Option<&str>) -> Result<&mut Self> {
        let parsed = kind
            .parse::<AggregateKind>()
            .map_err(|_| self.driver.usage_error(&format!("Invalid aggregate function: {}", kind.trim())))?;
        self.select_aggregate_kind(parsed, column, alias)
    }

    fn select_aggregate_kind(&mut self, kind: AggregateKind, column: &str, alias: Option<&str>) -> Result<&mut Self> {
        let column = column.trim();
        if column.is_empty() {
            return Err(self.driver.usage_error("The query you submitted is not valid."));
        }
        let alias = match alias.map(str::trim).filter(|a| !a.is_empty()) {
            Some(alias) => alias.to_string(),
            None => column.rsplit('.').next().unwrap_or(column).to_string(),
        };
        let text = format!("{}({}) AS {}", kind.to_sql(), self.column(column), alias);
        self.state.add_select(SelectItem { text, escape: None });
        Ok(self)
    }

    pub fn distinct(&mut self, distinct: bool) -> &mut Self {
        self.state.distinct = distinct;
        self
    }

    // ------------------------------------------------------------------
    // FROM / JOIN
    // ------------------------------------------------------------------

    /// Adds comma-separated tables, tracking any aliases they introduce.
    pub fn from(&mut self, tables: &str) -> &mut Self {
        for table in tables.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if let Some(alias) = alias_of(table) {
                self.state.add_alias(alias);
            }
            let protected = self.protect(table, true, None, false);
            self.state.add_from(protected);
        }
        self
    }

    /// Adds a JOIN. `kind` is one of LEFT, RIGHT, OUTER, INNER, LEFT OUTER,
    /// RIGHT OUTER; anything else gives a plain JOIN.
    pub fn join(&mut self, table: &str, condition: &str, kind: &str) -> &mut Self {
        let kind = JoinKind::parse(kind);

        if let Some(alias) = alias_of(table) {
            self.state.add_alias(alias);
        }

        let condition = match JOIN_CONDITION_RE.captures(condition) {
            Some(caps) => format!(
                "{}{}{}",
                self.column(&caps[1]),
                &caps[2],
                self.column(&caps[3])
            ),
            None => condition.to_string(),
        };

        let table = self.protect(table, true, None, false);
        let join = match kind {
            Some(kind) => format!("{} JOIN {} ON {}", kind.to_sql(), table, condition),
            None => format!("JOIN {} ON {}", table, condition),
        };
        self.state.add_join(join);
        self
    }

    // ------------------------------------------------------------------
    // WHERE / HAVING
    // ------------------------------------------------------------------

    /// Renders `key value`. A key without an operator gets `=`; a NULL value
    /// without an operator gets `IS NULL`.
    fn condition(&self, key: &str, value: &Value) -> String {
        if value.is_null() {
            if has_operator(key) {
                return self.column(key);
            }
            return format!("{} IS NULL", self.column(key));
        }
        let key = self.column(key);
        let operator = if has_operator(&key) { "" } else { " =" };
        format!("{}{} {}", key, operator, self.driver.escape(value))
    }

    /// `key = value`, joined with AND. The key may carry its own operator
    /// (`"age >"`).
    pub fn where_(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        let text = self.condition(key, &value.into());
        self.state.add_where(Connector::And, text);
        self
    }

    /// `key = value`, joined with OR.
    pub fn or_where(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        let text = self.condition(key, &value.into());
        self.state.add_where(Connector::Or, text);
        self
    }

    /// One AND condition per pair.
    pub fn where_all(&mut self, pairs: &[(&str, Value)]) -> &mut Self {
        for (key, value) in pairs {
            let text = self.condition(key, value);
            self.state.add_where(Connector::And, text);
        }
        self
    }

    pub fn where_null(&mut self, key: &str) -> &mut Self {
        self.where_(key, Value::Null)
    }

    /// Adds a condition verbatim.
    pub fn where_raw(&mut self, condition: &str) -> &mut Self {
        self.state.add_where(Connector::And, condition.trim().to_string());
        self
    }

    pub fn or_where_raw(&mut self, condition: &str) -> &mut Self {
        self.state.add_where(Connector::Or, condition.trim().to_string());
        self
    }

    fn where_in_impl<I, V>(&mut self, key: &str, values: I, not: bool, connector: Connector) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<String> = values
            .into_iter()
            .map(|v| self.driver.escape(&v.into()))
            .collect();
        if key.trim().is_empty() || values.is_empty() {
            return self;
        }
        let not = if not { "NOT " } else { "" };
        let text = format!("{} {}IN ({})", self.column(key), not, values.join(", "));
        self.state.add_where(connector, text);
        self
    }

    /// `key IN (...)`. An empty list adds nothing.
    pub fn where_in<I, V>(&mut self, key: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.where_in_impl(key, values, false, Connector::And)
    }

    pub fn or_where_in<I, V>(&mut self, key: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.where_in_impl(key, values, false, Connector::Or)
    }

    pub fn where_not_in<I, V>(&mut self, key: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.where_in_impl(key, values, true, Connector::And)
    }

    pub fn or_where_not_in<I, V>(&mut self, key: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.where_in_impl(key, values, true, Connector::Or)
    }

    pub fn having(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        let text = self.condition(key, &value.into());
        self.state.add_having(Connector::And, text);
        self
    }

    pub fn or_having(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        let text = self.condition(key, &value.into());
        self.state.add_having(Connector::Or, text);
        self
    }

    pub fn having_raw(&mut self, condition: &str) -> &mut Self {
        self.state.add_having(Connector::And, condition.trim().to_string());
        self
    }

    // ------------------------------------------------------------------
    // LIKE
    // ------------------------------------------------------------------

    fn like_impl(&mut self, field: &str, pattern: &str, side: LikeSide, not: bool, connector: Connector) -> &mut Self {
        let escaped = self.driver.escape_like_str(pattern);
        let not = if not { "NOT " } else { "" };
        let clause = self.driver.backend().like_escape_clause().unwrap_or_default();
        let text = format!(
            "{} {}LIKE '{}'{}",
            self.column(field),
            not,
            side.pattern(&escaped),
            clause
        );
        self.state.add_like(connector, text);
        self
    }

    pub fn like(&mut self, field: &str, pattern: &str, side: LikeSide) -> &mut Self {
        self.like_impl(field, pattern, side, false, Connector::And)
    }

    pub fn not_like(&mut self, field: &str, pattern: &str, side: LikeSide) -> &mut Self {
        self.like_impl(field, pattern, side, true, Connector::And)
    }

    pub fn or_like(&mut self, field: &str, pattern: &str, side: LikeSide) -> &mut Self {
        self.like_impl(field, pattern, side, false, Connector::Or)
    }

    pub fn or_not_like(&mut self, field: &str, pattern: &str, side: LikeSide) -> &mut Self {
        self.like_impl(field, pattern, side, true, Connector::Or)
    }

    // ------------------------------------------------------------------
    // GROUP BY / ORDER BY / LIMIT
    // ------------------------------------------------------------------

    pub fn group_by(&mut self, columns: &str) -> &mut Self {
        for column in columns.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let protected = self.column(column);
            self.state.add_group_by(protected);
        }
        self
    }

    /// Adds an ORDER BY entry.
    ///
    /// `direction` is ASC, DESC, empty, or "random" for the backend's random
    /// ordering. Other text orders ascending.
    pub fn order_by(&mut self, columns: &str, direction: &str) -> &mut Self {
        let direction = OrderDirection::parse(direction);
        if direction == Some(OrderDirection::Random) {
            let keyword = self.driver.backend().random_keyword().to_string();
            self.state.add_order_by(keyword);
            return self;
        }

        let aliases = self.state.aliases();
        let columns = columns
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|c| if aliases.iter().any(|a| a == c) { c.to_string() } else { self.column(c) })
            .collect::<Vec<_>>()
            .join(", ");
        if columns.is_empty() {
            return self;
        }

        let order = match direction {
            Some(direction) => format!("{} {}", columns, direction.to_sql()),
            None => columns,
        };
        self.state.add_order_by(order);
        self
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.state.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.state.offset = Some(offset);
        self
    }

    // ------------------------------------------------------------------
    // SET
    // ------------------------------------------------------------------

    /// Assigns an escaped value for the next insert or update.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        let key = self.protect(key, false, Some(true), true);
        let value = self.driver.escape(&value.into());
        self.state.add_set(key, value);
        self
    }

    /// Assigns an expression that is not escaped (`"count + 1"`).
    pub fn set_raw(&mut self, key: &str, expression: &str) -> &mut Self {
        let key = self.protect(key, false, Some(true), true);
        self.state.add_set(key, expression.to_string());
        self
    }

    /// Assigns every column of a record.
    pub fn set_record(&mut self, record: &Record) -> &mut Self {
        for (key, value) in record {
            self.set(key, value.clone());
        }
        self
    }

    /// Queues rows for `insert_batch`. Every row must have the first row's columns.
    pub fn set_insert_batch(&mut self, rows: &[Record]) -> Result<&mut Self> {
        let Some(first) = rows.first() else {
            return Ok(self);
        };
        let keys: Vec<&String> = first.keys().collect();
        if rows
            .iter()
            .any(|row| row.len() != keys.len() || keys.iter().any(|k| !row.contains_key(k.as_str())))
        {
            return Err(self
                .driver
                .usage_error("One or more rows submitted for batch inserting do not share the same columns."));
        }
        for row in rows {
            let escaped = keys
                .iter()
                .map(|k| {
                    let value = row.get(k.as_str()).cloned().unwrap_or(Value::Null);
                    (self.driver.escape_identifiers(k), self.driver.escape(&value))
                })
                .collect();
            self.state.batch.push(escaped);
        }
        Ok(self)
    }

    /// Queues rows for `update_batch`, matched on `index`.
    pub fn set_update_batch(&mut self, rows: &[Record], index: &str) -> Result<&mut Self> {
        if index.trim().is_empty() {
            return Err(self
                .driver
                .usage_error("You must specify an index to match on for batch updates."));
        }
        if rows.iter().any(|row| !row.contains_key(index)) {
            return Err(self
                .driver
                .usage_error("One or more rows submitted for batch updating is missing the specified index."));
        }

        let protected_index = self.protect(index, false, None, true);
        for row in rows {
            let escaped = row
                .iter()
                .map(|(k, v)| (self.protect(k, false, None, true), self.driver.escape(v)))
                .collect();
            self.state.batch.push(escaped);
        }
        self.state.batch_index = Some(protected_index);
        Ok(self)
    }

    // ------------------------------------------------------------------
    // Cache snapshot
    // ------------------------------------------------------------------

    /// Starts recording clauses into the cache snapshot.
    pub fn start_cache(&mut self) -> &mut Self {
        debug!(target: "quarry::builder", "query cache started");
        self.state.start_cache();
        self
    }

    pub fn stop_cache(&mut self) -> &mut Self {
        self.state.stop_cache();
        self
    }

    /// Empties the cache snapshot.
    pub fn flush_cache(&mut self) -> &mut Self {
        self.state.flush_cache();
        self
    }

    /// Clears every live clause.
    pub fn reset_query(&mut self) -> &mut Self {
        self.state.reset_select();
        self.state.reset_write();
        self
    }

    /// Resolves the target table: the argument, else the first FROM table.
    pub(crate) fn target_table(&self, table: Option<&str>) -> Result<String> {
        match table.map(str::trim).filter(|t| !t.is_empty()) {
            Some(table) => Ok(self.protect(table, true, None, false)),
            None => self
                .state
                .live
                .from
                .first()
                .cloned()
                .ok_or_else(|| self.driver.usage_error("You must set the database table to be used with your query.")),
        }
    }

    pub(crate) fn missing_set(&self) -> DbError {
        self.driver
            .usage_error("You must use the \"set\" method to update an entry.")
    }
}
