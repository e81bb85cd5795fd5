//! SELECT compilation and the read terminals.
//!
//! Clauses are emitted in a fixed order, each only when its list is
//! non-empty: SELECT, FROM, JOIN, WHERE (LIKE appended), GROUP BY, HAVING,
//! ORDER BY, LIMIT.

use tracing::debug;

use super::builder::QueryBuilder;
use super::state::Fragment;
use crate::result::QueryResult;
use crate::{Result, Value};

/// Renders conditions with their connectors. The first never carries one.
pub(crate) fn render_fragments(fragments: &[Fragment]) -> Vec<String> {
    fragments
        .iter()
        .enumerate()
        .map(|(i, fragment)| match (i, fragment.connector) {
            (0, _) => fragment.text.clone(),
            (_, Some(connector)) => format!("{} {}", connector.to_sql(), fragment.text),
            (_, None) => format!("AND {}", fragment.text),
        })
        .collect()
}

impl QueryBuilder<'_> {
    /// Compiles the current state into a SELECT without running or clearing it.
    pub fn compile_select(&mut self) -> String {
        self.compile_select_with(None)
    }

    pub(crate) fn compile_select_with(&mut self, select_override: Option<String>) -> String {
        self.state.merge_cache();
        let state = &*self.state;
        let live = &state.live;
        let backend = self.driver.backend();

        let mut sql = match select_override {
            Some(select) => select,
            None => {
                let mut sql = String::from(if state.distinct { "SELECT DISTINCT " } else { "SELECT " });
                if live.select.is_empty() {
                    sql.push('*');
                } else {
                    let columns: Vec<String> = live
                        .select
                        .iter()
                        .map(|item| self.protect(&item.text, false, item.escape, true))
                        .collect();
                    sql.push_str(&columns.join(", "));
                }
                sql
            }
        };

        if !live.from.is_empty() {
            sql.push_str(" FROM ");
            sql.push_str(&backend.from_tables(&live.from));
        }

        if !live.join.is_empty() {
            sql.push(' ');
            sql.push_str(&live.join.join(" "));
        }

        if !live.where_.is_empty() || !live.like.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&render_fragments(&live.where_).join(" "));
            if !live.like.is_empty() {
                if !live.where_.is_empty() {
                    sql.push_str(" AND ");
                }
                sql.push_str(&render_fragments(&live.like).join(" "));
            }
        }

        if !live.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&live.group_by.join(", "));
        }

        if !live.having.is_empty() {
            sql.push_str(" HAVING ");
            sql.push_str(&render_fragments(&live.having).join(" "));
        }

        if !live.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&live.order_by.join(", "));
        }

        if let Some(limit) = state.limit {
            sql = backend.limit_sql(sql, limit, state.offset);
        }

        sql
    }

    /// Compiles the SELECT for `table`, optionally clearing the state.
    pub fn get_compiled_select(&mut self, table: Option<&str>, reset: bool) -> String {
        if let Some(table) = table.filter(|t| !t.trim().is_empty()) {
            self.from(table);
        }
        let sql = self.compile_select();
        if reset {
            self.state.reset_select();
        }
        sql
    }

    /// Compiles, runs and clears a SELECT.
    pub fn get(&mut self, table: Option<&str>) -> Result<QueryResult> {
        self.get_with(table, None, None)
    }

    /// `get` with a limit and offset applied first.
    pub fn get_with(&mut self, table: Option<&str>, limit: Option<u64>, offset: Option<u64>) -> Result<QueryResult> {
        if let Some(table) = table.filter(|t| !t.trim().is_empty()) {
            self.from(table);
        }
        if let Some(limit) = limit {
            self.limit(limit);
        }
        if let Some(offset) = offset {
            self.offset(offset);
        }

        let sql = self.compile_select();
        debug!(target: "quarry::builder", sql = %sql, "compiled select");
        let outcome = self.driver.query(&sql, &[]);
        self.state.reset_select();
        Ok(outcome?.into_result())
    }

    /// `get` with one AND condition per pair.
    pub fn get_where(
        &mut self,
        table: Option<&str>,
        pairs: &[(&str, Value)],
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<QueryResult> {
        self.where_all(pairs);
        self.get_with(table, limit, offset)
    }

    /// Counts the rows the current state would select.
    pub fn count_all_results(&mut self, table: Option<&str>) -> Result<u64> {
        if let Some(table) = table.filter(|t| !t.trim().is_empty()) {
            self.from(table);
        }

        let select = format!(
            "{}{}",
            self.driver.backend().count_string(),
            self.protect("numrows", false, None, true)
        );
        let sql = self.compile_select_with(Some(select));
        let outcome = self.driver.query(&sql, &[]);
        self.state.reset_select();

        let mut result = outcome?.into_result();
        if result.num_rows() == 0 {
            return Ok(0);
        }
        Ok(result
            .row_value("numrows")
            .and_then(|v| v.as_i64())
            .map(|n| n.max(0) as u64)
            .unwrap_or(0))
    }
}
