//! Write terminals: INSERT, REPLACE, UPDATE, DELETE and batches.

use tracing::{debug, info};

use super::builder::QueryBuilder;
use super::compile::render_fragments;
use crate::result::Record;
use crate::Result;

/// Rows per statement for batch writes.
pub const BATCH_CHUNK_SIZE: usize = 100;

impl QueryBuilder<'_> {
    fn set_pairs(&self) -> (Vec<String>, Vec<String>) {
        let set = &self.state.live.set;
        (set.keys().cloned().collect(), set.values().cloned().collect())
    }

    /// WHERE fragments followed by LIKE fragments, as one condition list.
    fn conditions(&self) -> Vec<String> {
        let mut conditions = render_fragments(&self.state.live.where_);
        let likes = render_fragments(&self.state.live.like);
        for (i, like) in likes.into_iter().enumerate() {
            if i == 0 && !conditions.is_empty() {
                conditions.push(format!("AND {}", like));
            } else {
                conditions.push(like);
            }
        }
        conditions
    }

    fn execute_write(&mut self, sql: &str) -> Result<()> {
        debug!(target: "quarry::builder", sql = %sql, "compiled write");
        self.driver.query(sql, &[])?;
        Ok(())
    }

    /// Inserts the `set` assignments.
    ///
    /// # Errors
    ///
    /// Usage error without `set` data or without a resolvable table.
    pub fn insert(&mut self, table: Option<&str>) -> Result<()> {
        if self.state.live.set.is_empty() {
            return Err(self.missing_set());
        }
        let table = self.target_table(table)?;
        let (keys, values) = self.set_pairs();
        let sql = self.driver.backend().insert_sql(&table, &keys, &values);
        self.state.reset_write();
        self.execute_write(&sql)
    }

    /// Inserts a record directly.
    pub fn insert_record(&mut self, table: Option<&str>, record: &Record) -> Result<()> {
        self.set_record(record);
        self.insert(table)
    }

    /// REPLACE with the `set` assignments.
    pub fn replace(&mut self, table: Option<&str>) -> Result<()> {
        if self.state.live.set.is_empty() {
            return Err(self.missing_set());
        }
        let table = self.target_table(table)?;
        let (keys, values) = self.set_pairs();
        let sql = self.driver.backend().replace_sql(&table, &keys, &values);
        self.state.reset_write();
        self.execute_write(&sql)
    }

    /// Updates rows with the `set` assignments.
    ///
    /// `where_` is a raw condition added before compiling. Without a table
    /// argument the first FROM table is used.
    ///
    /// A refused call clears nothing: accumulated WHERE, LIKE and ORDER BY
    /// clauses stay and apply to the next terminal call.
    pub fn update(&mut self, table: Option<&str>, where_: Option<&str>, limit: Option<u64>) -> Result<()> {
        self.state.merge_cache();

        if self.state.live.set.is_empty() {
            return Err(self.missing_set());
        }
        let table = self.target_table(table)?;
        if let Some(condition) = where_.filter(|w| !w.trim().is_empty()) {
            self.where_raw(condition);
        }
        if let Some(limit) = limit {
            self.limit(limit);
        }

        let set: Vec<(String, String)> = self
            .state
            .live
            .set
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let sql = self.driver.backend().update_sql(
            &table,
            &set,
            &self.conditions(),
            &self.state.live.order_by,
            self.state.limit,
        );
        self.state.reset_write();
        self.execute_write(&sql)
    }

    /// Deletes rows. Refused unless a WHERE or LIKE condition is present.
    ///
    /// `where_` is a raw condition added before compiling. Without a table
    /// argument the first FROM table is used.
    ///
    /// A refused call clears nothing: accumulated clauses stay and apply to
    /// the next terminal call.
    pub fn delete(&mut self, table: Option<&str>, where_: Option<&str>) -> Result<()> {
        self.delete_impl(table, where_, true)
    }

    /// Runs the same conditional delete against several tables.
    pub fn delete_tables(&mut self, tables: &[&str], where_: Option<&str>, limit: Option<u64>) -> Result<()> {
        if let Some(condition) = where_.filter(|w| !w.trim().is_empty()) {
            self.where_raw(condition);
        }
        if let Some(limit) = limit {
            self.limit(limit);
        }
        let outcome = tables
            .iter()
            .try_for_each(|table| self.delete_impl(Some(*table), None, false));
        self.state.reset_write();
        outcome
    }

    fn delete_impl(&mut self, table: Option<&str>, where_: Option<&str>, reset: bool) -> Result<()> {
        self.state.merge_cache();

        let table = self.target_table(table)?;
        if let Some(condition) = where_.filter(|w| !w.trim().is_empty()) {
            self.where_raw(condition);
        }

        if self.state.live.where_.is_empty() && self.state.live.like.is_empty() {
            return Err(self
                .driver
                .usage_error("Deletes are not allowed unless they contain a \"where\" or \"like\" clause."));
        }

        let wheres = render_fragments(&self.state.live.where_);
        let likes = render_fragments(&self.state.live.like);
        let sql = self
            .driver
            .backend()
            .delete_sql(&table, &wheres, &likes, self.state.limit);
        if reset {
            self.state.reset_write();
        }
        self.execute_write(&sql)
    }

    /// Deletes every row with a DELETE statement.
    pub fn empty_table(&mut self, table: Option<&str>) -> Result<()> {
        let table = self.target_table(table)?;
        let sql = self.driver.backend().empty_table_sql(&table);
        self.state.reset_write();
        info!(target: "quarry::builder", table = %table, "emptying table");
        self.execute_write(&sql)
    }

    /// Deletes every row with the backend's truncate statement.
    pub fn truncate(&mut self, table: Option<&str>) -> Result<()> {
        let table = self.target_table(table)?;
        let sql = self.driver.backend().truncate_sql(&table);
        self.state.reset_write();
        info!(target: "quarry::builder", table = %table, "truncating table");
        self.execute_write(&sql)
    }

    /// Inserts queued rows, `BATCH_CHUNK_SIZE` per statement.
    ///
    /// Rows passed here are queued first. Stops at the first failing chunk;
    /// earlier chunks stay applied. Returns the total affected rows.
    pub fn insert_batch(&mut self, table: Option<&str>, rows: Option<&[Record]>) -> Result<u64> {
        if let Some(rows) = rows {
            self.set_insert_batch(rows)?;
        }
        if self.state.batch.is_empty() {
            return Err(self.missing_set());
        }
        let table = self.target_table(table)?;

        let batch = std::mem::take(&mut self.state.batch);
        let keys: Vec<String> = batch[0].iter().map(|(k, _)| k.clone()).collect();

        let mut affected = 0;
        for chunk in batch.chunks(BATCH_CHUNK_SIZE) {
            let tuples: Vec<String> = chunk
                .iter()
                .map(|row| {
                    let values: Vec<&str> = row.iter().map(|(_, v)| v.as_str()).collect();
                    format!("({})", values.join(", "))
                })
                .collect();
            let sql = self.driver.backend().insert_batch_sql(&table, &keys, &tuples);
            if let Err(e) = self.execute_write(&sql) {
                self.state.reset_write();
                return Err(e);
            }
            affected += self.driver.affected_rows();
        }

        self.state.reset_write();
        Ok(affected)
    }

    /// Updates queued rows matched on an index column, `BATCH_CHUNK_SIZE`
    /// per statement. Returns the total affected rows.
    pub fn update_batch(&mut self, table: Option<&str>, rows: Option<&[Record]>, index: Option<&str>) -> Result<u64> {
        self.state.merge_cache();

        if let Some(rows) = rows {
            let index = index.unwrap_or_default();
            self.set_update_batch(rows, index)?;
        }
        let Some(index) = self.state.batch_index.clone() else {
            return Err(self
                .driver
                .usage_error("You must specify an index to match on for batch updates."));
        };
        if self.state.batch.is_empty() {
            return Err(self.missing_set());
        }
        let table = self.target_table(table)?;

        let batch = std::mem::take(&mut self.state.batch);
        let wheres = render_fragments(&self.state.live.where_);

        let mut affected = 0;
        for chunk in batch.chunks(BATCH_CHUNK_SIZE) {
            let sql = self
                .driver
                .backend()
                .update_batch_sql(&table, chunk, &index, &wheres);
            if let Err(e) = self.execute_write(&sql) {
                self.state.reset_write();
                return Err(e);
            }
            affected += self.driver.affected_rows();
        }

        self.state.reset_write();
        Ok(affected)
    }
}
