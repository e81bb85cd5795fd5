//! Schema introspection and whole-table helpers.

use tracing::debug;

use super::Driver;
use crate::backend::FieldMeta;
use crate::result::{QueryResult, Record};
use crate::{Result, Value};

impl Driver {
    fn read(&mut self, sql: &str) -> Result<QueryResult> {
        Ok(self.query(sql, &[])?.into_result())
    }

    /// First column of every row, as text.
    fn first_column(result: &mut QueryResult) -> Vec<String> {
        result
            .result()
            .iter()
            .filter_map(|row| row.get_index(0).map(Value::to_text))
            .collect()
    }

    /// Table names in the current database.
    ///
    /// With `constrain_by_prefix`, only tables carrying the table prefix.
    /// The unconstrained list is kept for the life of the connection.
    pub fn list_tables(&mut self, constrain_by_prefix: bool) -> Result<Vec<String>> {
        let constrain = constrain_by_prefix && !self.rules().prefix.is_empty();
        if !constrain {
            if let Some(tables) = &self.metadata.tables {
                return Ok(tables.clone());
            }
        }

        let prefix = constrain.then(|| self.rules().prefix.clone());
        let sql = self
            .backend()
            .list_tables_sql(prefix.as_deref())
            .ok_or_else(|| self.unsupported("list_tables"))?;

        let mut result = self.read(&sql)?;
        let tables = Self::first_column(&mut result);
        debug!(target: "quarry::driver", count = tables.len(), "listed tables");

        if !constrain {
            self.metadata.tables = Some(tables.clone());
        }
        Ok(tables)
    }

    /// Whether a table exists. The name is prefixed first.
    pub fn table_exists(&mut self, table: &str) -> Result<bool> {
        let table = self.dbprefix(table);
        Ok(self.list_tables(false)?.contains(&table))
    }

    /// Column names of a table. Cached per table.
    pub fn list_fields(&mut self, table: &str) -> Result<Vec<String>> {
        let table = self.dbprefix(table);
        if let Some(fields) = self.metadata.fields.get(&table) {
            return Ok(fields.clone());
        }

        let sql = self
            .backend()
            .list_columns_sql(&table)
            .ok_or_else(|| self.unsupported("list_fields"))?;

        let mut result = self.read(&sql)?;
        let fields = Self::first_column(&mut result);
        self.metadata.fields.insert(table, fields.clone());
        Ok(fields)
    }

    pub fn field_exists(&mut self, field: &str, table: &str) -> Result<bool> {
        Ok(self.list_fields(table)?.iter().any(|f| f == field))
    }

    /// Column metadata, read from a one-row probe of the table.
    pub fn field_data(&mut self, table: &str) -> Result<Vec<FieldMeta>> {
        if table.is_empty() {
            return Err(self.usage_error("The field_data function requires a table name."));
        }
        let table = self.protect_identifiers(table, true);
        let sql = self.backend().field_data_sql(&table);
        let result = self.read(&sql)?;
        Ok(result.field_data())
    }

    /// Primary key column: the flagged one if the backend reports it,
    /// otherwise the first column.
    pub fn primary(&mut self, table: &str) -> Result<Option<String>> {
        let data = self.field_data(table)?;
        if let Some(key) = data.iter().find(|f| f.primary_key) {
            return Ok(Some(key.name.clone()));
        }
        Ok(self.list_fields(table)?.into_iter().next())
    }

    /// Server version string.
    pub fn version(&mut self) -> Result<String> {
        let sql = self
            .backend()
            .version_sql()
            .ok_or_else(|| self.unsupported("version"))?;
        let mut result = self.read(&sql)?;
        Ok(result.row_value("ver").map(|v| v.to_text()).unwrap_or_default())
    }

    /// Row count of a whole table.
    pub fn count_all(&mut self, table: &str) -> Result<u64> {
        if table.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "{}{} FROM {}",
            self.backend().count_string(),
            self.protect_identifiers("numrows", false),
            self.protect_identifiers(table, true)
        );
        let mut result = self.read(&sql)?;
        Ok(result
            .row_value("numrows")
            .and_then(|v| v.as_i64())
            .map(|n| n.max(0) as u64)
            .unwrap_or(0))
    }

    /// INSERT statement text for a record. Nothing is executed.
    pub fn insert_string(&self, table: &str, record: &Record) -> String {
        let keys: Vec<String> = record.keys().map(|k| self.escape_identifiers(k)).collect();
        let values: Vec<String> = record.values().map(|v| self.escape(v)).collect();
        self.backend()
            .insert_sql(&self.protect_identifiers(table, true), &keys, &values)
    }

    /// UPDATE statement text for a record. Nothing is executed.
    ///
    /// `where_` is a raw condition and must not be empty.
    pub fn update_string(&self, table: &str, record: &Record, where_: &str) -> Result<String> {
        if where_.trim().is_empty() {
            return Err(self.usage_error("The update_string function requires a WHERE clause."));
        }
        let set: Vec<(String, String)> = record
            .iter()
            .map(|(k, v)| (self.protect_identifiers(k, false), self.escape(v)))
            .collect();
        Ok(self.backend().update_sql(
            &self.protect_identifiers(table, true),
            &set,
            &[where_.to_string()],
            &[],
            None,
        ))
    }

    /// Forgets cached table and column names.
    pub fn clear_metadata_cache(&mut self) {
        self.metadata.tables = None;
        self.metadata.fields.clear();
    }
}
