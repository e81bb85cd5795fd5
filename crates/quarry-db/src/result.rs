//! Result cursor over one executed query.
//!
//! A `QueryResult` wraps the backend's raw result handle and materializes its
//! rows on first access as object rows (`Row`), associative rows (`Record`) or
//! caller-defined types via serde. Each representation is built once and kept.
//! The cursor also carries a current-row pointer that only the
//! first/last/next/previous accessors move.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::backend::{FieldMeta, RawResult};
use crate::{DbError, Result, Value};

/// An associative row: column name to value, in column order.
pub type Record = IndexMap<String, Value>;

/// An object row: ordered column names plus values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value of a column by name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    /// Value of a column by position.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_record(&self) -> Record {
        self.columns
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

/// A detached copy of a read result, as stored by the query cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub num_rows: usize,
}

enum Source {
    Live(Box<dyn RawResult>),
    Detached(Vec<Vec<Value>>),
    Freed,
}

/// Cursor over one executed read statement.
pub struct QueryResult {
    source: Source,
    columns: Arc<[String]>,
    num_rows: usize,
    objects: Option<Vec<Row>>,
    arrays: Option<Vec<Record>>,
    custom: HashMap<TypeId, Box<dyn Any + Send>>,
    /// Associative view of row 0 for lookups by column name
    row_data: Option<Record>,
    current_row: usize,
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match self.source {
            Source::Live(_) => "live",
            Source::Detached(_) => "detached",
            Source::Freed => "freed",
        };
        f.debug_struct("QueryResult")
            .field("source", &source)
            .field("columns", &self.columns)
            .field("num_rows", &self.num_rows)
            .field("current_row", &self.current_row)
            .finish()
    }
}

impl QueryResult {
    /// Wraps a live backend result.
    pub fn from_raw(raw: Box<dyn RawResult>) -> Self {
        let columns: Arc<[String]> = raw.field_names().into();
        let num_rows = raw.num_rows();
        Self::with_source(Source::Live(raw), columns, num_rows)
    }

    /// Builds a detached cursor from a cached snapshot.
    pub fn from_cached(snapshot: CachedResult) -> Self {
        let columns: Arc<[String]> = snapshot.columns.into();
        Self::with_source(Source::Detached(snapshot.rows), columns, snapshot.num_rows)
    }

    /// A read that produced no result set.
    pub fn empty() -> Self {
        Self::with_source(Source::Detached(Vec::new()), Arc::from(Vec::new()), 0)
    }

    fn with_source(source: Source, columns: Arc<[String]>, num_rows: usize) -> Self {
        Self {
            source,
            columns,
            num_rows,
            objects: None,
            arrays: None,
            custom: HashMap::new(),
            row_data: None,
            current_row: 0,
        }
    }

    /// True when the cursor holds no backend resource.
    pub fn is_detached(&self) -> bool {
        !matches!(self.source, Source::Live(_))
    }

    fn fetch_all(&mut self) -> Vec<Vec<Value>> {
        match &mut self.source {
            Source::Live(raw) => {
                if !raw.seek(0) {
                    return Vec::new();
                }
                let mut rows = Vec::with_capacity(self.num_rows);
                while let Some(row) = raw.fetch_row() {
                    rows.push(row);
                }
                rows
            }
            Source::Detached(rows) => rows.clone(),
            Source::Freed => Vec::new(),
        }
    }

    /// All rows as object rows.
    pub fn result(&mut self) -> &[Row] {
        if self.objects.is_none() {
            let columns = self.columns.clone();
            let values: Vec<Vec<Value>> = if self.arrays.is_some() {
                self.arrays
                    .iter()
                    .flatten()
                    .map(|r| r.values().cloned().collect())
                    .collect()
            } else {
                self.fetch_all()
            };
            let rows = values
                .into_iter()
                .map(|v| Row::new(columns.clone(), v))
                .collect();
            self.objects = Some(rows);
        }
        self.objects.as_deref().unwrap_or_default()
    }

    /// All rows as associative records.
    pub fn result_array(&mut self) -> &[Record] {
        if self.arrays.is_none() {
            let records = self.result().iter().map(Row::to_record).collect();
            self.arrays = Some(records);
        }
        self.arrays.as_deref().unwrap_or_default()
    }

    /// All rows deserialized into `T`, one column per field.
    pub fn result_as<T>(&mut self) -> Result<&[T]>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let key = TypeId::of::<T>();
        if !self.custom.contains_key(&key) {
            let typed = self
                .result_array()
                .iter()
                .map(record_into::<T>)
                .collect::<Result<Vec<T>>>()?;
            self.custom.insert(key, Box::new(typed));
        }
        self.custom
            .get(&key)
            .and_then(|rows| rows.downcast_ref::<Vec<T>>())
            .map(Vec::as_slice)
            .ok_or_else(|| DbError::Serialization("custom row cache holds another type".to_string()))
    }

    /// Row `n` as an object row. Does not move the current-row pointer.
    pub fn row(&mut self, n: usize) -> Option<Row> {
        self.result().get(n).cloned()
    }

    pub fn row_array(&mut self, n: usize) -> Option<Record> {
        self.result_array().get(n).cloned()
    }

    pub fn row_as<T>(&mut self, n: usize) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.result_array().get(n).map(record_into::<T>).transpose()
    }

    /// Column of the first row, read through a cached associative view.
    pub fn row_value(&mut self, column: &str) -> Option<Value> {
        if self.row_data.is_none() {
            self.row_data = self.row_array(0);
        }
        self.row_data.as_ref().and_then(|r| r.get(column)).cloned()
    }

    pub fn first_row(&mut self) -> Option<Row> {
        if self.result().is_empty() {
            return None;
        }
        self.current_row = 0;
        self.row(0)
    }

    pub fn last_row(&mut self) -> Option<Row> {
        let len = self.result().len();
        if len == 0 {
            return None;
        }
        self.current_row = len - 1;
        self.row(self.current_row)
    }

    /// Advances the pointer unless it is already on the last row.
    pub fn next_row(&mut self) -> Option<Row> {
        let len = self.result().len();
        if len == 0 {
            return None;
        }
        if self.current_row + 1 < len {
            self.current_row += 1;
        }
        self.row(self.current_row)
    }

    /// Moves the pointer back unless it is already on the first row.
    pub fn previous_row(&mut self) -> Option<Row> {
        if self.result().is_empty() {
            return None;
        }
        self.current_row = self.current_row.saturating_sub(1);
        self.row(self.current_row)
    }

    pub fn current_row(&self) -> usize {
        self.current_row
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_fields(&self) -> usize {
        match &self.source {
            Source::Live(raw) => raw.num_fields(),
            _ => 0,
        }
    }

    pub fn list_fields(&self) -> Vec<String> {
        match &self.source {
            Source::Live(raw) => raw.field_names(),
            _ => Vec::new(),
        }
    }

    pub fn field_data(&self) -> Vec<FieldMeta> {
        match &self.source {
            Source::Live(raw) => raw.field_data(),
            _ => Vec::new(),
        }
    }

    /// Releases the backend handle. Rows already materialized stay readable.
    pub fn free_result(&mut self) {
        if let Source::Live(raw) = &mut self.source {
            raw.free();
        }
        self.source = Source::Freed;
    }

    /// Materializes every row into a cache snapshot.
    pub fn to_cached(&mut self) -> CachedResult {
        let columns = self.columns.to_vec();
        let rows: Vec<Vec<Value>> = self.result().iter().map(|r| r.values().to_vec()).collect();
        CachedResult {
            columns,
            num_rows: rows.len(),
            rows,
        }
    }
}

fn record_into<T: DeserializeOwned>(record: &Record) -> Result<T> {
    let object: serde_json::Map<String, serde_json::Value> =
        record.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
    Ok(serde_json::from_value(serde_json::Value::Object(object))?)
}
