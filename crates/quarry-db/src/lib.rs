//! quarry: relational database access with a fluent query builder.
//!
//! # Layout
//!
//! - [`registry`]: named connections built from a settings source
//! - [`driver`]: one connection's execution pipeline, transactions,
//!   identifier protection and schema metadata
//! - [`query`]: the query builder
//! - [`result`]: the cursor over a read
//! - [`backend`]: the per-database seam, with a bundled SQLite backend
//! - [`cache`]: read-result caching
//!
//! # Example
//!
//! ```rust,ignore
//! use quarry_db::{ConnectionConfig, ConnectionRegistry, DatabaseSettings};
//!
//! let settings = DatabaseSettings::new()
//!     .with_connection("main", ConnectionConfig::new("sqlite").database("app.db"))
//!     .with_active_group("main");
//! let registry = ConnectionRegistry::new(settings);
//!
//! let db = registry.get("default", None)?;
//! let mut db = db.lock();
//! let mut qb = db.qb()?;
//! let users = qb.where_("active", 1).get(Some("users"))?;
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod database;
pub mod driver;
pub mod query;
pub mod registry;
pub mod result;
pub mod value;

pub use quarry_common::{DbError, Result};

pub use backend::{Backend, BackendRegistry, FieldMeta, RawResult};
pub use cache::{FileCache, MemoryCache, QueryCache};
pub use config::{ConfigSource, ConnectionConfig, DatabaseSettings};
pub use database::Database;
pub use driver::{Driver, QueryOutcome, TransactionOutcome};
pub use query::{LikeSide, QueryBuilder, BATCH_CHUNK_SIZE};
pub use registry::{ConnectionRegistry, SharedDatabase};
pub use result::{CachedResult, QueryResult, Record, Row};
pub use value::Value;

#[cfg(feature = "sqlite")]
pub use backend::sqlite::SqliteBackend;
