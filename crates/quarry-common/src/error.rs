//! Error types for quarry

use thiserror::Error;

/// Result type alias for quarry operations
pub type Result<T> = std::result::Result<T, DbError>;

/// Unified error type for all quarry operations
#[derive(Error, Debug, Clone)]
pub enum DbError {
    /// Missing or invalid connection settings, or an unknown backend kind.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Connect, select-database or set-charset failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The backend rejected a statement.
    #[error("Query error {code}: {message}")]
    Query {
        /// Backend error number (0 when the backend reports none)
        code: i64,
        /// Backend error message
        message: String,
        /// The offending statement
        sql: String,
    },

    /// The active backend lacks the requested feature.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The caller asked for something the builder refuses to do.
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    /// A failure upgraded by debug mode. Hosts are expected to abort on it.
    #[error("{message}")]
    Fatal {
        /// Formatted, human-readable message
        message: String,
        /// Stack captured where the failure was upgraded
        backtrace: String,
        #[source]
        source: Box<DbError>,
    },
}

impl DbError {
    /// Builds a query error without an attached statement.
    pub fn query(code: i64, message: impl Into<String>) -> Self {
        DbError::Query {
            code,
            message: message.into(),
            sql: String::new(),
        }
    }

    /// Returns true if this error must abort the caller (the fatal-error contract).
    pub fn is_fatal(&self) -> bool {
        matches!(self, DbError::Configuration(_) | DbError::Fatal { .. })
    }

    /// Returns true if this is a refused builder operation
    pub fn is_usage(&self) -> bool {
        match self {
            DbError::Usage(_) => true,
            DbError::Fatal { source, .. } => source.is_usage(),
            _ => false,
        }
    }

    /// Returns true if the backend rejected a statement
    pub fn is_query(&self) -> bool {
        match self {
            DbError::Query { .. } => true,
            DbError::Fatal { source, .. } => source.is_query(),
            _ => false,
        }
    }

    /// The error that caused this one, looking through a debug-mode upgrade.
    pub fn root(&self) -> &DbError {
        match self {
            DbError::Fatal { source, .. } => source.root(),
            other => other,
        }
    }

    /// Upgrades this error into a fatal one with a display-style message.
    ///
    /// Configuration errors are already fatal and are returned unchanged.
    pub fn into_fatal(self) -> Self {
        if self.is_fatal() {
            return self;
        }
        let message = match &self {
            DbError::Query { code, message, sql } => {
                format!("A Database Error Occurred\nError Number: {}\n{}\n{}", code, message, sql)
            }
            other => format!("A Database Error Occurred\n{}", other),
        };
        DbError::Fatal {
            message,
            backtrace: std::backtrace::Backtrace::force_capture().to_string(),
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for DbError {
    fn from(err: serde_yaml::Error) -> Self {
        DbError::Configuration(format!("Invalid YAML settings: {}", err))
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        DbError::Io(err.to_string())
    }
}

// SQLite-specific error conversions (when sqlite-errors feature is enabled)
#[cfg(feature = "sqlite-errors")]
impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match &err {
            rusqlite::Error::SqliteFailure(failure, message) => {
                let message = message.clone().unwrap_or_else(|| err.to_string());
                match failure.code {
                    ErrorCode::CannotOpen | ErrorCode::NotADatabase | ErrorCode::PermissionDenied => {
                        DbError::Connection(message)
                    }
                    _ => DbError::query(failure.extended_code as i64, message),
                }
            }
            rusqlite::Error::InvalidPath(_) => DbError::Connection(err.to_string()),
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..) => {
                DbError::Serialization(err.to_string())
            }
            _ => DbError::query(0, err.to_string()),
        }
    }
}
