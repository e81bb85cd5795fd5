//! Connection settings.
//!
//! Settings are plain typed structs loaded with serde. A `DatabaseSettings`
//! document holds every named connection group plus the group used when the
//! caller asks for "default".

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::{DbError, Result};

fn default_true() -> bool {
    true
}

fn default_charset() -> String {
    "utf8".to_string()
}

fn default_collation() -> String {
    "utf8_general_ci".to_string()
}

/// Settings for one connection group.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectionConfig {
    /// Backend kind, resolved through the backend registration table
    #[serde(default)]
    pub dbdriver: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Database name (a file path for SQLite)
    #[serde(default)]
    pub database: String,
    /// Table prefix inserted by identifier protection
    #[serde(default)]
    pub dbprefix: String,
    /// Prefix written in raw SQL that is rewritten to `dbprefix`
    #[serde(default)]
    pub swap_pre: String,
    #[serde(default)]
    pub port: Option<u16>,
    /// Use a persistent connection
    #[serde(default)]
    pub pconnect: bool,
    /// Upgrade loggable failures to fatal errors
    #[serde(default)]
    pub db_debug: bool,
    /// Cache read query results
    #[serde(default)]
    pub cache_on: bool,
    /// Directory for cached results; in-memory cache when unset
    #[serde(default)]
    pub cachedir: Option<PathBuf>,
    /// Delete cached results whenever a write statement runs
    #[serde(default)]
    pub cache_autodel: bool,
    #[serde(default = "default_charset")]
    pub char_set: String,
    #[serde(default = "default_collation")]
    pub dbcollat: String,
    /// Open the connection as soon as the registry builds the driver
    #[serde(default = "default_true")]
    pub autoinit: bool,
    /// Enable the fluent query builder on this connection
    #[serde(default)]
    pub active_record: Option<bool>,
    #[serde(default = "default_true")]
    pub trans_enabled: bool,
    #[serde(default = "default_true")]
    pub trans_strict: bool,
    #[serde(default = "default_true")]
    pub save_queries: bool,
    /// Quote identifiers with the backend's escape character
    #[serde(default = "default_true")]
    pub protect_identifiers: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            dbdriver: String::new(),
            hostname: String::new(),
            username: String::new(),
            password: String::new(),
            database: String::new(),
            dbprefix: String::new(),
            swap_pre: String::new(),
            port: None,
            pconnect: false,
            db_debug: false,
            cache_on: false,
            cachedir: None,
            cache_autodel: false,
            char_set: default_charset(),
            dbcollat: default_collation(),
            autoinit: true,
            active_record: None,
            trans_enabled: true,
            trans_strict: true,
            save_queries: true,
            protect_identifiers: true,
        }
    }
}

impl ConnectionConfig {
    /// Creates a config for the given backend kind with defaults elsewhere.
    pub fn new(dbdriver: &str) -> Self {
        Self {
            dbdriver: dbdriver.to_string(),
            ..Default::default()
        }
    }

    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    pub fn prefix(mut self, dbprefix: &str) -> Self {
        self.dbprefix = dbprefix.to_string();
        self
    }

    pub fn swap_prefix(mut self, swap_pre: &str) -> Self {
        self.swap_pre = swap_pre.to_string();
        self
    }

    pub fn debug(mut self, db_debug: bool) -> Self {
        self.db_debug = db_debug;
        self
    }

    pub fn autoinit(mut self, autoinit: bool) -> Self {
        self.autoinit = autoinit;
        self
    }

    pub fn active_record(mut self, enabled: bool) -> Self {
        self.active_record = Some(enabled);
        self
    }

    pub fn cache(mut self, cache_on: bool, cachedir: Option<PathBuf>) -> Self {
        self.cache_on = cache_on;
        self.cachedir = cachedir;
        self
    }

    /// Whether the query builder is enabled (defaults to true).
    pub fn builder_enabled(&self) -> bool {
        self.active_record.unwrap_or(true)
    }

    /// Checks the fields every backend needs.
    pub fn validate(&self) -> Result<()> {
        if self.dbdriver.trim().is_empty() {
            return Err(DbError::Configuration(
                "You have not selected a database type to connect to.".to_string(),
            ));
        }
        Ok(())
    }
}

/// Typed lookup of connection settings by key.
pub trait ConfigSource: Send + Sync {
    /// Returns the settings for a named connection group.
    fn connection(&self, key: &str) -> Option<ConnectionConfig>;

    /// The group used when the caller asks for "default".
    fn active_group(&self) -> Option<String>;
}

/// A settings document with every connection group.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default)]
    pub active_group: Option<String>,
    /// Builder default for groups that do not set `active_record`
    #[serde(default = "default_true")]
    pub active_record: bool,
    #[serde(default)]
    pub connections: HashMap<String, ConnectionConfig>,
}

impl DatabaseSettings {
    pub fn new() -> Self {
        Self {
            active_record: true,
            ..Default::default()
        }
    }

    /// Adds or replaces a connection group.
    pub fn with_connection(mut self, key: &str, config: ConnectionConfig) -> Self {
        self.connections.insert(key.to_string(), config);
        self
    }

    pub fn with_active_group(mut self, key: &str) -> Self {
        self.active_group = Some(key.to_string());
        self
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| DbError::Configuration(format!("Invalid JSON settings: {}", e)))
    }

    /// Loads settings from a `.yaml`/`.yml` or `.json` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            DbError::Configuration(format!("Unable to read {}: {}", path.display(), e))
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text),
            other => Err(DbError::Configuration(format!(
                "Unsupported settings format: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }
}

impl ConfigSource for DatabaseSettings {
    fn connection(&self, key: &str) -> Option<ConnectionConfig> {
        self.connections.get(key).cloned().map(|mut config| {
            if config.active_record.is_none() {
                config.active_record = Some(self.active_record);
            }
            config
        })
    }

    fn active_group(&self) -> Option<String> {
        self.active_group.clone()
    }
}
