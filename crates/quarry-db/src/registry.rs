//! Process-wide table of named connections.
//!
//! `get` resolves a connection key to its settings, builds the backend and
//! hands back a shared handle. A key is built once; later lookups return the
//! same instance until it is closed.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::backend::BackendRegistry;
use crate::config::{ConfigSource, ConnectionConfig};
use crate::database::Database;
use crate::{DbError, Result};

/// Key that resolves to the source's active group.
pub const DEFAULT_KEY: &str = "default";

/// A connection shared between callers.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Named connections built from a settings source.
pub struct ConnectionRegistry {
    source: Box<dyn ConfigSource>,
    backends: BackendRegistry,
    instances: Mutex<HashMap<String, SharedDatabase>>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self.instances.lock().keys().cloned().collect();
        keys.sort();
        f.debug_struct("ConnectionRegistry")
            .field("backends", &self.backends)
            .field("instances", &keys)
            .finish()
    }
}

impl ConnectionRegistry {
    /// A registry over the bundled backends.
    pub fn new(source: impl ConfigSource + 'static) -> Self {
        Self::with_backends(source, BackendRegistry::bundled())
    }

    pub fn with_backends(source: impl ConfigSource + 'static, backends: BackendRegistry) -> Self {
        Self {
            source: Box::new(source),
            backends,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Mutable access to the backend table, for registering custom kinds.
    pub fn backends_mut(&mut self) -> &mut BackendRegistry {
        &mut self.backends
    }

    /// Returns the connection for `key`, building it on first use.
    ///
    /// An empty key or `"default"` means the source's active group. An
    /// `override_config` builds an unshared connection from those settings
    /// instead of the source.
    ///
    /// With `autoinit` the connection is opened immediately. A failed open is
    /// logged and the unopened connection is still returned, unless the
    /// failure is fatal (debug mode).
    ///
    /// # Errors
    ///
    /// Configuration error when the key has no settings, the settings are
    /// invalid, or the backend kind is unknown.
    #[instrument(skip(self, override_config))]
    pub fn get(&self, key: &str, override_config: Option<ConnectionConfig>) -> Result<SharedDatabase> {
        if let Some(config) = override_config {
            return self.build(key, config);
        }

        let key = self.resolve_key(key)?;
        if let Some(existing) = self.instances.lock().get(&key) {
            return Ok(Arc::clone(existing));
        }

        let config = self.source.connection(&key).ok_or_else(|| {
            error!(target: "quarry::registry", key = %key, "no settings for connection");
            DbError::Configuration(format!(
                "You have specified an invalid database connection group ({}) in your config file.",
                key
            ))
        })?;

        let db = self.build(&key, config)?;
        let mut instances = self.instances.lock();
        let shared = instances.entry(key).or_insert(db);
        Ok(Arc::clone(shared))
    }

    fn resolve_key(&self, key: &str) -> Result<String> {
        let key = key.trim();
        if !key.is_empty() && key != DEFAULT_KEY {
            return Ok(key.to_string());
        }
        match self.source.active_group() {
            Some(group) if !group.trim().is_empty() => Ok(group),
            _ if key == DEFAULT_KEY => Ok(DEFAULT_KEY.to_string()),
            _ => Err(DbError::Configuration(
                "No database connection settings were found in the database config file.".to_string(),
            )),
        }
    }

    fn build(&self, key: &str, config: ConnectionConfig) -> Result<SharedDatabase> {
        config.validate()?;
        let backend = self.backends.build(&config)?;
        let autoinit = config.autoinit;
        let mut db = Database::new(config, backend);

        if autoinit {
            if let Err(e) = db.initialize() {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(target: "quarry::registry", key = %key, error = %e, "connection not opened");
            }
        }

        info!(target: "quarry::registry", key = %key, platform = db.platform(), "connection ready");
        Ok(Arc::new(Mutex::new(db)))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.instances.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.lock().is_empty()
    }

    /// Closes and forgets one connection. Returns false for an unknown key.
    pub fn close(&self, key: &str) -> bool {
        let removed = self.instances.lock().remove(key);
        match removed {
            Some(db) => {
                db.lock().close();
                true
            }
            None => false,
        }
    }

    /// Closes and forgets every connection.
    pub fn close_all(&self) {
        let drained: Vec<SharedDatabase> = self.instances.lock().drain().map(|(_, db)| db).collect();
        for db in drained {
            db.lock().close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockBackend, MockHandle};
    use crate::config::DatabaseSettings;

    fn mock_registry(settings: DatabaseSettings) -> (ConnectionRegistry, MockHandle) {
        let (_, handle) = MockBackend::new();
        let shared = handle.clone();
        let mut backends = BackendRegistry::new();
        backends.register("mock", move |_config| {
            let (mut backend, _) = MockBackend::new();
            backend.attach(shared.clone());
            Ok(Box::new(backend))
        });
        (ConnectionRegistry::with_backends(settings, backends), handle)
    }

    fn settings() -> DatabaseSettings {
        DatabaseSettings::new()
            .with_connection("main", ConnectionConfig::new("mock"))
            .with_connection("lazy", ConnectionConfig::new("mock").autoinit(false))
            .with_active_group("main")
    }

    #[test]
    fn test_default_resolves_to_active_group() {
        let (registry, _) = mock_registry(settings());
        let a = registry.get("default", None).unwrap();
        let b = registry.get("", None).unwrap();
        let c = registry.get("main", None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_autoinit_opens_connection() {
        let (registry, script) = mock_registry(settings());
        let db = registry.get("main", None).unwrap();
        assert!(db.lock().is_connected());
        assert_eq!(script.connects(), 1);

        let lazy = registry.get("lazy", None).unwrap();
        assert!(!lazy.lock().is_connected());
        assert_eq!(script.connects(), 1);
    }

    #[test]
    fn test_unknown_group_is_configuration_error() {
        let (registry, _) = mock_registry(settings());
        let err = registry.get("reporting", None).unwrap_err();
        assert!(matches!(err, DbError::Configuration(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_unknown_backend_kind() {
        let settings = DatabaseSettings::new().with_connection("x", ConnectionConfig::new("oracle"));
        let (registry, _) = mock_registry(settings);
        assert!(matches!(registry.get("x", None), Err(DbError::Configuration(_))));
    }

    #[test]
    fn test_failed_autoinit_still_returns_connection() {
        let (registry, script) = mock_registry(settings());
        script.fail_connect();
        let db = registry.get("main", None).unwrap();
        assert!(!db.lock().is_connected());
    }

    #[test]
    fn test_failed_autoinit_in_debug_mode_is_fatal() {
        let settings = DatabaseSettings::new().with_connection("d", ConnectionConfig::new("mock").debug(true));
        let (registry, script) = mock_registry(settings);
        script.fail_connect();
        assert!(registry.get("d", None).unwrap_err().is_fatal());
        assert!(!registry.contains("d"));
    }

    #[test]
    fn test_override_is_not_shared() {
        let (registry, _) = mock_registry(settings());
        let a = registry.get("main", Some(ConnectionConfig::new("mock"))).unwrap();
        let b = registry.get("main", None).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_close_forgets_connection() {
        let (registry, script) = mock_registry(settings());
        registry.get("main", None).unwrap();
        registry.get("lazy", None).unwrap();
        assert!(registry.close("main"));
        assert!(!registry.close("main"));
        assert_eq!(script.closes(), 1);

        registry.close_all();
        assert!(registry.is_empty());
    }
}
