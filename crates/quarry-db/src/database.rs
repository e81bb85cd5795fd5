//! A connection with its optional query builder.

use std::ops::{Deref, DerefMut};

use crate::backend::Backend;
use crate::config::ConnectionConfig;
use crate::driver::Driver;
use crate::query::{BuilderState, QueryBuilder};
use crate::Result;

/// A driver plus, when `active_record` is on, its builder state.
///
/// Derefs to `Driver`, so raw queries, transactions and metadata calls are
/// available directly.
#[derive(Debug)]
pub struct Database {
    driver: Driver,
    builder: Option<BuilderState>,
}

impl Database {
    pub fn new(config: ConnectionConfig, backend: Box<dyn Backend>) -> Self {
        let builder = config.builder_enabled().then(BuilderState::new);
        Self {
            driver: Driver::new(config, backend),
            builder,
        }
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut Driver {
        &mut self.driver
    }

    pub fn has_builder(&self) -> bool {
        self.builder.is_some()
    }

    /// The builder state, if the builder is enabled.
    pub fn builder_state(&self) -> Option<&BuilderState> {
        self.builder.as_ref()
    }

    /// Borrows the query builder.
    ///
    /// # Errors
    ///
    /// Usage error when the connection was configured without the builder.
    pub fn qb(&mut self) -> Result<QueryBuilder<'_>> {
        match self.builder.as_mut() {
            Some(state) => Ok(QueryBuilder::new(&mut self.driver, state)),
            None => Err(self
                .driver
                .usage_error("The query builder is not enabled for this connection.")),
        }
    }
}

impl Deref for Database {
    type Target = Driver;

    fn deref(&self) -> &Driver {
        &self.driver
    }
}

impl DerefMut for Database {
    fn deref_mut(&mut self) -> &mut Driver {
        &mut self.driver
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::mock::mock_database;
    use crate::config::ConnectionConfig;

    #[test]
    fn test_disabled_builder_is_refused() {
        let (mut db, _) = mock_database(ConnectionConfig::new("mock").active_record(false));
        assert!(!db.has_builder());
        assert!(db.qb().unwrap_err().is_usage());
    }

    #[test]
    fn test_builder_enabled_by_default() {
        let (mut db, _) = mock_database(ConnectionConfig::new("mock"));
        assert!(db.has_builder());
        assert!(db.qb().is_ok());
    }
}
