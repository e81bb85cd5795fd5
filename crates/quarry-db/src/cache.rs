//! Read-query result cache.
//!
//! Snapshots are keyed by the exact SQL text. `FileCache` writes one JSON file
//! per statement, named by the SHA-256 digest of the SQL. A cache that cannot
//! use its directory switches itself off and the query runs uncached.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::result::CachedResult;
use crate::{DbError, Result};

/// Storage for detached read results.
pub trait QueryCache: Send {
    /// Returns the snapshot stored for `sql`, if any.
    fn read(&mut self, sql: &str) -> Option<CachedResult>;

    /// Stores a snapshot. Returns false when the cache could not store it.
    fn write(&mut self, sql: &str, snapshot: &CachedResult) -> bool;

    /// Drops every stored snapshot.
    fn delete_all(&mut self) -> bool;
}

/// Process-local cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: HashMap<String, CachedResult>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl QueryCache for MemoryCache {
    fn read(&mut self, sql: &str) -> Option<CachedResult> {
        self.entries.get(sql).cloned()
    }

    fn write(&mut self, sql: &str, snapshot: &CachedResult) -> bool {
        self.entries.insert(sql.to_string(), snapshot.clone());
        true
    }

    fn delete_all(&mut self) -> bool {
        self.entries.clear();
        true
    }
}

/// Directory-backed cache.
#[derive(Debug)]
pub struct FileCache {
    dir: PathBuf,
    usable: bool,
}

impl FileCache {
    /// Opens (creating if needed) the cache directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let usable = match fs::create_dir_all(&dir).and_then(|_| fs::metadata(&dir)) {
            Ok(meta) if meta.is_dir() && !meta.permissions().readonly() => true,
            Ok(_) => {
                warn!(target: "quarry::cache", dir = %dir.display(), "cache directory is not writable, caching disabled");
                false
            }
            Err(e) => {
                warn!(target: "quarry::cache", dir = %dir.display(), error = %e, "cache directory unavailable, caching disabled");
                false
            }
        };
        Self { dir, usable }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_usable(&self) -> bool {
        self.usable
    }

    /// Writes the snapshot for `sql`, reporting why it could not.
    pub fn store(&self, sql: &str, snapshot: &CachedResult) -> Result<()> {
        if !self.usable {
            return Err(DbError::Cache(format!(
                "cache directory {} is not usable",
                self.dir.display()
            )));
        }
        let path = self.file_for(sql);
        let bytes = serde_json::to_vec(snapshot)?;
        fs::write(&path, bytes)
            .map_err(|e| DbError::Cache(format!("unable to write {}: {}", path.display(), e)))
    }

    fn file_for(&self, sql: &str) -> PathBuf {
        let digest = Sha256::digest(sql.as_bytes());
        self.dir.join(format!("{:x}.json", digest))
    }
}

impl QueryCache for FileCache {
    fn read(&mut self, sql: &str) -> Option<CachedResult> {
        if !self.usable {
            return None;
        }
        let path = self.file_for(sql);
        let text = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&text) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                debug!(target: "quarry::cache", path = %path.display(), error = %e, "discarding unreadable cache file");
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    fn write(&mut self, sql: &str, snapshot: &CachedResult) -> bool {
        if !self.usable {
            return false;
        }
        match self.store(sql, snapshot) {
            Ok(()) => true,
            Err(e) => {
                warn!(target: "quarry::cache", error = %e, "cache write failed, caching disabled");
                self.usable = false;
                false
            }
        }
    }

    fn delete_all(&mut self) -> bool {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return false,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Err(e) = fs::remove_file(&path) {
                    warn!(target: "quarry::cache", path = %path.display(), error = %e, "unable to delete cache file");
                }
            }
        }
        true
    }
}
