//! Database connection management.
//!
//! The [`Store`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.  The store itself is
//! stateless beyond the connection: every multi-statement operation runs in
//! its own transaction and concurrency is delegated to the engine.

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::migrations;

/// Handle to the storage layer.
pub struct Store {
    conn: Connection,
    max_results: usize,
}

impl Store {
    /// Open (or create) the database described by `config`.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        if let Some(dir) = config.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        tracing::info!(path = %config.path.display(), "opening database");

        Self::open_at(&config.path, config.max_results)
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// Useful for tests and for embedding the store inside custom directory
    /// layouts.
    pub fn open_at(path: &Path, max_results: usize) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, max_results)
    }

    /// Open a private in-memory database.  Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, StoreConfig::default().max_results)
    }

    fn from_connection(conn: Connection, max_results: usize) -> Result<Self> {
        // Recommended SQLite settings.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        // Run schema migrations.
        migrations::run_migrations(&conn)?;

        Ok(Self { conn, max_results })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    ///
    /// Callers should prefer the typed operation methods, but direct access
    /// is occasionally needed for ad-hoc queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return a mutable reference to the underlying connection; required for
    /// explicit transactions.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }

    /// Clamp a requested result count to the configured maximum.
    pub(crate) fn limit(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(n) if n > 0 && n < self.max_results => n,
            _ => self.max_results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let store = Store::open_at(&path, 64).expect("should open");
        assert!(store.path().is_some());
    }

    #[test]
    fn limit_clamping() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.limit(None), 1024);
        assert_eq!(store.limit(Some(0)), 1024);
        assert_eq!(store.limit(Some(10)), 10);
        assert_eq!(store.limit(Some(100_000)), 1024);
    }
}
