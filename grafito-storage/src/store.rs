use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use grafito_model::Result;

use crate::config::{Config, JournalMode};
use crate::schema;

/// Owns the single SQLite connection backing a Grafito database. Wrapped in
/// a `Mutex` so the handle is `Send + Sync`; the concurrency model (single
/// writer, the store's own WAL arbitrating readers) makes the mutex a
/// formality rather than a bottleneck; see `tx` for the transaction surface
/// layered on top.
pub struct Store {
    pub(crate) conn: Mutex<Connection>,
    pub(crate) config: Config,
}

impl Store {
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, config)
    }

    pub fn open_in_memory(config: Config) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, config)
    }

    fn from_connection(conn: Connection, config: Config) -> Result<Self> {
        configure_connection(&conn, &config)?;
        schema::init(&conn)?;
        tracing::debug!("store opened");
        Ok(Store { conn: Mutex::new(conn), config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn configure_connection(conn: &Connection, config: &Config) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    match config.journal_mode {
        JournalMode::Wal => {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }
        JournalMode::Memory => {
            conn.pragma_update(None, "journal_mode", "MEMORY")?;
        }
    }
    conn.busy_timeout(std::time::Duration::from_millis(5_000))?;
    Ok(())
}
