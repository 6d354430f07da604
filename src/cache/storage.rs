//! Cache storage trait and SQLite implementation.
//!
//! Only confirmed lists are persisted. A later session hydrates from here so
//! lists render before the first fetch completes.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A persisted collection, serialized as a JSON array.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedEntry {
  pub hash: String,
  pub description: String,
  pub entity_kind: String,
  pub data: Vec<u8>,
  pub cached_at: DateTime<Utc>,
  pub stale: bool,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Get a persisted collection by key hash.
  fn load(&self, hash: &str) -> Result<Option<PersistedEntry>>;

  /// Insert or replace a persisted collection.
  fn store(&self, entry: &PersistedEntry) -> Result<()>;

  /// Flag a persisted collection as needing refresh.
  fn mark_stale(&self, hash: &str) -> Result<()>;

  /// Flag every persisted collection of a kind as needing refresh.
  fn mark_kind_stale(&self, entity_kind: &str) -> Result<()>;

  fn delete(&self, hash: &str) -> Result<()>;

  fn clear(&self) -> Result<()>;
}

/// Storage implementation that doesn't persist anything.
/// Used when persistence is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn load(&self, _hash: &str) -> Result<Option<PersistedEntry>> {
    Ok(None) // Always miss
  }

  fn store(&self, _entry: &PersistedEntry) -> Result<()> {
    Ok(()) // Discard
  }

  fn mark_stale(&self, _hash: &str) -> Result<()> {
    Ok(())
  }

  fn mark_kind_stale(&self, _entity_kind: &str) -> Result<()> {
    Ok(())
  }

  fn delete(&self, _hash: &str) -> Result<()> {
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open SQLite storage at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open SQLite storage at an explicit path, creating parent directories.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("fitout").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.conn()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS collection_cache (
    key_hash TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    entity_kind TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    stale INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_collection_cache_kind
    ON collection_cache(entity_kind);
"#;

impl CacheStorage for SqliteStorage {
  fn load(&self, hash: &str) -> Result<Option<PersistedEntry>> {
    let conn = self.conn()?;

    let row: Option<(String, String, Vec<u8>, String, bool)> = conn
      .query_row(
        "SELECT description, entity_kind, data, cached_at, stale FROM collection_cache
         WHERE key_hash = ?",
        params![hash],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to load cached collection: {}", e))?;

    match row {
      Some((description, entity_kind, data, cached_at, stale)) => Ok(Some(PersistedEntry {
        hash: hash.to_string(),
        description,
        entity_kind,
        data,
        cached_at: parse_datetime(&cached_at)?,
        stale,
      })),
      None => Ok(None),
    }
  }

  fn store(&self, entry: &PersistedEntry) -> Result<()> {
    let conn = self.conn()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO collection_cache (key_hash, description, entity_kind, data, cached_at, stale)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
          entry.hash,
          entry.description,
          entry.entity_kind,
          entry.data,
          entry.cached_at.to_rfc3339(),
          entry.stale
        ],
      )
      .map_err(|e| eyre!("Failed to store cached collection: {}", e))?;

    Ok(())
  }

  fn mark_stale(&self, hash: &str) -> Result<()> {
    let conn = self.conn()?;

    conn
      .execute(
        "UPDATE collection_cache SET stale = 1 WHERE key_hash = ?",
        params![hash],
      )
      .map_err(|e| eyre!("Failed to mark cached collection stale: {}", e))?;

    Ok(())
  }

  fn mark_kind_stale(&self, entity_kind: &str) -> Result<()> {
    let conn = self.conn()?;

    conn
      .execute(
        "UPDATE collection_cache SET stale = 1 WHERE entity_kind = ?",
        params![entity_kind],
      )
      .map_err(|e| eyre!("Failed to mark {} collections stale: {}", entity_kind, e))?;

    Ok(())
  }

  fn delete(&self, hash: &str) -> Result<()> {
    let conn = self.conn()?;

    conn
      .execute(
        "DELETE FROM collection_cache WHERE key_hash = ?",
        params![hash],
      )
      .map_err(|e| eyre!("Failed to delete cached collection: {}", e))?;

    Ok(())
  }

  fn clear(&self) -> Result<()> {
    let conn = self.conn()?;

    conn
      .execute("DELETE FROM collection_cache", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))?;

    Ok(())
  }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
