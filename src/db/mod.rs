//! Embedded SQLite store.
//!
//! One database file holds every cached entity and association table. The
//! connection lives behind a mutex: rusqlite connections are not `Sync`, and
//! every mutating operation has to serialize on the same lock anyway.

pub mod schema;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{Connection, Transaction};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::CacheError;

/// Row id meaning "unset" or "no foreign key". SQLite row ids start at 1.
pub const NO_ROW_ID: i64 = 0;

/// Where the store lives on disk.
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
  pub folder: PathBuf,
  pub file_name: String,
}

impl DatabaseOptions {
  pub fn path(&self) -> PathBuf {
    self.folder.join(&self.file_name)
  }
}

/// Database connection wrapper for the cache.
pub struct Database {
  /// `None` for in-memory stores.
  path: Option<PathBuf>,
  conn: Mutex<Option<Connection>>,
}

impl Database {
  /// Describe a store without touching the filesystem. Call [`Database::create`]
  /// before using it.
  pub fn new(options: &DatabaseOptions) -> Self {
    Self {
      path: Some(options.path()),
      conn: Mutex::new(None),
    }
  }

  /// Open or create the store described by `options`.
  pub fn open(options: &DatabaseOptions) -> Result<Self> {
    let db = Self::new(options);
    db.create()?;
    Ok(db)
  }

  /// Open an in-memory store (for testing).
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    schema::initialize(&conn).map_err(|e| eyre!("Failed to run migrations: {}", e))?;

    Ok(Self {
      path: None,
      conn: Mutex::new(Some(conn)),
    })
  }

  /// Create the file and schema if absent. Safe to call repeatedly.
  pub fn create(&self) -> Result<()> {
    let mut guard = self.lock()?;

    if let Some(conn) = guard.as_ref() {
      schema::initialize(conn).map_err(|e| eyre!("Failed to run migrations: {}", e))?;
      return Ok(());
    }

    let path = self
      .path
      .as_deref()
      .ok_or_else(|| eyre!("In-memory database cannot be reopened"))?;

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;
    schema::initialize(&conn).map_err(|e| eyre!("Failed to run migrations: {}", e))?;

    debug!(path = %path.display(), "opened cache database");
    *guard = Some(conn);
    Ok(())
  }

  /// Whether the store is open and usable.
  pub fn is_connected(&self) -> bool {
    self.conn.lock().map(|g| g.is_some()).unwrap_or(false)
  }

  /// Drop the connection. Later operations fail with `StoreInaccessible`.
  pub fn close(&self) {
    match self.conn.lock() {
      Ok(mut guard) => {
        guard.take();
      }
      Err(e) => warn!("cache database lock poisoned on close: {}", e),
    }
  }

  /// Path of the database file, if file-backed.
  pub fn path(&self) -> Option<&Path> {
    self.path.as_deref()
  }

  /// Run a read against the store.
  pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    let guard = self.lock()?;
    let conn = guard.as_ref().ok_or(CacheError::StoreInaccessible)?;
    f(conn)
  }

  /// Run `f` inside one transaction: commit on `Ok`, roll back on `Err`.
  pub fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
    let mut guard = self.lock()?;
    let conn = guard.as_mut().ok_or(CacheError::StoreInaccessible)?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    match f(&tx) {
      Ok(value) => {
        tx.commit()
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
        Ok(value)
      }
      Err(e) => {
        if let Err(rollback) = tx.rollback() {
          warn!("Failed to roll back transaction: {}", rollback);
        }
        Err(e)
      }
    }
  }

  /// Delete every row in every table, keeping the file and schema.
  pub fn reset(&self) -> Result<()> {
    self.write(|tx| {
      for table in schema::TABLES {
        tx.execute(&format!("DELETE FROM {table}"), [])?;
      }
      schema::seed_metadata(tx)?;
      Ok(())
    })?;
    debug!("cache database reset");
    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Convert a timestamp to the integer representation stored in SQLite.
pub fn to_millis(time: DateTime<Utc>) -> i64 {
  time.timestamp_millis()
}

/// Inverse of [`to_millis`]. Out-of-range values collapse to the epoch.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
  DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Comma-joined row ids, the dirty-check format for association lists.
pub fn join_ids(ids: &[i64]) -> String {
  ids
    .iter()
    .map(|id| id.to_string())
    .collect::<Vec<_>>()
    .join(",")
}

/// Parse a [`join_ids`] string; malformed entries are skipped.
pub fn split_ids(joined: &str) -> Vec<i64> {
  joined
    .split(',')
    .filter_map(|part| part.trim().parse().ok())
    .collect()
}
