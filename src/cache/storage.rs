//! Cache store trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use url::Url;

use super::traits::{CacheKey, CachedEntry};
use crate::net::Response;

/// Trait for cache storage backends.
///
/// Every write is create-or-replace by key, so concurrent writers on one key
/// end up last-write-wins.
pub trait CacheStore: Send + Sync {
  /// Create the named bucket if it does not exist yet.
  fn create_bucket(&self, name: &str) -> Result<()>;

  /// Whether the named bucket exists.
  fn has_bucket(&self, name: &str) -> Result<bool>;

  /// All bucket names in creation order.
  fn bucket_names(&self) -> Result<Vec<String>>;

  /// Delete a bucket with all of its entries. Returns false if it did not exist.
  fn delete_bucket(&self, name: &str) -> Result<bool>;

  /// Look up a key in one bucket.
  fn lookup(&self, bucket: &str, key: &CacheKey) -> Result<Option<CachedEntry>>;

  /// Look up a key across every bucket, oldest bucket first.
  fn lookup_any(&self, key: &CacheKey) -> Result<Option<CachedEntry>>;

  /// Store a response, replacing any previous entry for the key.
  fn put(&self, bucket: &str, key: &CacheKey, response: &Response) -> Result<()>;

  /// Keys stored in a bucket.
  fn keys(&self, bucket: &str) -> Result<Vec<CacheKey>>;
}

/// Handle to one opened bucket.
pub struct Bucket<'a, S: CacheStore + ?Sized> {
  store: &'a S,
  name: String,
}

impl<'a, S: CacheStore + ?Sized> Bucket<'a, S> {
  pub fn lookup(&self, key: &CacheKey) -> Result<Option<CachedEntry>> {
    self.store.lookup(&self.name, key)
  }

  pub fn put(&self, key: &CacheKey, response: &Response) -> Result<()> {
    self.store.put(&self.name, key, response)
  }
}

/// Open (creating if needed) a bucket by name.
pub fn open_bucket<'a, S: CacheStore + ?Sized>(store: &'a S, name: &str) -> Result<Bucket<'a, S>> {
  store.create_bucket(name)?;
  Ok(Bucket {
    store,
    name: name.to_string(),
  })
}

/// SQLite-based cache store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Store that lives only as long as the process.
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;
    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named buckets; rowid gives creation order
CREATE TABLE IF NOT EXISTS buckets (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

-- Stored responses keyed by request identity
CREATE TABLE IF NOT EXISTS entries (
    bucket TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (bucket, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_key ON entries(key_hash);
"#;

type EntryRow = (u16, String, Vec<u8>, String);

fn decode_entry((status, headers, body, stored_at): EntryRow) -> Result<CachedEntry> {
  let headers: Vec<(String, String)> = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
  let stored_at = DateTime::parse_from_rfc3339(&stored_at)
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", stored_at, e))?
    .with_timezone(&Utc);

  Ok(CachedEntry {
    response: Response {
      status,
      headers,
      body,
    },
    stored_at,
  })
}

impl CacheStore for SqliteStore {
  fn create_bucket(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO buckets (name, created_at) VALUES (?, ?)",
        params![name, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to create cache {}: {}", name, e))?;
    Ok(())
  }

  fn has_bucket(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM buckets WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache {}: {}", name, e))?;
    Ok(found.is_some())
  }

  fn bucket_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM buckets ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete_bucket(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE bucket = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM buckets WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn lookup(&self, bucket: &str, key: &CacheKey) -> Result<Option<CachedEntry>> {
    let conn = self.lock()?;
    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT status, headers, body, stored_at FROM entries
         WHERE bucket = ? AND key_hash = ?",
        params![bucket, key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key, bucket, e))?;

    row.map(decode_entry).transpose()
  }

  fn lookup_any(&self, key: &CacheKey) -> Result<Option<CachedEntry>> {
    let conn = self.lock()?;
    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT e.status, e.headers, e.body, e.stored_at FROM entries e
         INNER JOIN buckets b ON b.name = e.bucket
         WHERE e.key_hash = ?
         ORDER BY b.rowid
         LIMIT 1",
        params![key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    row.map(decode_entry).transpose()
  }

  fn put(&self, bucket: &str, key: &CacheKey, response: &Response) -> Result<()> {
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
    let now = Utc::now().to_rfc3339();

    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    // The bucket may have been deleted since it was opened
    tx.execute(
      "INSERT OR IGNORE INTO buckets (name, created_at) VALUES (?, ?)",
      params![bucket, now],
    )
    .map_err(|e| eyre!("Failed to create cache {}: {}", bucket, e))?;

    tx.execute(
      "INSERT OR REPLACE INTO entries (bucket, key_hash, method, url, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        bucket,
        key.cache_hash(),
        key.method,
        key.url.as_str(),
        response.status,
        headers,
        response.body,
        now
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", key, bucket, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn keys(&self, bucket: &str) -> Result<Vec<CacheKey>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT method, url FROM entries WHERE bucket = ? ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![bucket], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
      })
      .map_err(|e| eyre!("Failed to list keys of {}: {}", bucket, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    rows
      .into_iter()
      .map(|(method, url)| {
        let url = Url::parse(&url).map_err(|e| eyre!("Corrupt cached url '{}': {}", url, e))?;
        Ok(CacheKey::new(&method, &url))
      })
      .collect()
  }
}
