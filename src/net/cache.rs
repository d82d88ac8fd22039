//! SQLite-backed response cache with named, independently-lifecycled
//! namespaces.
//!
//! Each namespace is a bucket of cached responses keyed by full request URL.
//! Namespaces are versioned by the worker; activation deletes any namespace
//! not on the current allow-list.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{Error, Result};

/// A cached copy of a fetched response.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
  pub url: String,
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    namespace TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (namespace, url)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_age
    ON response_cache(namespace, cached_at);
"#;

/// SQLite-backed cache shared by all namespaces.
pub struct ResponseCache {
  conn: Mutex<Connection>,
}

impl ResponseCache {
  /// Open (creating on first use) the cache database.
  pub fn open(data_dir: &Path) -> Result<Self> {
    let path = data_dir.join("http-cache.db");
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| Error::Store(format!("failed to create cache directory: {e}")))?;
    }
    Self::with_connection(Connection::open(&path)?)
  }

  /// In-memory cache, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn.execute_batch(CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
    self.conn.lock().unwrap_or_else(|p| p.into_inner())
  }

  /// Store a response under `namespace`, keyed by its full URL.
  /// Re-storing the same URL overwrites the previous copy.
  pub fn put(&self, namespace: &str, response: &CachedResponse) -> Result<()> {
    self.put_at(namespace, response, Utc::now())
  }

  pub(crate) fn put_at(
    &self,
    namespace: &str,
    response: &CachedResponse,
    cached_at: DateTime<Utc>,
  ) -> Result<()> {
    self.lock().execute(
      "INSERT OR REPLACE INTO response_cache
         (namespace, url, status, content_type, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?)",
      params![
        namespace,
        response.url,
        response.status,
        response.content_type,
        response.body,
        cached_at.to_rfc3339(),
      ],
    )?;
    Ok(())
  }

  /// Most recent cached response for this exact URL, if any.
  pub fn get(&self, namespace: &str, url: &str) -> Result<Option<CachedResponse>> {
    let conn = self.lock();
    let mut stmt = conn.prepare(
      "SELECT url, status, content_type, body FROM response_cache
       WHERE namespace = ? AND url = ?",
    )?;
    let response = stmt
      .query_row(params![namespace, url], |row| {
        Ok(CachedResponse {
          url: row.get(0)?,
          status: row.get(1)?,
          content_type: row.get(2)?,
          body: row.get(3)?,
        })
      })
      .optional()?;
    Ok(response)
  }

  /// Delete a namespace and everything in it.
  pub fn delete_namespace(&self, namespace: &str) -> Result<()> {
    self
      .lock()
      .execute("DELETE FROM response_cache WHERE namespace = ?", params![namespace])?;
    Ok(())
  }

  /// Names of all namespaces that currently hold at least one entry.
  pub fn namespaces(&self) -> Result<Vec<String>> {
    let conn = self.lock();
    let mut stmt =
      conn.prepare("SELECT DISTINCT namespace FROM response_cache ORDER BY namespace")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    let mut names = Vec::new();
    for row in rows {
      names.push(row?);
    }
    Ok(names)
  }

  /// Bound a namespace by entry count and age, evicting oldest entries
  /// first when the count cap is exceeded.
  pub fn trim(&self, namespace: &str, max_entries: usize, max_age: Duration) -> Result<()> {
    let cutoff = (Utc::now() - max_age).to_rfc3339();
    let conn = self.lock();
    conn.execute(
      "DELETE FROM response_cache WHERE namespace = ? AND cached_at < ?",
      params![namespace, cutoff],
    )?;
    conn.execute(
      "DELETE FROM response_cache
       WHERE namespace = ?1 AND url IN (
         SELECT url FROM response_cache WHERE namespace = ?1
         ORDER BY cached_at ASC
         LIMIT max(0, (SELECT COUNT(*) FROM response_cache WHERE namespace = ?1) - ?2)
       )",
      params![namespace, max_entries as i64],
    )?;
    Ok(())
  }

  /// Number of entries currently held in a namespace.
  pub fn len(&self, namespace: &str) -> Result<usize> {
    let count: i64 = self.lock().query_row(
      "SELECT COUNT(*) FROM response_cache WHERE namespace = ?",
      params![namespace],
      |row| row.get(0),
    )?;
    Ok(count as usize)
  }
}
