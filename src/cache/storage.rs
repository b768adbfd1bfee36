//! Tier storage trait and SQLite implementation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{parse_datetime, Database};
use crate::http::{Headers, RequestKey, Response};

/// A response snapshot read back from a tier.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the snapshot was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache tier backends.
///
/// Each write is atomic per key: a reader sees either the previous snapshot
/// or the new one, never a partial entry.
pub trait TierStorage: Send + Sync {
  /// Create the tier if it does not exist yet.
  fn open_tier(&self, tier: &str) -> Result<()>;

  /// Names of every tier currently present.
  fn tier_names(&self) -> Result<Vec<String>>;

  /// Delete a tier and all of its entries. Returns false if it was absent.
  fn delete_tier(&self, tier: &str) -> Result<bool>;

  /// Store one snapshot, replacing any entry with the same key.
  fn put(&self, tier: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Store one snapshot only if `tier` still exists. Returns false, writing
  /// nothing, when the tier is absent.
  fn put_if_open(&self, tier: &str, key: &RequestKey, response: &Response) -> Result<bool>;

  /// Store a batch of snapshots in one transaction.
  fn put_all(&self, tier: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Read a snapshot by key.
  fn get(&self, tier: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Number of entries stored in a tier.
  fn entry_count(&self, tier: &str) -> Result<usize>;
}

/// SQLite-backed tier storage sharing the worker database.
pub struct SqliteStorage {
  db: Arc<Database>,
}

impl SqliteStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

fn open_tier_on(conn: &Connection, tier: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_tiers (name, created_at) VALUES (?, datetime('now'))",
      params![tier],
    )
    .map_err(|e| eyre!("Failed to open cache tier {}: {}", tier, e))?;
  Ok(())
}

fn put_on(conn: &Connection, tier: &str, key: &RequestKey, response: &Response) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (tier, request_hash, method, url, status, status_text, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        tier,
        key.cache_hash(),
        key.method.as_str(),
        key.url,
        response.status,
        response.status_text,
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", key, tier, e))?;
  Ok(())
}

impl TierStorage for SqliteStorage {
  fn open_tier(&self, tier: &str) -> Result<()> {
    let conn = self.db.lock()?;
    open_tier_on(&conn, tier)
  }

  fn tier_names(&self) -> Result<Vec<String>> {
    let conn = self.db.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_tiers ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache tiers: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache tier name: {}", e))?;

    Ok(names)
  }

  fn delete_tier(&self, tier: &str) -> Result<bool> {
    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE tier = ?", params![tier])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", tier, e))?;
    let removed = tx
      .execute("DELETE FROM cache_tiers WHERE name = ?", params![tier])
      .map_err(|e| eyre!("Failed to delete cache tier {}: {}", tier, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put(&self, tier: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    open_tier_on(&tx, tier)?;
    put_on(&tx, tier, key, response)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn put_if_open(&self, tier: &str, key: &RequestKey, response: &Response) -> Result<bool> {
    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let exists = tx
      .query_row(
        "SELECT 1 FROM cache_tiers WHERE name = ?",
        params![tier],
        |_| Ok(()),
      )
      .optional()
      .map_err(|e| eyre!("Failed to check cache tier {}: {}", tier, e))?
      .is_some();
    if !exists {
      return Ok(false);
    }
    put_on(&tx, tier, key, response)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(true)
  }

  fn put_all(&self, tier: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    open_tier_on(&tx, tier)?;
    for (key, response) in entries {
      put_on(&tx, tier, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn get(&self, tier: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.db.lock()?;

    let row: Option<(u16, String, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, status_text, headers, body, cached_at FROM cache_entries
         WHERE tier = ? AND request_hash = ?",
        params![tier, key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key, tier, e))?;

    let Some((status, status_text, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    let headers: Headers = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", key, e))?;

    Ok(Some(CachedResponse {
      response: Response {
        status,
        status_text,
        headers,
        body,
      },
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn entry_count(&self, tier: &str) -> Result<usize> {
    let conn = self.db.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE tier = ?",
        params![tier],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", tier, e))?;
    Ok(count as usize)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::Method;
  use url::Url;

  fn storage() -> SqliteStorage {
    SqliteStorage::new(Arc::new(Database::open_in_memory().unwrap()))
  }

  fn key(method: Method, url: &str) -> RequestKey {
    RequestKey::new(method, &Url::parse(url).unwrap())
  }

  #[test]
  fn test_open_tier_is_idempotent() {
    let storage = storage();
    storage.open_tier("app-static-v1").unwrap();
    storage.open_tier("app-static-v1").unwrap();
    assert_eq!(storage.tier_names().unwrap(), vec!["app-static-v1"]);
  }

  #[test]
  fn test_put_overwrites_same_key() {
    let storage = storage();
    let k = key(Method::Get, "https://example.org/app.js");

    storage.put("t", &k, &Response::new(200, "old")).unwrap();
    storage.put("t", &k, &Response::new(200, "new")).unwrap();

    let cached = storage.get("t", &k).unwrap().unwrap();
    assert_eq!(cached.response.body_text(), "new");
    assert_eq!(storage.entry_count("t").unwrap(), 1);
  }

  #[test]
  fn test_get_preserves_snapshot() {
    let storage = storage();
    let k = key(Method::Post, "https://hooks.example.org/webhook");
    let response = Response::json(201, "Created", &serde_json::json!({ "ok": true })).unwrap();

    storage.put("dyn", &k, &response).unwrap();
    let cached = storage.get("dyn", &k).unwrap().unwrap();

    assert_eq!(cached.response, response);
    assert!(storage
      .get("dyn", &key(Method::Get, "https://hooks.example.org/webhook"))
      .unwrap()
      .is_none());
  }

  #[test]
  fn test_delete_tier_removes_entries() {
    let storage = storage();
    let k = key(Method::Get, "https://example.org/");
    storage.put("old", &k, &Response::new(200, "x")).unwrap();

    assert!(storage.delete_tier("old").unwrap());
    assert!(!storage.delete_tier("old").unwrap());
    assert!(storage.get("old", &k).unwrap().is_none());
    assert!(storage.tier_names().unwrap().is_empty());
  }

  #[test]
  fn test_put_if_open_never_creates_a_tier() {
    let storage = storage();
    let k = key(Method::Get, "https://example.org/x");

    assert!(!storage.put_if_open("gone", &k, &Response::new(200, "x")).unwrap());
    assert!(storage.tier_names().unwrap().is_empty());

    storage.open_tier("live").unwrap();
    assert!(storage.put_if_open("live", &k, &Response::new(200, "x")).unwrap());
    assert_eq!(storage.entry_count("live").unwrap(), 1);
  }

  #[test]
  fn test_put_all_writes_every_entry() {
    let storage = storage();
    let entries = vec![
      (key(Method::Get, "https://example.org/a"), Response::new(200, "a")),
      (key(Method::Get, "https://example.org/b"), Response::new(200, "b")),
    ];
    storage.put_all("static", &entries).unwrap();
    assert_eq!(storage.entry_count("static").unwrap(), 2);
  }
}
