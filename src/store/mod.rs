//! Local entity store: durable storage for stories and favorites.
//!
//! Two collections share the same id domain so a story and its favorite
//! entry correlate by id. Each operation runs in its own transaction; there
//! is no cross-call locking, so concurrent writes to the same id are
//! last-writer-wins.

mod schema;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::api::types::{FavoriteEntry, Story};
use crate::error::{Error, Result};

/// SQLite-backed store for the story and favorite collections.
pub struct EntityStore {
  conn: Mutex<Connection>,
}

impl EntityStore {
  /// Open (creating on first use) the store at the default location.
  pub fn open(data_dir: &Path) -> Result<Self> {
    let path = data_dir.join("store.db");
    Self::open_at(&path)
  }

  /// Open the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| Error::Store(format!("failed to create store directory: {e}")))?;
    }

    let conn = Connection::open(path)?;
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// In-memory store, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()?;
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock();
    conn.execute_batch(schema::SCHEMA)?;
    conn.pragma_update(None, "user_version", schema::SCHEMA_VERSION)?;
    Ok(())
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
    // Lock poisoning only happens after a panic in another holder; at that
    // point the process is going down anyway.
    self.conn.lock().unwrap_or_else(|p| p.into_inner())
  }

  // ==========================================================================
  // Story collection
  // ==========================================================================

  /// Insert or overwrite a story by id. Stamps `saved_at` with the current
  /// time when the caller left it unset.
  pub fn upsert_story(&self, story: &Story) -> Result<()> {
    let saved_at = story.saved_at.unwrap_or_else(Utc::now);
    let conn = self.lock();
    conn.execute(
      "INSERT OR REPLACE INTO stories
         (id, name, description, photo_url, lat, lon, created_at, saved_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        story.id,
        story.name,
        story.description,
        story.photo_url,
        story.lat,
        story.lon,
        story.created_at,
        saved_at.to_rfc3339(),
      ],
    )?;
    Ok(())
  }

  /// All stored stories, most recently saved first.
  pub fn get_all_stories(&self) -> Result<Vec<Story>> {
    let conn = self.lock();
    let mut stmt = conn.prepare(
      "SELECT id, name, description, photo_url, lat, lon, created_at, saved_at
       FROM stories ORDER BY saved_at DESC",
    )?;
    let rows = stmt.query_map([], row_to_story)?;

    let mut stories = Vec::new();
    for row in rows {
      stories.push(row?);
    }
    // Favorite flag lives in the second collection.
    for story in &mut stories {
      story.is_favorite = self.is_favorite_locked(&conn, &story.id)?;
    }
    Ok(stories)
  }

  /// Look up a single story. Absent ids are `None`, not an error.
  pub fn get_story(&self, id: &str) -> Result<Option<Story>> {
    let conn = self.lock();
    let mut stmt = conn.prepare(
      "SELECT id, name, description, photo_url, lat, lon, created_at, saved_at
       FROM stories WHERE id = ?",
    )?;
    let story = stmt.query_row(params![id], row_to_story).optional()?;
    match story {
      Some(mut story) => {
        story.is_favorite = self.is_favorite_locked(&conn, id)?;
        Ok(Some(story))
      }
      None => Ok(None),
    }
  }

  /// Remove a story by id. A no-op when the id is absent.
  pub fn delete_story(&self, id: &str) -> Result<()> {
    self.lock().execute("DELETE FROM stories WHERE id = ?", params![id])?;
    Ok(())
  }

  // ==========================================================================
  // Favorites collection
  // ==========================================================================

  /// Copy a story snapshot into the favorites collection.
  pub fn add_to_favorites(&self, story: &Story) -> Result<()> {
    let conn = self.lock();
    conn.execute(
      "INSERT OR REPLACE INTO favorite_stories
         (id, name, description, photo_url, lat, lon, created_at, favorited_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        story.id,
        story.name,
        story.description,
        story.photo_url,
        story.lat,
        story.lon,
        story.created_at,
        Utc::now().to_rfc3339(),
      ],
    )?;
    Ok(())
  }

  /// Remove a favorite by id. A no-op when the id is absent.
  pub fn remove_from_favorites(&self, id: &str) -> Result<()> {
    self
      .lock()
      .execute("DELETE FROM favorite_stories WHERE id = ?", params![id])?;
    Ok(())
  }

  /// All favorite entries, most recently favorited first.
  pub fn get_all_favorites(&self) -> Result<Vec<FavoriteEntry>> {
    let conn = self.lock();
    let mut stmt = conn.prepare(
      "SELECT id, name, description, photo_url, lat, lon, created_at, favorited_at
       FROM favorite_stories ORDER BY favorited_at DESC",
    )?;
    let rows = stmt.query_map([], |row| {
      let mut story = row_to_story(row)?;
      story.saved_at = None;
      story.is_favorite = true;
      let favorited_at: String = row.get(7)?;
      Ok((story, favorited_at))
    })?;

    let mut favorites = Vec::new();
    for row in rows {
      let (story, favorited_at) = row?;
      favorites.push(FavoriteEntry {
        story,
        favorited_at: parse_timestamp(&favorited_at),
      });
    }
    Ok(favorites)
  }

  /// Whether a favorite entry exists for this id.
  pub fn is_favorite(&self, id: &str) -> Result<bool> {
    let conn = self.lock();
    self.is_favorite_locked(&conn, id)
  }

  fn is_favorite_locked(&self, conn: &Connection, id: &str) -> Result<bool> {
    let exists: bool = conn.query_row(
      "SELECT EXISTS(SELECT 1 FROM favorite_stories WHERE id = ?)",
      params![id],
      |row| row.get(0),
    )?;
    Ok(exists)
  }

  // ==========================================================================
  // Maintenance
  // ==========================================================================

  /// Empty both collections in a single transaction.
  pub fn clear_all(&self) -> Result<()> {
    let mut guard = self.lock();
    let tx = guard.transaction()?;
    tx.execute("DELETE FROM stories", [])?;
    tx.execute("DELETE FROM favorite_stories", [])?;
    tx.commit()?;
    Ok(())
  }
}

fn row_to_story(row: &rusqlite::Row<'_>) -> rusqlite::Result<Story> {
  let saved_at: String = row.get(7)?;
  Ok(Story {
    id: row.get(0)?,
    name: row.get(1)?,
    description: row.get(2)?,
    photo_url: row.get(3)?,
    lat: row.get(4)?,
    lon: row.get(5)?,
    created_at: row.get(6)?,
    saved_at: Some(parse_timestamp(&saved_at)),
    is_favorite: false,
  })
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn story(id: &str) -> Story {
    Story {
      id: id.to_string(),
      name: "tester".to_string(),
      description: "hello world!".to_string(),
      photo_url: "https://example.com/p.jpg".to_string(),
      lat: Some(-6.2),
      lon: Some(106.82),
      created_at: Some("2024-01-01T00:00:00.000Z".to_string()),
      saved_at: None,
      is_favorite: false,
    }
  }

  #[test]
  fn upsert_is_idempotent() {
    let store = EntityStore::open_in_memory().unwrap();
    let s = story("s1");

    store.upsert_story(&s).unwrap();
    let first = store.get_story("s1").unwrap().unwrap();

    store.upsert_story(&s).unwrap();
    let second = store.get_story("s1").unwrap().unwrap();

    assert_eq!(store.get_all_stories().unwrap().len(), 1);
    assert_eq!(first.description, second.description);
    assert!(second.saved_at.unwrap() >= first.saved_at.unwrap());
  }

  #[test]
  fn upsert_stamps_saved_at_when_absent() {
    let store = EntityStore::open_in_memory().unwrap();
    store.upsert_story(&story("s1")).unwrap();
    let stored = store.get_story("s1").unwrap().unwrap();
    assert!(stored.saved_at.is_some());
  }

  #[test]
  fn upsert_preserves_explicit_saved_at() {
    let store = EntityStore::open_in_memory().unwrap();
    let mut s = story("s1");
    let stamp = "2024-06-01T12:00:00Z".parse().unwrap();
    s.saved_at = Some(stamp);
    store.upsert_story(&s).unwrap();
    assert_eq!(store.get_story("s1").unwrap().unwrap().saved_at, Some(stamp));
  }

  #[test]
  fn missing_story_is_none_not_error() {
    let store = EntityStore::open_in_memory().unwrap();
    assert!(store.get_story("nope").unwrap().is_none());
    // Deleting an absent id is a no-op.
    store.delete_story("nope").unwrap();
  }

  #[test]
  fn favorites_are_independent_of_stories() {
    let store = EntityStore::open_in_memory().unwrap();
    let s = story("s1");
    store.upsert_story(&s).unwrap();
    store.add_to_favorites(&s).unwrap();

    // Deleting the story leaves the favorite copy in place.
    store.delete_story("s1").unwrap();
    let favorites = store.get_all_favorites().unwrap();
    assert_eq!(favorites.len(), 1);
    assert_eq!(favorites[0].story.id, "s1");
    assert!(store.is_favorite("s1").unwrap());

    // And the reverse: unfavoriting does not touch the main collection.
    store.upsert_story(&s).unwrap();
    store.remove_from_favorites("s1").unwrap();
    assert!(store.get_story("s1").unwrap().is_some());
    assert!(!store.is_favorite("s1").unwrap());
  }

  #[test]
  fn favorite_flag_is_reflected_on_reads() {
    let store = EntityStore::open_in_memory().unwrap();
    let s = story("s1");
    store.upsert_story(&s).unwrap();
    store.upsert_story(&story("s2")).unwrap();
    store.add_to_favorites(&s).unwrap();

    let all = store.get_all_stories().unwrap();
    let s1 = all.iter().find(|s| s.id == "s1").unwrap();
    let s2 = all.iter().find(|s| s.id == "s2").unwrap();
    assert!(s1.is_favorite);
    assert!(!s2.is_favorite);
  }

  #[test]
  fn clear_all_empties_both_collections() {
    let store = EntityStore::open_in_memory().unwrap();
    let s = story("s1");
    store.upsert_story(&s).unwrap();
    store.add_to_favorites(&s).unwrap();

    store.clear_all().unwrap();
    assert!(store.get_all_stories().unwrap().is_empty());
    assert!(store.get_all_favorites().unwrap().is_empty());
  }

  #[test]
  fn stories_sort_by_saved_at_descending() {
    let store = EntityStore::open_in_memory().unwrap();
    let mut older = story("old");
    older.saved_at = Some("2024-01-01T00:00:00Z".parse().unwrap());
    let mut newer = story("new");
    newer.saved_at = Some("2024-02-01T00:00:00Z".parse().unwrap());

    store.upsert_story(&older).unwrap();
    store.upsert_story(&newer).unwrap();

    let all = store.get_all_stories().unwrap();
    assert_eq!(all[0].id, "new");
    assert_eq!(all[1].id, "old");
  }
}
