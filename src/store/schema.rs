//! Schema for the entity store.

pub const SCHEMA_VERSION: i32 = 1;

pub const SCHEMA: &str = r#"
-- Main story collection, keyed by server (or locally generated) id
CREATE TABLE IF NOT EXISTS stories (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    photo_url TEXT NOT NULL,
    lat REAL,
    lon REAL,
    created_at TEXT,
    saved_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stories_name ON stories(name);
CREATE INDEX IF NOT EXISTS idx_stories_created ON stories(created_at);

-- Favorite snapshots, same id domain as stories
CREATE TABLE IF NOT EXISTS favorite_stories (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    photo_url TEXT NOT NULL,
    lat REAL,
    lon REAL,
    created_at TEXT,
    favorited_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_favorites_name ON favorite_stories(name);
CREATE INDEX IF NOT EXISTS idx_favorites_at ON favorite_stories(favorited_at);
"#;
