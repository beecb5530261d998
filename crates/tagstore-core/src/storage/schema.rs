//! SQLite schema for the library store
//!
//! Referential rules beyond foreign keys (cascading removal, duplicate
//! tags) are enforced by the library, so no `ON DELETE CASCADE` here.

use rusqlite::{Connection, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Free-form key/value store for collaborators
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY COLLATE NOCASE,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tag_classes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE,
            value_type INTEGER NOT NULL,
            hidden INTEGER NOT NULL DEFAULT 0
        );

        -- value is untyped so SQLite keeps the storage class of each value
        CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            class_id INTEGER NOT NULL REFERENCES tag_classes(id),
            value_type INTEGER NOT NULL,
            value
        );

        CREATE TABLE IF NOT EXISTS nodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            display_name TEXT NOT NULL
        );

        -- Node-tag junction table (many-to-many)
        CREATE TABLE IF NOT EXISTS links (
            node_id INTEGER NOT NULL REFERENCES nodes(id),
            tag_id INTEGER NOT NULL REFERENCES tags(id),
            PRIMARY KEY (node_id, tag_id)
        );

        -- Dedup lookups and class scans
        CREATE INDEX IF NOT EXISTS idx_tags_class_value ON tags(class_id, value);
        -- Node-reference lookups for affected-node propagation
        CREATE INDEX IF NOT EXISTS idx_tags_type_value ON tags(value_type, value);
        CREATE INDEX IF NOT EXISTS idx_links_tag_id ON links(tag_id);
        "#,
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_info WHERE key = 'version'")?;
    let result: Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version_str) => Ok(version_str.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check if schema needs initialization or migration
pub fn needs_init(conn: &Connection) -> bool {
    let table_exists: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if !table_exists {
        return true;
    }

    match get_schema_version(conn) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}
