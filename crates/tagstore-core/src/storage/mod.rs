//! Storage layer
//!
//! SQLite is the authoritative store. The library keeps caches in front of
//! it and runs every statement through the helpers in `rows`.
//!
//! ## Tables
//!
//! - `tag_classes` - Class name, value type and hidden flag
//! - `tags` - Class reference plus a typed value
//! - `nodes` - Display-name template
//! - `links` - Node-to-tag junction
//! - `meta` - Free-form key/value pairs

pub mod rows;
pub mod schema;

use std::path::Path;

use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;

pub use schema::{init_schema, needs_init, SCHEMA_VERSION};

/// Open or create the database at `path`
pub fn open(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    prepare(&conn)?;
    debug!(path = %path.display(), "opened library database");
    Ok(conn)
}

/// Open an in-memory database (for testing)
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    prepare(&conn)?;
    Ok(conn)
}

fn prepare(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    if needs_init(conn) {
        init_schema(conn)?;
    }
    Ok(())
}
