//! Row encoding and loaders
//!
//! Tag values are stored in an untyped column:
//!
//! | value | stored as |
//! |---|---|
//! | `None` | NULL |
//! | `Text` | TEXT |
//! | `Number` | INTEGER or REAL |
//! | `Locator` | TEXT (canonical form) |
//! | `NodeReference` | INTEGER (node id) |

use std::collections::HashMap;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::filter::Fragment;
use crate::models::{Identity, LibraryId, Locator, Number, TagClass, TagValue, ValueType};

/// Raw `tags` row, decoded once its class is known
#[derive(Debug, Clone)]
pub struct TagRow {
    pub id: i64,
    pub class_id: i64,
    pub value_type: ValueType,
    pub value: Value,
}

impl TagRow {
    pub fn decode(self, library: LibraryId) -> Result<TagValue> {
        decode_value(self.id, self.value_type, self.value, library)
    }
}

/// Stored form of a value
pub fn encode_value(value: &TagValue) -> Result<Value> {
    Ok(match value {
        TagValue::None => Value::Null,
        TagValue::Text(s) => Value::Text(s.clone()),
        TagValue::Number(Number::Int(i)) => Value::Integer(*i),
        TagValue::Number(Number::Real(r)) => {
            if !r.is_finite() {
                return Err(Error::invalid(format!("cannot store non-finite number {}", r)));
            }
            Value::Real(*r)
        }
        TagValue::Locator(l) => Value::Text(l.as_str().to_string()),
        TagValue::NodeReference(id) => {
            if !id.is_flushed() {
                return Err(Error::invalid("node reference to an unflushed node"));
            }
            Value::Integer(id.id())
        }
    })
}

fn decode_value(
    tag_id: i64,
    value_type: ValueType,
    raw: Value,
    library: LibraryId,
) -> Result<TagValue> {
    let value = match (value_type, raw) {
        (ValueType::None, _) => Some(TagValue::None),
        (ValueType::Text, Value::Text(s)) => Some(TagValue::Text(s)),
        (ValueType::Number, Value::Integer(i)) => Some(TagValue::number(i)),
        (ValueType::Number, Value::Real(r)) => Some(TagValue::number(r)),
        (ValueType::Locator, Value::Text(s)) => Locator::parse(&s).ok().map(TagValue::Locator),
        (ValueType::NodeReference, Value::Integer(i)) => {
            Some(TagValue::NodeReference(Identity::flushed(library, i)))
        }
        _ => None,
    };
    value.ok_or_else(|| {
        Error::library(format!(
            "tag #{} holds a malformed {} value",
            tag_id, value_type
        ))
    })
}

fn value_type_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<ValueType> {
    let code: i64 = row.get(idx)?;
    ValueType::from_code(code).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, code))
}

/// Every tag class, ordered by id
pub fn load_classes(conn: &Connection, library: LibraryId) -> Result<Vec<TagClass>> {
    let mut stmt =
        conn.prepare("SELECT id, name, value_type, hidden FROM tag_classes ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok(TagClass::from_row(
            Identity::flushed(library, row.get(0)?),
            row.get(1)?,
            value_type_column(row, 2)?,
            row.get::<_, i64>(3)? != 0,
        ))
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn insert_class(conn: &Connection, class: &TagClass) -> Result<i64> {
    conn.execute(
        "INSERT INTO tag_classes (name, value_type, hidden) VALUES (?, ?, ?)",
        params![class.name(), class.value_type().code(), class.hidden as i64],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_class(conn: &Connection, id: i64, class: &TagClass) -> Result<()> {
    conn.execute(
        "UPDATE tag_classes SET name = ?, hidden = ? WHERE id = ?",
        params![class.name(), class.hidden as i64, id],
    )?;
    Ok(())
}

/// Tag rows passing `filter`, ordered by id
pub fn query_tags(conn: &Connection, filter: &Fragment, paging: &str) -> Result<Vec<TagRow>> {
    let sql = format!(
        "SELECT tags.id, tags.class_id, tags.value_type, tags.value FROM tags \
         WHERE {} ORDER BY tags.id{}",
        filter.sql(),
        paging
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(filter.params().iter()), |row| {
        Ok(TagRow {
            id: row.get(0)?,
            class_id: row.get(1)?,
            value_type: value_type_column(row, 2)?,
            value: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn count(conn: &Connection, table: &str, filter: &Fragment) -> Result<u64> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", table, filter.sql());
    let n: i64 = conn.query_row(&sql, params_from_iter(filter.params().iter()), |r| r.get(0))?;
    Ok(n.max(0) as u64)
}

/// Id of a stored tag with the same class and value
///
/// Text compares ignoring ASCII case, like `TagValue` equality. `None`
/// values never match.
pub fn find_duplicate_tag(conn: &Connection, class_id: i64, value: &TagValue) -> Result<Option<i64>> {
    let sql = match value {
        TagValue::None => return Ok(None),
        TagValue::Text(_) => {
            "SELECT id FROM tags WHERE class_id = ? AND value_type = ? \
             AND value = ? COLLATE NOCASE ORDER BY id LIMIT 1"
        }
        _ => "SELECT id FROM tags WHERE class_id = ? AND value_type = ? AND value = ? ORDER BY id LIMIT 1",
    };
    let id = conn
        .query_row(
            sql,
            params![class_id, value.value_type().code(), encode_value(value)?],
            |r| r.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn insert_tag(conn: &Connection, class_id: i64, value: &TagValue) -> Result<i64> {
    conn.execute(
        "INSERT INTO tags (class_id, value_type, value) VALUES (?, ?, ?)",
        params![class_id, value.value_type().code(), encode_value(value)?],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_tag(conn: &Connection, id: i64, class_id: i64, value: &TagValue) -> Result<()> {
    conn.execute(
        "UPDATE tags SET class_id = ?, value_type = ?, value = ? WHERE id = ?",
        params![class_id, value.value_type().code(), encode_value(value)?, id],
    )?;
    Ok(())
}

/// Node rows `(id, display_name)` passing `filter`, ordered by id
pub fn query_nodes(conn: &Connection, filter: &Fragment, paging: &str) -> Result<Vec<(i64, String)>> {
    let sql = format!(
        "SELECT nodes.id, nodes.display_name FROM nodes WHERE {} ORDER BY nodes.id{}",
        filter.sql(),
        paging
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(filter.params().iter()), |row| {
        Ok((row.get(0)?, row.get(1)?))
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Tag ids linked to a node, ordered by tag id
pub fn node_tag_ids(conn: &Connection, node_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT tag_id FROM links WHERE node_id = ? ORDER BY tag_id")?;
    let rows = stmt.query_map([node_id], |r| r.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Node ids linking a tag, ordered by node id
pub fn tag_node_ids(conn: &Connection, tag_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT node_id FROM links WHERE tag_id = ? ORDER BY node_id")?;
    let rows = stmt.query_map([tag_id], |r| r.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn is_linked(conn: &Connection, node_id: i64, tag_id: i64) -> Result<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM links WHERE node_id = ? AND tag_id = ?")?;
    Ok(stmt.exists([node_id, tag_id])?)
}

/// Node-reference tags pointing at `node_id`, with the class name of each
/// and the nodes holding it
pub fn referrers(conn: &Connection, node_id: i64) -> Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT l.node_id, c.name
        FROM tags t
        JOIN links l ON l.tag_id = t.id
        JOIN tag_classes c ON c.id = t.class_id
        WHERE t.value_type = ? AND t.value = ?
        ORDER BY l.node_id
        "#,
    )?;
    let rows = stmt.query_map(params![ValueType::NodeReference.code(), node_id], |row| {
        Ok((row.get(0)?, row.get(1)?))
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Ids of node-reference tags pointing at `node_id`
pub fn reference_tag_ids(conn: &Connection, node_id: i64) -> Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT id FROM tags WHERE value_type = ? AND value = ? ORDER BY id")?;
    let rows = stmt.query_map(params![ValueType::NodeReference.code(), node_id], |r| r.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn load_meta(conn: &Connection) -> Result<HashMap<String, (String, String)>> {
    let mut stmt = conn.prepare("SELECT key, value FROM meta")?;
    let rows = stmt.query_map([], |row| {
        let key: String = row.get(0)?;
        let value: String = row.get(1)?;
        Ok((key.to_ascii_lowercase(), (key, value)))
    })?;
    Ok(rows.collect::<rusqlite::Result<HashMap<_, _>>>()?)
}
