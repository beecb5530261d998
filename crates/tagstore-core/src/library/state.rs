//! Library state behind the lock
//!
//! Every method here runs with the library lock held and, for mutations,
//! inside an open frame. Mutations write SQLite first, then patch the
//! caches, then queue an event.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::{Error, Result};
use crate::filter::{NodeFilter, TagFilter};
use crate::library::affected::{self, Graph};
use crate::library::events::LibraryEvent;
use crate::models::tag_class::fold;
use crate::models::{Identity, LibraryId, Node, Tag, TagClass, TagValue};
use crate::storage::rows::{self, encode_value, TagRow};
use crate::template::DisplayTemplate;

#[derive(Debug, Clone, Default)]
struct Cache {
    /// Every class, keyed by folded name
    classes: HashMap<String, TagClass>,
    tags: HashMap<i64, Tag>,
    nodes: HashMap<i64, Node>,
    /// folded key -> (key as written, value)
    meta: HashMap<String, (String, String)>,
}

/// One level of the savepoint stack
struct Frame {
    savepoint: String,
    snapshot: Cache,
    pending_len: usize,
    explicit: bool,
}

pub(crate) struct State {
    lib: LibraryId,
    conn: Connection,
    cache: Cache,
    frames: Vec<Frame>,
    pending: Vec<LibraryEvent>,
    reset_pending: bool,
    pub(crate) dispatching: bool,
    pub(crate) storage_dir: Option<PathBuf>,
}

impl State {
    pub(crate) fn new(lib: LibraryId, conn: Connection) -> Result<Self> {
        let mut cache = Cache::default();
        for class in rows::load_classes(&conn, lib)? {
            cache.classes.insert(class.key(), class);
        }
        cache.meta = rows::load_meta(&conn)?;
        Ok(Self {
            lib,
            conn,
            cache,
            frames: Vec::new(),
            pending: Vec::new(),
            reset_pending: false,
            dispatching: false,
            storage_dir: None,
        })
    }

    // ==================== Frames ====================

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Open a savepoint and snapshot the caches; returns the new depth
    pub(crate) fn begin_frame(&mut self, explicit: bool) -> Result<usize> {
        let savepoint = format!("tagstore_sp{}", self.frames.len());
        self.conn.execute_batch(&format!("SAVEPOINT {}", savepoint))?;
        self.frames.push(Frame {
            savepoint,
            snapshot: self.cache.clone(),
            pending_len: self.pending.len(),
            explicit,
        });
        Ok(self.frames.len())
    }

    pub(crate) fn commit_frame(&mut self) -> Result<()> {
        let frame = self
            .frames
            .last()
            .ok_or_else(|| Error::library("no open transaction"))?;
        self.conn
            .execute_batch(&format!("RELEASE {}", frame.savepoint))?;
        self.frames.pop();
        Ok(())
    }

    /// Undo the innermost frame
    ///
    /// Its queued events are dropped. Explicit transactions additionally
    /// turn the delivery into a single reset.
    pub(crate) fn rollback_frame(&mut self) -> Result<()> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| Error::library("no open transaction"))?;
        self.cache = frame.snapshot;
        self.pending.truncate(frame.pending_len);
        if frame.explicit {
            self.reset_pending = true;
        }
        self.conn.execute_batch(&format!(
            "ROLLBACK TO {0}; RELEASE {0}",
            frame.savepoint
        ))?;
        Ok(())
    }

    /// Events ready for delivery (only once no frame is open)
    pub(crate) fn take_events(&mut self) -> Vec<LibraryEvent> {
        if !self.frames.is_empty() {
            return Vec::new();
        }
        let events = std::mem::take(&mut self.pending);
        if std::mem::take(&mut self.reset_pending) {
            vec![LibraryEvent::LibraryReset]
        } else {
            events
        }
    }

    fn emit(&mut self, event: LibraryEvent) {
        debug!(event = event.kind(), "queued library event");
        self.pending.push(event);
    }

    /// Row id of an identity from this library
    fn own(&self, identity: &Identity, what: &str) -> Result<i64> {
        identity.id_in(self.lib).ok_or_else(|| {
            if identity.is_flushed() {
                Error::invalid(format!("{} {} belongs to another library", what, identity))
            } else {
                Error::invalid(format!("{} is not flushed", what))
            }
        })
    }

    fn identity(&self, id: i64) -> Identity {
        Identity::flushed(self.lib, id)
    }

    // ==================== Tag classes ====================

    fn class_by_row(&self, id: i64) -> Option<&TagClass> {
        self.cache.classes.values().find(|c| c.identity.id() == id)
    }

    pub(crate) fn tag_class(&self, name: &str) -> Option<TagClass> {
        self.cache.classes.get(&fold(name)).cloned()
    }

    pub(crate) fn tag_class_by_id(&self, identity: &Identity) -> Option<TagClass> {
        let id = identity.id_in(self.lib)?;
        self.class_by_row(id).cloned()
    }

    pub(crate) fn tag_classes(&self) -> Vec<TagClass> {
        let mut classes: Vec<TagClass> = self.cache.classes.values().cloned().collect();
        classes.sort_by_key(|c| c.key());
        classes
    }

    pub(crate) fn create_class(&mut self, class: &TagClass) -> Result<TagClass> {
        if let Some(existing) = self.cache.classes.get(&class.key()) {
            if existing.value_type() == class.value_type() && existing.hidden == class.hidden {
                return Ok(existing.clone());
            }
            return Err(Error::library(format!(
                "tag class '{}' already exists with value type {} (hidden: {})",
                existing.name(),
                existing.value_type(),
                existing.hidden
            )));
        }
        let id = rows::insert_class(&self.conn, class)?;
        let created = TagClass::from_row(
            self.identity(id),
            class.name().to_string(),
            class.value_type(),
            class.hidden,
        );
        self.cache.classes.insert(created.key(), created.clone());
        debug!(id, name = created.name(), "created tag class");
        self.emit(LibraryEvent::TagClassCreated(created.clone()));
        Ok(created)
    }

    pub(crate) fn flush_class(&mut self, class: &TagClass) -> Result<TagClass> {
        if !class.is_flushed() {
            return self.create_class(class);
        }
        let id = self.own(&class.identity, "tag class")?;
        let before = self
            .class_by_row(id)
            .cloned()
            .ok_or_else(|| Error::library(format!("tag class {} no longer exists", class.identity)))?;

        if before.value_type() != class.value_type() {
            return Err(Error::library(format!(
                "value type of tag class '{}' cannot change from {} to {}",
                before.name(),
                before.value_type(),
                class.value_type()
            )));
        }
        if before.name() == class.name() && before.hidden == class.hidden {
            return Ok(before);
        }
        if class.key() != before.key() && self.cache.classes.contains_key(&class.key()) {
            return Err(Error::library(format!(
                "a tag class named '{}' already exists",
                class.name()
            )));
        }

        rows::update_class(&self.conn, id, class)?;
        let after = TagClass::from_row(
            before.identity,
            class.name().to_string(),
            before.value_type(),
            class.hidden,
        );
        self.cache.classes.remove(&before.key());
        self.cache.classes.insert(after.key(), after.clone());
        debug!(id, from = before.name(), to = after.name(), "updated tag class");
        self.emit(LibraryEvent::TagClassUpdated {
            before,
            after: after.clone(),
        });
        Ok(after)
    }

    pub(crate) fn remove_class(&mut self, class: &TagClass, cascade: bool) -> Result<()> {
        let id = self.own(&class.identity, "tag class")?;
        let before = self
            .class_by_row(id)
            .cloned()
            .ok_or_else(|| Error::library(format!("tag class {} no longer exists", class.identity)))?;

        let filter = TagFilter::class_identity(before.identity);
        let tag_ids: Vec<i64> = rows::query_tags(&self.conn, &filter.to_sql(), "")?
            .into_iter()
            .map(|r| r.id)
            .collect();
        if !tag_ids.is_empty() && !cascade {
            return Err(Error::library(format!(
                "tag class '{}' still has {} tag(s)",
                before.name(),
                tag_ids.len()
            )));
        }
        for tag_id in tag_ids {
            self.remove_tag(tag_id, true)?;
        }

        self.conn
            .execute("DELETE FROM tag_classes WHERE id = ?", [id])?;
        self.cache.classes.remove(&before.key());
        debug!(id, name = before.name(), "removed tag class");
        self.emit(LibraryEvent::TagClassRemoved(before));
        Ok(())
    }

    /// The stored class a tag should use
    ///
    /// An unflushed class is looked up by name and created when missing.
    fn resolve_class(&mut self, class: &TagClass) -> Result<TagClass> {
        if class.is_flushed() {
            let id = self.own(&class.identity, "tag class")?;
            return self.class_by_row(id).cloned().ok_or_else(|| {
                Error::library(format!("tag class {} no longer exists", class.identity))
            });
        }
        match self.cache.classes.get(&class.key()) {
            Some(existing) if existing.value_type() == class.value_type() => Ok(existing.clone()),
            Some(existing) => Err(Error::library(format!(
                "tag class '{}' holds {} values, not {}",
                existing.name(),
                existing.value_type(),
                class.value_type()
            ))),
            None => self.create_class(class),
        }
    }

    // ==================== Tags ====================

    /// Copy of a cached tag with its class as currently stored
    fn tag_copy(&self, tag: &Tag) -> Tag {
        let mut copy = tag.clone();
        if let Some(class) = self.class_by_row(tag.class().identity.id()) {
            copy.set_class(class.clone());
        }
        copy
    }

    fn decode_tag(&mut self, row: TagRow) -> Result<Tag> {
        if let Some(tag) = self.cache.tags.get(&row.id) {
            return Ok(self.tag_copy(tag));
        }
        let id = row.id;
        let class = self.class_by_row(row.class_id).cloned().ok_or_else(|| {
            Error::library(format!(
                "tag #{} references missing tag class #{}",
                id, row.class_id
            ))
        })?;
        let value = row.decode(self.lib)?;
        let tag = Tag::from_row(self.identity(id), class, value);
        self.cache.tags.insert(id, tag.clone());
        Ok(tag)
    }

    pub(crate) fn load_tag(&mut self, id: i64) -> Result<Option<Tag>> {
        if let Some(tag) = self.cache.tags.get(&id) {
            return Ok(Some(self.tag_copy(tag)));
        }
        let filter = TagFilter::id(self.identity(id));
        let row = rows::query_tags(&self.conn, &filter.to_sql(), "")?.into_iter().next();
        row.map(|r| self.decode_tag(r)).transpose()
    }

    pub(crate) fn tag(&mut self, identity: &Identity) -> Result<Option<Tag>> {
        match identity.id_in(self.lib) {
            Some(id) => self.load_tag(id),
            None => Ok(None),
        }
    }

    pub(crate) fn tags(&mut self, filter: &TagFilter) -> Result<Vec<Tag>> {
        let found = rows::query_tags(&self.conn, &filter.to_sql(), &filter.paging_sql())?;
        debug!(count = found.len(), "tag query");
        found.into_iter().map(|r| self.decode_tag(r)).collect()
    }

    pub(crate) fn tag_count(&self, filter: &TagFilter) -> Result<u64> {
        rows::count(&self.conn, "tags", &filter.to_sql())
    }

    fn check_reference(&mut self, value: &TagValue) -> Result<()> {
        if let TagValue::NodeReference(target) = value {
            let id = self.own(target, "referenced node")?;
            if self.load_node(id)?.is_none() {
                return Err(Error::library(format!(
                    "referenced node {} does not exist",
                    target
                )));
            }
        }
        Ok(())
    }

    /// Insert or update a tag
    ///
    /// Unflushed tags are deduplicated: an existing tag with the same class
    /// and value is returned instead of inserting a new row.
    pub(crate) fn flush_tag(&mut self, tag: &Tag) -> Result<Tag> {
        let class = self.resolve_class(tag.class())?;
        if class.value_type() != tag.value().value_type() {
            return Err(Error::invalid(format!(
                "tag class '{}' holds {} values, got {}",
                class.name(),
                class.value_type(),
                tag.value().value_type()
            )));
        }
        self.check_reference(tag.value())?;
        let class_id = class.identity.id();

        if !tag.is_flushed() {
            if let Some(existing) = rows::find_duplicate_tag(&self.conn, class_id, tag.value())? {
                debug!(id = existing, "tag already exists");
                return self.load_tag(existing)?.ok_or_else(|| {
                    Error::library(format!("tag #{} vanished during lookup", existing))
                });
            }
            let id = rows::insert_tag(&self.conn, class_id, tag.value())?;
            let created = Tag::from_row(self.identity(id), class, tag.value().clone());
            self.cache.tags.insert(id, created.clone());
            debug!(id, class = created.class().name(), "created tag");
            self.emit(LibraryEvent::TagCreated(created.clone()));
            return Ok(created);
        }

        let id = self.own(&tag.identity, "tag")?;
        let before = self
            .load_tag(id)?
            .ok_or_else(|| Error::library(format!("tag {} no longer exists", tag.identity)))?;
        let unchanged = before.class().identity.id() == class_id
            && encode_value(before.value())? == encode_value(tag.value())?;
        if unchanged {
            return Ok(before);
        }
        if let Some(dup) = rows::find_duplicate_tag(&self.conn, class_id, tag.value())? {
            if dup != id {
                return Err(Error::library(format!(
                    "tag {} would duplicate tag #{}",
                    tag.identity, dup
                )));
            }
        }

        rows::update_tag(&self.conn, id, class_id, tag.value())?;
        let after = Tag::from_row(before.identity, class, tag.value().clone());
        self.cache.tags.insert(id, after.clone());
        for node in self.cache.nodes.values_mut() {
            if let Some(tags) = node.loaded_tags_mut() {
                for t in tags.iter_mut().filter(|t| t.identity == after.identity) {
                    *t = after.clone();
                }
            }
        }
        debug!(id, "updated tag");
        self.emit(LibraryEvent::TagUpdated {
            before,
            after: after.clone(),
        });
        let holders = rows::tag_node_ids(&self.conn, id)?;
        self.propagate(&holders, Some(after.class().name()))?;
        Ok(after)
    }

    /// Remove a tag; its links are its dependents
    pub(crate) fn remove_tag(&mut self, id: i64, cascade: bool) -> Result<Tag> {
        let before = self
            .load_tag(id)?
            .ok_or_else(|| Error::library(format!("tag #{} no longer exists", id)))?;
        let holders = rows::tag_node_ids(&self.conn, id)?;
        if !holders.is_empty() && !cascade {
            return Err(Error::library(format!(
                "tag #{} is linked to {} node(s)",
                id,
                holders.len()
            )));
        }
        for node_id in holders {
            self.delete_link(node_id, id, true)?;
        }

        self.conn.execute("DELETE FROM tags WHERE id = ?", [id])?;
        self.cache.tags.remove(&id);
        debug!(id, "removed tag");
        self.emit(LibraryEvent::TagRemoved(before.clone()));
        Ok(before)
    }

    // ==================== Nodes ====================

    pub(crate) fn load_node(&mut self, id: i64) -> Result<Option<Node>> {
        if let Some(node) = self.cache.nodes.get(&id) {
            return Ok(Some(bare(node)));
        }
        let filter = NodeFilter::id(self.identity(id));
        let row = rows::query_nodes(&self.conn, &filter.to_sql(), "")?.into_iter().next();
        Ok(row.map(|(id, template)| {
            let node = Node::from_row(self.identity(id), template);
            self.cache.nodes.insert(id, node.clone());
            node
        }))
    }

    pub(crate) fn node(&mut self, identity: &Identity) -> Result<Option<Node>> {
        match identity.id_in(self.lib) {
            Some(id) => self.load_node(id),
            None => Ok(None),
        }
    }

    pub(crate) fn nodes(&mut self, filter: &NodeFilter) -> Result<Vec<Node>> {
        let found = rows::query_nodes(&self.conn, &filter.to_sql(), &filter.paging_sql())?;
        debug!(count = found.len(), "node query");
        let mut nodes = Vec::with_capacity(found.len());
        for (id, template) in found {
            let node = match self.cache.nodes.get(&id) {
                Some(node) => bare(node),
                None => {
                    let node = Node::from_row(self.identity(id), template);
                    self.cache.nodes.insert(id, node.clone());
                    node
                }
            };
            nodes.push(node);
        }
        Ok(nodes)
    }

    pub(crate) fn node_count(&self, filter: &NodeFilter) -> Result<u64> {
        rows::count(&self.conn, "nodes", &filter.to_sql())
    }

    /// Tags linked to a node; the list is cached on the node from then on
    pub(crate) fn node_tags(&mut self, id: i64) -> Result<Vec<Tag>> {
        if let Some(tags) = self.cache.nodes.get(&id).and_then(|n| n.loaded_tags()) {
            return Ok(tags.iter().map(|t| self.tag_copy(t)).collect());
        }
        if self.load_node(id)?.is_none() {
            return Ok(Vec::new());
        }
        let mut tags = Vec::new();
        for tag_id in rows::node_tag_ids(&self.conn, id)? {
            if let Some(tag) = self.load_tag(tag_id)? {
                tags.push(tag);
            }
        }
        if let Some(node) = self.cache.nodes.get_mut(&id) {
            node.set_loaded_tags(Some(tags.clone()));
        }
        Ok(tags)
    }

    pub(crate) fn tag_nodes(&mut self, tag: &Identity) -> Result<Vec<Node>> {
        let Some(id) = tag.id_in(self.lib) else {
            return Ok(Vec::new());
        };
        let mut nodes = Vec::new();
        for node_id in rows::tag_node_ids(&self.conn, id)? {
            if let Some(node) = self.load_node(node_id)? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    pub(crate) fn tag_is_used(&self, tag: &Identity) -> Result<bool> {
        match tag.id_in(self.lib) {
            Some(id) => Ok(!rows::tag_node_ids(&self.conn, id)?.is_empty()),
            None => Ok(false),
        }
    }

    pub(crate) fn is_linked(&self, node: &Identity, tag: &Identity) -> Result<bool> {
        match (node.id_in(self.lib), tag.id_in(self.lib)) {
            (Some(n), Some(t)) => rows::is_linked(&self.conn, n, t),
            _ => Ok(false),
        }
    }

    /// Insert or update a node
    ///
    /// When the caller edited the node's tag list (or the node is new),
    /// unflushed tags are flushed and the stored links are made to match the
    /// list. An unedited list leaves the stored links alone.
    pub(crate) fn flush_node(&mut self, node: &Node) -> Result<Node> {
        DisplayTemplate::parse(node.display_name_template())?;
        let template = node.display_name_template().to_string();

        let id = if !node.is_flushed() {
            self.conn
                .execute("INSERT INTO nodes (display_name) VALUES (?)", [&template])?;
            let id = self.conn.last_insert_rowid();
            let mut created = Node::from_row(self.identity(id), template);
            created.set_loaded_tags(Some(Vec::new()));
            self.cache.nodes.insert(id, created.clone());
            debug!(id, "created node");
            self.emit(LibraryEvent::NodeCreated(bare(&created)));
            id
        } else {
            let id = self.own(&node.identity, "node")?;
            let before = self
                .load_node(id)?
                .ok_or_else(|| Error::library(format!("node {} no longer exists", node.identity)))?;
            if before.display_name_template() != template {
                self.conn.execute(
                    "UPDATE nodes SET display_name = ? WHERE id = ?",
                    params![template, id],
                )?;
                let mut after = before.clone();
                after.set_display_name_template(template.clone())?;
                if let Some(cached) = self.cache.nodes.get_mut(&id) {
                    cached.set_display_name_template(template)?;
                }
                debug!(id, "updated node");
                self.emit(LibraryEvent::NodeUpdated {
                    before: bare(&before),
                    after: bare(&after),
                });
                let referrers: Vec<i64> = affected::affected_nodes(self, &[id], None)?
                    .into_iter()
                    .filter(|&n| n != id)
                    .collect();
                self.announce(&referrers)?;
            }
            id
        };

        if let Some(tags) = node.local_tags() {
            self.sync_links(id, tags)?;
        }
        self.load_node(id)?
            .ok_or_else(|| Error::library(format!("node #{} vanished during flush", id)))
    }

    fn sync_links(&mut self, node_id: i64, tags: &[Tag]) -> Result<()> {
        let mut desired: Vec<Tag> = Vec::new();
        for tag in tags {
            let flushed = if tag.is_flushed() {
                let tag_id = self.own(&tag.identity, "tag")?;
                self.load_tag(tag_id)?
                    .ok_or_else(|| Error::library(format!("tag {} no longer exists", tag.identity)))?
            } else {
                self.flush_tag(tag)?
            };
            if !desired.iter().any(|d| d.identity == flushed.identity) {
                desired.push(flushed);
            }
        }

        let current = self.node_tags(node_id)?;
        for tag in &current {
            if !desired.iter().any(|d| d.identity == tag.identity) {
                self.delete_link(node_id, tag.identity.id(), true)?;
            }
        }
        for tag in &desired {
            if !current.iter().any(|c| c.identity == tag.identity) {
                self.insert_link(node_id, tag)?;
            }
        }
        Ok(())
    }

    /// Remove a node and its links
    ///
    /// Node-reference tags pointing at it are its dependents.
    pub(crate) fn remove_node(&mut self, identity: &Identity, cascade: bool) -> Result<Node> {
        let id = self.own(identity, "node")?;
        let before = self
            .load_node(id)?
            .ok_or_else(|| Error::library(format!("node {} no longer exists", identity)))?;
        let references = rows::reference_tag_ids(&self.conn, id)?;
        if !references.is_empty() && !cascade {
            return Err(Error::library(format!(
                "node {} is referenced by {} tag(s)",
                identity,
                references.len()
            )));
        }
        for tag_id in references {
            self.remove_tag(tag_id, true)?;
        }
        for tag_id in rows::node_tag_ids(&self.conn, id)? {
            self.delete_link(id, tag_id, false)?;
        }

        self.conn.execute("DELETE FROM nodes WHERE id = ?", [id])?;
        self.cache.nodes.remove(&id);
        debug!(id, "removed node");
        self.emit(LibraryEvent::NodeRemoved(bare(&before)));
        Ok(before)
    }

    // ==================== Links ====================

    pub(crate) fn create_link(&mut self, node: &Identity, tag: &Identity) -> Result<bool> {
        let node_id = self.own(node, "node")?;
        let tag_id = self.own(tag, "tag")?;
        if self.load_node(node_id)?.is_none() {
            return Err(Error::library(format!("node {} does not exist", node)));
        }
        let tag = self
            .load_tag(tag_id)?
            .ok_or_else(|| Error::library(format!("tag {} does not exist", tag)))?;
        if rows::is_linked(&self.conn, node_id, tag_id)? {
            return Ok(false);
        }
        self.insert_link(node_id, &tag)?;
        Ok(true)
    }

    pub(crate) fn remove_link(&mut self, node: &Identity, tag: &Identity) -> Result<bool> {
        let node_id = self.own(node, "node")?;
        let tag_id = self.own(tag, "tag")?;
        self.delete_link(node_id, tag_id, true)
    }

    fn insert_link(&mut self, node_id: i64, tag: &Tag) -> Result<()> {
        self.conn.execute(
            "INSERT INTO links (node_id, tag_id) VALUES (?, ?)",
            [node_id, tag.identity.id()],
        )?;
        if let Some(tags) = self
            .cache
            .nodes
            .get_mut(&node_id)
            .and_then(|n| n.loaded_tags_mut())
        {
            tags.push(tag.clone());
        }
        debug!(node = node_id, tag = tag.identity.id(), "created link");
        self.emit(LibraryEvent::LinkCreated {
            node: self.identity(node_id),
            tag: tag.identity,
        });
        self.propagate(&[node_id], Some(tag.class().name()))
    }

    fn delete_link(&mut self, node_id: i64, tag_id: i64, propagate: bool) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM links WHERE node_id = ? AND tag_id = ?",
            [node_id, tag_id],
        )?;
        if removed == 0 {
            return Ok(false);
        }
        let tag_identity = self.identity(tag_id);
        if let Some(tags) = self
            .cache
            .nodes
            .get_mut(&node_id)
            .and_then(|n| n.loaded_tags_mut())
        {
            tags.retain(|t| t.identity != tag_identity);
        }
        debug!(node = node_id, tag = tag_id, "removed link");
        self.emit(LibraryEvent::LinkRemoved {
            node: self.identity(node_id),
            tag: tag_identity,
        });
        if propagate {
            if let Some(tag) = self.load_tag(tag_id)? {
                self.propagate(&[node_id], Some(tag.class().name()))?;
            }
        }
        Ok(true)
    }

    // ==================== Display names ====================

    /// Announce nodes whose rendered name may have changed
    fn propagate(&mut self, changed: &[i64], class_name: Option<&str>) -> Result<()> {
        let affected = affected::affected_nodes(self, changed, class_name)?;
        self.announce(&affected)
    }

    fn announce(&mut self, nodes: &[i64]) -> Result<()> {
        for &id in nodes {
            if let Some(node) = self.load_node(id)? {
                let copy = bare(&node);
                self.emit(LibraryEvent::NodeUpdated {
                    before: copy.clone(),
                    after: copy,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn display_name(&mut self, node: &Node) -> Result<String> {
        let own_tags = match (node.local_tags(), node.identity.id_in(self.lib)) {
            (Some(tags), _) => tags.to_vec(),
            (None, Some(id)) => self.node_tags(id)?,
            (None, None) => Vec::new(),
        };
        node.template()
            .render(|path| self.resolve_path(&own_tags, path))
    }

    /// Values at the end of a placeholder path
    fn resolve_path(&mut self, start: &[Tag], path: &[String]) -> Result<Vec<String>> {
        let Some((last, hops)) = path.split_last() else {
            return Ok(Vec::new());
        };
        let mut current = start.to_vec();
        for hop in hops {
            let mut next = Vec::new();
            let mut seen = HashSet::new();
            for tag in &current {
                if !tag.class().name().eq_ignore_ascii_case(hop) {
                    continue;
                }
                let target = tag
                    .value()
                    .as_node_reference()
                    .and_then(|r| r.id_in(self.lib));
                if let Some(target) = target {
                    if seen.insert(target) {
                        next.extend(self.node_tags(target)?);
                    }
                }
            }
            current = next;
        }
        Ok(current
            .iter()
            .filter(|t| t.class().name().eq_ignore_ascii_case(last) && !t.value().is_none())
            .map(|t| t.value().to_string())
            .collect())
    }

    // ==================== Meta ====================

    pub(crate) fn meta(&self, key: &str) -> Option<String> {
        self.cache.meta.get(&fold(key)).map(|(_, v)| v.clone())
    }

    pub(crate) fn meta_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.cache.meta.values().map(|(k, _)| k.clone()).collect();
        keys.sort_by_key(|k| fold(k));
        keys
    }

    pub(crate) fn set_meta(&mut self, key: &str, value: Option<&str>) -> Result<()> {
        if key.trim().is_empty() {
            return Err(Error::invalid("meta key cannot be empty"));
        }
        let folded = fold(key);
        let existing = self.cache.meta.get(&folded).cloned();
        let before = existing.as_ref().map(|(_, v)| v.clone());
        if before.as_deref() == value {
            return Ok(());
        }
        match value {
            Some(v) => {
                self.conn.execute(
                    "INSERT INTO meta (key, value) VALUES (?1, ?2) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, v],
                )?;
                let stored_key = existing.map_or_else(|| key.to_string(), |(k, _)| k);
                self.cache
                    .meta
                    .insert(folded, (stored_key, v.to_string()));
            }
            None => {
                self.conn.execute("DELETE FROM meta WHERE key = ?", [key])?;
                self.cache.meta.remove(&folded);
            }
        }
        debug!(key, "meta changed");
        self.emit(LibraryEvent::MetaChanged {
            key: key.to_string(),
            before,
            after: value.map(str::to_string),
        });
        Ok(())
    }
}

impl Graph for State {
    fn template(&mut self, node: i64) -> Result<Option<DisplayTemplate>> {
        Ok(self.load_node(node)?.map(|n| n.template()))
    }

    fn referrers(&mut self, node: i64) -> Result<Vec<(i64, String)>> {
        rows::referrers(&self.conn, node)
    }
}

/// Copy of a node without its tag list
///
/// Used for events and for every node handed to callers; the copy fetches
/// its tags on first access.
fn bare(node: &Node) -> Node {
    let mut copy = node.clone();
    copy.set_loaded_tags(None);
    copy
}
