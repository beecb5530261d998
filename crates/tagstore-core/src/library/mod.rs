//! The library: authoritative store, caches and change notifications
//!
//! ## Locking
//!
//! One reentrant lock per library. Every public call takes it, reads
//! included; an explicit `Transaction` holds it until it ends, so other
//! threads serialize behind the transaction while the owning thread can
//! keep calling in.
//!
//! ## Mutations
//!
//! Each mutating call runs in its own savepoint frame, nested in the
//! enclosing transaction if there is one. A failing call rolls its frame
//! back (store and caches) and surfaces the error. Events queue up until
//! the outermost frame ends and are then delivered in order, outside any
//! internal borrow, so handlers can read from the library.

mod affected;
pub mod events;
mod state;
pub mod transaction;

use std::cell::{RefCell, RefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use rusqlite::Connection;
use tracing::{info, trace, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::filter::{MatchContext, NodeFilter, TagFilter};
use crate::models::{Identity, LibraryId, Locator, Node, Resolved, Tag, TagClass, TagValue};
use crate::storage;

use state::State;

pub use events::{LibraryEvent, Listener, SubscriptionId};
pub use transaction::Transaction;

pub struct Library {
    id: LibraryId,
    state: ReentrantMutex<RefCell<State>>,
    listeners: Mutex<Vec<(SubscriptionId, Weak<dyn Listener>)>>,
}

/// Borrow the state under the lock
fn borrow(cell: &RefCell<State>) -> Result<RefMut<'_, State>> {
    cell.try_borrow_mut()
        .map_err(|_| Error::library("library re-entered while an operation is in progress"))
}

impl Library {
    /// Open or create a library database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let library = Self::from_connection(storage::open(path)?)?;
        info!(path = %path.display(), id = library.id.get(), "library opened");
        Ok(library)
    }

    /// Open an in-memory library (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(storage::open_in_memory()?)
    }

    /// Open the library named by `config`, attaching its storage directory
    pub fn open_with_config(config: &Config) -> Result<Self> {
        let library = Self::open(config.library_path())?;
        library.set_storage_dir(config.storage_dir.clone())?;
        Ok(library)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let id = LibraryId::next();
        Ok(Self {
            id,
            state: ReentrantMutex::new(RefCell::new(State::new(id, conn)?)),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> LibraryId {
        self.id
    }

    // ==================== Plumbing ====================

    /// Hold the library lock until the guard drops
    pub(crate) fn hold(&self) -> ReentrantMutexGuard<'_, RefCell<State>> {
        self.state.lock()
    }

    fn read<T>(&self, op: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let guard = self.state.lock();
        let mut state = borrow(&guard)?;
        op(&mut *state)
    }

    fn write<T>(&self, op: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let guard = self.state.lock();
        let result = {
            let mut state = borrow(&guard)?;
            if state.dispatching {
                return Err(Error::library(
                    "cannot modify the library from inside an event handler",
                ));
            }
            state.begin_frame(false)?;
            let result = op(&mut *state).and_then(|value| state.commit_frame().map(|()| value));
            if result.is_err() {
                if let Err(e) = state.rollback_frame() {
                    warn!(error = %e, "rollback failed");
                }
            }
            result
        };
        self.deliver(&guard);
        result
    }

    /// Deliver queued events once no frame is open
    fn deliver(&self, cell: &RefCell<State>) {
        let events = {
            let Ok(mut state) = cell.try_borrow_mut() else {
                return;
            };
            if state.dispatching || state.depth() > 0 {
                return;
            }
            let events = state.take_events();
            if events.is_empty() {
                return;
            }
            state.dispatching = true;
            events
        };

        let listeners: Vec<Arc<dyn Listener>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|(_, l)| l.strong_count() > 0);
            listeners.iter().filter_map(|(_, l)| l.upgrade()).collect()
        };
        for event in &events {
            trace!(event = event.kind(), listeners = listeners.len(), "delivering");
            for listener in &listeners {
                listener.on_event(self, event);
            }
        }

        if let Ok(mut state) = cell.try_borrow_mut() {
            state.dispatching = false;
        }
    }

    // ==================== Subscriptions ====================

    /// Register a listener
    ///
    /// The library keeps only a weak reference; dropping the last `Arc`
    /// unsubscribes.
    pub fn subscribe<L: Listener + 'static>(&self, listener: &Arc<L>) -> SubscriptionId {
        let weak: Weak<L> = Arc::downgrade(listener);
        let weak: Weak<dyn Listener> = weak;
        let id = SubscriptionId::next();
        self.listeners.lock().push((id, weak));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    // ==================== Transactions ====================

    /// Start an explicit transaction
    pub fn begin(&self) -> Result<Transaction<'_>> {
        Transaction::begin(self)
    }

    /// Run `body` in a transaction: commit on `Ok`, roll back on `Err`
    pub fn transaction<T, E, F>(&self, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Library) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let tx = self.begin()?;
        match body(self) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                tx.rollback()?;
                Err(e)
            }
        }
    }

    // ==================== Tag classes ====================

    /// Class by name, ignoring case
    pub fn tag_class(&self, name: &str) -> Result<Option<TagClass>> {
        self.read(|s| Ok(s.tag_class(name)))
    }

    pub fn tag_class_by_id(&self, id: &Identity) -> Result<Option<TagClass>> {
        self.read(|s| Ok(s.tag_class_by_id(id)))
    }

    /// Every class, ordered by name
    pub fn tag_classes(&self) -> Result<Vec<TagClass>> {
        self.read(|s| Ok(s.tag_classes()))
    }

    /// Create a class, or return the existing one with the same schema
    ///
    /// An existing class with the same name but a different value type or
    /// hidden flag is a library error.
    pub fn create_tag_class(&self, class: &TagClass) -> Result<TagClass> {
        self.write(|s| s.create_class(class))
    }

    /// Create or update a class
    ///
    /// Only the name and hidden flag of a flushed class may change.
    pub fn flush_tag_class(&self, class: &mut TagClass) -> Result<()> {
        *class = self.write(|s| s.flush_class(class))?;
        Ok(())
    }

    /// Remove a class; with `cascade` its tags (and their links) go too
    pub fn remove_tag_class(&self, class: &mut TagClass, cascade: bool) -> Result<()> {
        self.write(|s| s.remove_class(class, cascade))?;
        class.identity = Identity::new();
        Ok(())
    }

    // ==================== Tags ====================

    pub fn tags(&self, filter: &TagFilter) -> Result<Vec<Tag>> {
        self.read(|s| s.tags(filter))
    }

    pub fn tag(&self, id: &Identity) -> Result<Option<Tag>> {
        self.read(|s| s.tag(id))
    }

    /// Number of tags passing `filter` (paging ignored)
    pub fn tag_count(&self, filter: &TagFilter) -> Result<u64> {
        self.read(|s| s.tag_count(filter))
    }

    /// Flush a new tag, or return the existing one with the same class and value
    pub fn create_tag(&self, class: &TagClass, value: TagValue) -> Result<Tag> {
        let tag = Tag::new(class, value)?;
        self.write(|s| s.flush_tag(&tag))
    }

    pub fn flush_tag(&self, tag: &mut Tag) -> Result<()> {
        *tag = self.write(|s| s.flush_tag(tag))?;
        Ok(())
    }

    /// Remove a tag; linked nodes are dependents, unlinked with `cascade`
    pub fn remove_tag(&self, tag: &mut Tag, cascade: bool) -> Result<()> {
        let id = tag
            .identity
            .id_in(self.id)
            .ok_or_else(|| Error::invalid("tag is not flushed into this library"))?;
        self.write(|s| s.remove_tag(id, cascade))?;
        tag.identity = Identity::new();
        Ok(())
    }

    // ==================== Nodes ====================

    pub fn nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>> {
        self.read(|s| s.nodes(filter))
    }

    pub fn node(&self, id: &Identity) -> Result<Option<Node>> {
        self.read(|s| s.node(id))
    }

    /// Number of nodes passing `filter` (paging ignored)
    pub fn node_count(&self, filter: &NodeFilter) -> Result<u64> {
        self.read(|s| s.node_count(filter))
    }

    pub fn create_node(&self, display_name_template: &str) -> Result<Node> {
        let node = Node::new(display_name_template)?;
        self.write(|s| s.flush_node(&node))
    }

    /// Create or update a node, syncing its links with its tag list
    pub fn flush_node(&self, node: &mut Node) -> Result<()> {
        *node = self.write(|s| s.flush_node(node))?;
        Ok(())
    }

    /// Remove a node and its links
    ///
    /// Node-reference tags pointing at it are dependents, removed with
    /// `cascade`.
    pub fn remove_node(&self, node: &mut Node, cascade: bool) -> Result<()> {
        self.write(|s| s.remove_node(&node.identity, cascade))?;
        node.identity = Identity::new();
        Ok(())
    }

    /// Tags linked to a node
    pub fn node_tags(&self, node: &Identity) -> Result<Vec<Tag>> {
        match node.id_in(self.id) {
            Some(id) => self.read(|s| s.node_tags(id)),
            None => Ok(Vec::new()),
        }
    }

    /// Nodes a tag is linked to
    pub fn tag_nodes(&self, tag: &Identity) -> Result<Vec<Node>> {
        self.read(|s| s.tag_nodes(tag))
    }

    // ==================== Links ====================

    /// Link a tag to a node; false if already linked
    pub fn create_link(&self, node: &Node, tag: &Tag) -> Result<bool> {
        self.write(|s| s.create_link(&node.identity, &tag.identity))
    }

    /// Unlink a tag from a node; false if not linked
    pub fn remove_link(&self, node: &Node, tag: &Tag) -> Result<bool> {
        self.write(|s| s.remove_link(&node.identity, &tag.identity))
    }

    // ==================== Meta ====================

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.read(|s| Ok(s.meta(key)))
    }

    /// Set (`Some`) or delete (`None`) a meta value
    pub fn set_meta(&self, key: &str, value: Option<&str>) -> Result<()> {
        self.write(|s| s.set_meta(key, value))
    }

    pub fn meta_keys(&self) -> Result<Vec<String>> {
        self.read(|s| Ok(s.meta_keys()))
    }

    // ==================== Display and resources ====================

    /// Render a node's display-name template
    pub fn display_name(&self, node: &Node) -> Result<String> {
        self.read(|s| s.display_name(node))
    }

    pub fn storage_dir(&self) -> Result<Option<PathBuf>> {
        self.read(|s| Ok(s.storage_dir.clone()))
    }

    /// Attach (or detach) the directory managed locators resolve against
    pub fn set_storage_dir(&self, dir: Option<PathBuf>) -> Result<()> {
        self.read(|s| {
            s.storage_dir = dir;
            Ok(())
        })
    }

    pub fn resolve(&self, locator: &Locator) -> Result<Resolved> {
        let storage = self.storage_dir()?;
        locator.resolve(storage.as_deref())
    }
}

impl MatchContext for Library {
    fn node_tags(&self, node: &Identity) -> Result<Vec<Tag>> {
        Library::node_tags(self, node)
    }

    fn tag_is_used(&self, tag: &Identity) -> Result<bool> {
        self.read(|s| s.tag_is_used(tag))
    }

    fn is_linked(&self, node: &Identity, tag: &Identity) -> Result<bool> {
        self.read(|s| s.is_linked(node, tag))
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library").field("id", &self.id).finish()
    }
}
