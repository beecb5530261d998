//! Live sets
//!
//! A `LiveSet` binds a library and a filter and keeps the identities of the
//! matching entities current. The first access seeds membership with one
//! query; after that library events patch it in place:
//!
//! - created/updated entities are re-evaluated in memory and appear,
//!   disappear or report an update
//! - removed members disappear
//! - link changes re-evaluate the node (and, for tag sets, the tag)
//! - a library reset drops membership; the next access reseeds
//!
//! While paused, events are ignored outright. `resume` reseeds and reports
//! a single `Reset`.
//!
//! A filter with a limit or offset describes a window over the ordered
//! results. Such a set is requeried on every relevant event and reports a
//! `Reset` whenever the window's contents move, so it never grows past
//! its limit.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::filter::{Atom, Filter};
use crate::library::{Library, LibraryEvent, Listener, SubscriptionId};
use crate::models::{Identity, Node, Tag};

/// Membership change reported to `on_change` callbacks
#[derive(Debug, Clone, PartialEq)]
pub enum SetEvent {
    Appeared(Identity),
    Disappeared(Identity),
    /// Still a member, but its state changed
    Updated(Identity),
    /// Membership was rebuilt; re-read everything
    Reset,
}

/// What a library event means for one kind of set
#[derive(Debug)]
pub enum Touched {
    Nothing,
    /// Re-evaluate these entities
    Changed(Vec<Identity>),
    Removed(Identity),
    /// Reseed now and report a reset
    Reseed,
    /// Drop membership until next access
    Reset,
}

/// An entity a live set can track
pub trait SetEntity: Clone + Send + Sync + 'static {
    type Atom: Atom<Entity = Self> + Send + Sync + 'static;

    fn identity(&self) -> Identity;

    fn query(library: &Library, filter: &Filter<Self::Atom>) -> Result<Vec<Self>>;

    fn fetch(library: &Library, id: &Identity) -> Result<Option<Self>>;

    fn touched(library: &Library, event: &LibraryEvent) -> Touched;
}

impl SetEntity for Tag {
    type Atom = crate::filter::TagAtom;

    fn identity(&self) -> Identity {
        self.identity
    }

    fn query(library: &Library, filter: &Filter<Self::Atom>) -> Result<Vec<Self>> {
        library.tags(filter)
    }

    fn fetch(library: &Library, id: &Identity) -> Result<Option<Self>> {
        library.tag(id)
    }

    fn touched(_library: &Library, event: &LibraryEvent) -> Touched {
        match event {
            LibraryEvent::TagCreated(tag) => Touched::Changed(vec![tag.identity]),
            LibraryEvent::TagUpdated { after, .. } => Touched::Changed(vec![after.identity]),
            LibraryEvent::TagRemoved(tag) => Touched::Removed(tag.identity),
            // "unused" and "linked with" depend on links
            LibraryEvent::LinkCreated { tag, .. } | LibraryEvent::LinkRemoved { tag, .. } => {
                Touched::Changed(vec![*tag])
            }
            LibraryEvent::TagClassUpdated { .. } => Touched::Reseed,
            LibraryEvent::LibraryReset => Touched::Reset,
            _ => Touched::Nothing,
        }
    }
}

impl SetEntity for Node {
    type Atom = crate::filter::NodeAtom;

    fn identity(&self) -> Identity {
        self.identity
    }

    fn query(library: &Library, filter: &Filter<Self::Atom>) -> Result<Vec<Self>> {
        library.nodes(filter)
    }

    fn fetch(library: &Library, id: &Identity) -> Result<Option<Self>> {
        library.node(id)
    }

    fn touched(library: &Library, event: &LibraryEvent) -> Touched {
        match event {
            LibraryEvent::NodeCreated(node) => Touched::Changed(vec![node.identity]),
            LibraryEvent::NodeUpdated { after, .. } => Touched::Changed(vec![after.identity]),
            LibraryEvent::NodeRemoved(node) => Touched::Removed(node.identity),
            LibraryEvent::LinkCreated { node, .. } | LibraryEvent::LinkRemoved { node, .. } => {
                Touched::Changed(vec![*node])
            }
            LibraryEvent::TagUpdated { after, .. } => match library.tag_nodes(&after.identity) {
                Ok(nodes) => Touched::Changed(nodes.iter().map(|n| n.identity).collect()),
                Err(e) => {
                    warn!(error = %e, "cannot list nodes of updated tag, reseeding");
                    Touched::Reseed
                }
            },
            LibraryEvent::TagClassUpdated { .. } => Touched::Reseed,
            LibraryEvent::LibraryReset => Touched::Reset,
            _ => Touched::Nothing,
        }
    }
}

type Callback = Arc<dyn Fn(&SetEvent) + Send + Sync>;

struct SetState<E: SetEntity> {
    filter: Filter<E::Atom>,
    /// `None` until seeded
    members: Option<Members>,
    paused: bool,
}

#[derive(Default)]
struct Members {
    order: Vec<Identity>,
    ids: HashSet<i64>,
}

impl Members {
    fn contains(&self, id: &Identity) -> bool {
        id.is_flushed() && self.ids.contains(&id.id())
    }

    fn push(&mut self, id: Identity) {
        if self.ids.insert(id.id()) {
            self.order.push(id);
        }
    }

    fn remove(&mut self, id: &Identity) -> bool {
        if !self.ids.remove(&id.id()) {
            return false;
        }
        self.order.retain(|m| m != id);
        true
    }
}

struct SetInner<E: SetEntity> {
    state: Mutex<SetState<E>>,
    callbacks: Mutex<Vec<Callback>>,
}

impl<E: SetEntity> SetInner<E> {
    fn seed(library: &Library, filter: &Filter<E::Atom>) -> Result<Members> {
        let mut members = Members::default();
        for entity in E::query(library, filter)? {
            members.push(entity.identity());
        }
        debug!(count = members.order.len(), "seeded live set");
        Ok(members)
    }

    /// Membership change for one entity, if any
    fn reevaluate(
        library: &Library,
        filter: &Filter<E::Atom>,
        members: &mut Members,
        id: &Identity,
    ) -> Result<Option<SetEvent>> {
        let passes = match E::fetch(library, id)? {
            Some(entity) => filter.matches(&entity, library)?,
            None => false,
        };
        let member = members.contains(id);
        Ok(match (member, passes) {
            (false, true) => {
                members.push(*id);
                Some(SetEvent::Appeared(*id))
            }
            (true, false) => {
                members.remove(id);
                Some(SetEvent::Disappeared(*id))
            }
            (true, true) => Some(SetEvent::Updated(*id)),
            (false, false) => None,
        })
    }

    fn handle(&self, library: &Library, event: &LibraryEvent) -> Result<Vec<SetEvent>> {
        let mut state = self.state.lock();
        if state.paused {
            return Ok(Vec::new());
        }
        let touched = E::touched(library, event);
        if let Touched::Reset = touched {
            state.members = None;
            return Ok(vec![SetEvent::Reset]);
        }
        if state.members.is_none() {
            return Ok(Vec::new());
        }
        if state.filter.limit().is_some() || state.filter.offset().is_some() {
            return self.handle_paged(library, &mut state, touched);
        }

        let mut out = Vec::new();
        match touched {
            Touched::Nothing | Touched::Reset => {}
            Touched::Reseed => {
                state.members = Some(Self::seed(library, &state.filter)?);
                out.push(SetEvent::Reset);
            }
            Touched::Removed(id) => {
                if let Some(members) = state.members.as_mut() {
                    if members.remove(&id) {
                        out.push(SetEvent::Disappeared(id));
                    }
                }
            }
            Touched::Changed(ids) => {
                let SetState {
                    filter, members, ..
                } = &mut *state;
                if let Some(members) = members.as_mut() {
                    for id in &ids {
                        if let Some(e) = Self::reevaluate(library, filter, members, id)? {
                            out.push(e);
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    /// A paged window can shift on any change, so it is requeried instead
    /// of patched. A reset is reported when the window moved, or always
    /// for events that force a reseed.
    fn handle_paged(
        &self,
        library: &Library,
        state: &mut SetState<E>,
        touched: Touched,
    ) -> Result<Vec<SetEvent>> {
        let (changed, forced) = match touched {
            Touched::Nothing | Touched::Reset => return Ok(Vec::new()),
            Touched::Reseed => (Vec::new(), true),
            Touched::Removed(_) => (Vec::new(), false),
            Touched::Changed(ids) => (ids, false),
        };
        let fresh = Self::seed(library, &state.filter)?;
        let moved = forced
            || state
                .members
                .as_ref()
                .map_or(true, |members| members.order != fresh.order);
        let out = if moved {
            vec![SetEvent::Reset]
        } else {
            changed
                .into_iter()
                .filter(|id| fresh.contains(id))
                .map(SetEvent::Updated)
                .collect()
        };
        state.members = Some(fresh);
        Ok(out)
    }

    fn notify(&self, events: &[SetEvent]) {
        if events.is_empty() {
            return;
        }
        let callbacks: Vec<Callback> = self.callbacks.lock().clone();
        for event in events {
            for callback in &callbacks {
                callback(event);
            }
        }
    }
}

impl<E: SetEntity> Listener for SetInner<E> {
    fn on_event(&self, library: &Library, event: &LibraryEvent) {
        match self.handle(library, event) {
            Ok(events) => self.notify(&events),
            Err(e) => {
                warn!(error = %e, event = event.kind(), "live set update failed, dropping membership");
                self.state.lock().members = None;
                self.notify(&[SetEvent::Reset]);
            }
        }
    }
}

/// Incrementally maintained query result
pub struct LiveSet<E: SetEntity> {
    library: Arc<Library>,
    inner: Arc<SetInner<E>>,
    subscription: SubscriptionId,
}

pub type TagSet = LiveSet<Tag>;
pub type NodeSet = LiveSet<Node>;

impl<E: SetEntity> LiveSet<E> {
    pub fn new(library: &Arc<Library>, filter: Filter<E::Atom>) -> Self {
        let inner = Arc::new(SetInner {
            state: Mutex::new(SetState {
                filter,
                members: None,
                paused: false,
            }),
            callbacks: Mutex::new(Vec::new()),
        });
        let subscription = library.subscribe(&inner);
        Self {
            library: Arc::clone(library),
            inner,
            subscription,
        }
    }

    /// Register a callback for membership changes
    pub fn on_change(&self, callback: impl Fn(&SetEvent) + Send + Sync + 'static) {
        self.inner.callbacks.lock().push(Arc::new(callback));
    }

    /// Run `f` on seeded membership
    fn with_members<T>(&self, f: impl FnOnce(&Members) -> T) -> Result<T> {
        // Library lock first, then the set: the order events arrive in
        let _held = self.library.hold();
        let mut state = self.inner.state.lock();
        let members = match state.members.take() {
            Some(members) => members,
            None => SetInner::<E>::seed(&self.library, &state.filter)?,
        };
        let out = f(&members);
        state.members = Some(members);
        Ok(out)
    }

    pub fn len(&self) -> Result<usize> {
        self.with_members(|m| m.order.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Member identities in order of appearance
    pub fn identities(&self) -> Result<Vec<Identity>> {
        self.with_members(|m| m.order.clone())
    }

    pub fn contains(&self, id: &Identity) -> Result<bool> {
        self.with_members(|m| m.contains(id))
    }

    /// Fresh copies of the members
    pub fn entities(&self) -> Result<Vec<E>> {
        let _held = self.library.hold();
        let mut entities = Vec::new();
        for id in self.identities()? {
            if let Some(entity) = E::fetch(&self.library, &id)? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    pub fn filter(&self) -> Filter<E::Atom> {
        self.inner.state.lock().filter.clone()
    }

    /// Replace the filter; membership is rebuilt and `Reset` reported
    pub fn set_filter(&self, filter: Filter<E::Atom>) -> Result<()> {
        self.reseed_with(Some(filter))
    }

    /// Ignore library events until `resume`
    pub fn pause(&self) {
        self.inner.state.lock().paused = true;
    }

    /// Reseed from the library and report `Reset`
    pub fn resume(&self) -> Result<()> {
        self.inner.state.lock().paused = false;
        self.reseed_with(None)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    fn reseed_with(&self, filter: Option<Filter<E::Atom>>) -> Result<()> {
        {
            let _held = self.library.hold();
            let mut state = self.inner.state.lock();
            if let Some(filter) = filter {
                state.filter = filter;
            }
            state.members = None;
            state.members = Some(SetInner::<E>::seed(&self.library, &state.filter)?);
        }
        self.inner.notify(&[SetEvent::Reset]);
        Ok(())
    }
}

impl<E: SetEntity> Drop for LiveSet<E> {
    fn drop(&mut self) {
        self.library.unsubscribe(self.subscription);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{NodeFilter, TagFilter};
    use crate::models::{TagClass, TagValue, ValueType};

    fn recorder<E: SetEntity>(set: &LiveSet<E>) -> Arc<Mutex<Vec<SetEvent>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        set.on_change(move |e| sink.lock().push(e.clone()));
        log
    }

    fn library() -> (Arc<Library>, TagClass) {
        let library = Arc::new(Library::open_in_memory().unwrap());
        let author = library
            .create_tag_class(&TagClass::new("author", ValueType::Text).unwrap())
            .unwrap();
        (library, author)
    }

    #[test]
    fn test_tag_set_tracks_creation_and_removal() {
        let (library, author) = library();
        let set = TagSet::new(&library, TagFilter::text_wildcard("L*"));
        assert_eq!(set.len().unwrap(), 0);
        let log = recorder(&set);

        let mut lewis = library.create_tag(&author, TagValue::text("Lewis")).unwrap();
        library.create_tag(&author, TagValue::text("Tolkien")).unwrap();
        assert_eq!(set.identities().unwrap(), vec![lewis.identity]);

        lewis.set_value(TagValue::text("Carrol")).unwrap();
        library.flush_tag(&mut lewis).unwrap();
        assert!(set.is_empty().unwrap());

        assert_eq!(
            *log.lock(),
            vec![
                SetEvent::Appeared(lewis.identity),
                SetEvent::Disappeared(lewis.identity)
            ]
        );
    }

    #[test]
    fn test_paged_set_stays_within_limit() {
        let (library, author) = library();
        let lewis = library.create_tag(&author, TagValue::text("Lewis")).unwrap();
        let set = TagSet::new(&library, TagFilter::class_name("author").with_limit(1));
        assert_eq!(set.identities().unwrap(), vec![lewis.identity]);
        let log = recorder(&set);

        library.create_tag(&author, TagValue::text("Peake")).unwrap();
        assert_eq!(set.identities().unwrap(), vec![lewis.identity]);
        assert!(log.lock().is_empty());

        let mut lewis = lewis;
        library.remove_tag(&mut lewis, false).unwrap();
        assert_eq!(set.len().unwrap(), 1);
        let texts: Vec<String> = set
            .entities()
            .unwrap()
            .iter()
            .map(|t| t.value().to_string())
            .collect();
        assert_eq!(texts, vec!["Peake"]);
        assert_eq!(*log.lock(), vec![SetEvent::Reset]);
    }

    #[test]
    fn test_unseeded_set_ignores_events() {
        let (library, author) = library();
        let set = TagSet::new(&library, TagFilter::all());
        let log = recorder(&set);
        library.create_tag(&author, TagValue::text("Lewis")).unwrap();
        assert!(log.lock().is_empty());
        assert_eq!(set.len().unwrap(), 1);
    }

    #[test]
    fn test_tag_set_unused_follows_links() {
        let (library, author) = library();
        let tag = library.create_tag(&author, TagValue::text("Lewis")).unwrap();
        let node = library.create_node("x").unwrap();
        let set = TagSet::new(&library, TagFilter::unused());
        assert!(set.contains(&tag.identity).unwrap());

        library.create_link(&node, &tag).unwrap();
        assert!(!set.contains(&tag.identity).unwrap());
        library.remove_link(&node, &tag).unwrap();
        assert!(set.contains(&tag.identity).unwrap());
    }

    #[test]
    fn test_node_set_has_tag() {
        let (library, author) = library();
        let set = NodeSet::new(
            &library,
            NodeFilter::has_tag(TagFilter::class_name("author").and(TagFilter::text("Lewis Carrol"))),
        );
        assert_eq!(set.len().unwrap(), 0);
        let log = recorder(&set);

        let mut node = Node::new("{author}").unwrap();
        node.link(&library, Tag::new(&author, TagValue::text("Lewis Carrol")).unwrap())
            .unwrap();
        library.flush_node(&mut node).unwrap();
        assert_eq!(set.len().unwrap(), 1);
        let appeared = log
            .lock()
            .iter()
            .filter(|e| matches!(e, SetEvent::Appeared(_)))
            .count();
        assert_eq!(appeared, 1);

        let tag = library.node_tags(&node.identity).unwrap()[0].clone();
        library.remove_link(&node, &tag).unwrap();
        assert_eq!(set.len().unwrap(), 0);
        assert_eq!(log.lock().last(), Some(&SetEvent::Disappeared(node.identity)));
    }

    #[test]
    fn test_node_set_sees_tag_value_change() {
        let (library, author) = library();
        let mut tag = library.create_tag(&author, TagValue::text("Lewis")).unwrap();
        let node = library.create_node("book").unwrap();
        library.create_link(&node, &tag).unwrap();

        let set = NodeSet::new(&library, NodeFilter::has_tag(TagFilter::text("Lewis")));
        assert_eq!(set.len().unwrap(), 1);
        tag.set_value(TagValue::text("Tolkien")).unwrap();
        library.flush_tag(&mut tag).unwrap();
        assert_eq!(set.len().unwrap(), 0);
    }

    #[test]
    fn test_pause_and_resume() {
        let (library, author) = library();
        let set = TagSet::new(&library, TagFilter::class_name("author"));
        assert_eq!(set.len().unwrap(), 0);
        let log = recorder(&set);

        set.pause();
        assert!(set.is_paused());
        library.create_tag(&author, TagValue::text("Lewis")).unwrap();
        library.create_tag(&author, TagValue::text("Tolkien")).unwrap();
        assert_eq!(set.len().unwrap(), 0);
        assert!(log.lock().is_empty());

        set.resume().unwrap();
        assert!(!set.is_paused());
        assert_eq!(set.len().unwrap(), 2);
        assert_eq!(*log.lock(), vec![SetEvent::Reset]);
    }

    #[test]
    fn test_library_reset_reseeds_lazily() {
        let (library, author) = library();
        let set = TagSet::new(&library, TagFilter::all());
        library.create_tag(&author, TagValue::text("Lewis")).unwrap();
        assert_eq!(set.len().unwrap(), 1);
        let log = recorder(&set);

        let tx = library.begin().unwrap();
        tx.create_tag(&author, TagValue::text("Tolkien")).unwrap();
        tx.rollback().unwrap();

        assert_eq!(*log.lock(), vec![SetEvent::Reset]);
        assert_eq!(set.len().unwrap(), 1);
    }

    #[test]
    fn test_set_filter_and_class_rename() {
        let (library, author) = library();
        library.create_tag(&author, TagValue::text("Lewis")).unwrap();
        let set = TagSet::new(&library, TagFilter::class_name("writer"));
        assert_eq!(set.len().unwrap(), 0);
        let log = recorder(&set);

        let mut renamed = author.clone();
        renamed.set_name("writer").unwrap();
        library.flush_tag_class(&mut renamed).unwrap();
        assert_eq!(set.len().unwrap(), 1);
        assert_eq!(*log.lock(), vec![SetEvent::Reset]);

        set.set_filter(TagFilter::class_name("nothing")).unwrap();
        assert!(set.is_empty().unwrap());
        assert_eq!(set.entities().unwrap().len(), 0);
    }

    #[test]
    fn test_dropped_set_unsubscribes() {
        let (library, author) = library();
        {
            let set = TagSet::new(&library, TagFilter::all());
            set.len().unwrap();
        }
        library.create_tag(&author, TagValue::text("Lewis")).unwrap();
    }
}
