//! Change notifications
//!
//! Events are delivered synchronously, in emission order, once the
//! outermost transaction frame has ended. They carry copies of entity
//! state; nodes are sent without their tag lists.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::library::Library;
use crate::models::{Identity, Node, Tag, TagClass};

#[derive(Debug, Clone)]
pub enum LibraryEvent {
    TagClassCreated(TagClass),
    TagClassUpdated { before: TagClass, after: TagClass },
    TagClassRemoved(TagClass),
    TagCreated(Tag),
    TagUpdated { before: Tag, after: Tag },
    TagRemoved(Tag),
    NodeCreated(Node),
    /// Also sent, with `before` equal to `after`, when only the rendered
    /// display name may have changed
    NodeUpdated { before: Node, after: Node },
    NodeRemoved(Node),
    LinkCreated { node: Identity, tag: Identity },
    LinkRemoved { node: Identity, tag: Identity },
    MetaChanged {
        key: String,
        before: Option<String>,
        after: Option<String>,
    },
    /// State changed in a way not described by finer events (rollback)
    LibraryReset,
}

impl LibraryEvent {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            LibraryEvent::TagClassCreated(_) => "tag_class_created",
            LibraryEvent::TagClassUpdated { .. } => "tag_class_updated",
            LibraryEvent::TagClassRemoved(_) => "tag_class_removed",
            LibraryEvent::TagCreated(_) => "tag_created",
            LibraryEvent::TagUpdated { .. } => "tag_updated",
            LibraryEvent::TagRemoved(_) => "tag_removed",
            LibraryEvent::NodeCreated(_) => "node_created",
            LibraryEvent::NodeUpdated { .. } => "node_updated",
            LibraryEvent::NodeRemoved(_) => "node_removed",
            LibraryEvent::LinkCreated { .. } => "link_created",
            LibraryEvent::LinkRemoved { .. } => "link_removed",
            LibraryEvent::MetaChanged { .. } => "meta_changed",
            LibraryEvent::LibraryReset => "library_reset",
        }
    }
}

/// Observer of library changes
///
/// Handlers may read from the library but not modify it; mutations from
/// inside a handler fail with a library error.
pub trait Listener: Send + Sync {
    fn on_event(&self, library: &Library, event: &LibraryEvent);
}

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Handle returned by `Library::subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}
