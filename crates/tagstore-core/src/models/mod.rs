//! Entity model
//!
//! Pure value and entity types: identities, tag values, tag classes, tags and
//! nodes. Entities start out unflushed and acquire an identity when a
//! `Library` flushes them. Every entity handed out by the library is an
//! independent copy.

pub mod identity;
pub mod node;
pub mod tag;
pub mod tag_class;
pub mod value;

pub use identity::{Identity, LibraryId};
pub use node::Node;
pub use tag::Tag;
pub use tag_class::TagClass;
pub use value::{Locator, Number, Resolved, TagValue, ValueType};
