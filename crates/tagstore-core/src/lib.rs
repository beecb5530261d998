//! tagstore Core Library
//!
//! An embedded, SQLite-backed store of tagged objects with live queries.
//!
//! # Architecture
//!
//! - **Library**: owns the database connection, caches and event listeners.
//!   Every mutation runs inside a savepoint; explicit transactions nest.
//! - **Filters**: composable predicates that evaluate both in memory and as
//!   SQL, with the same answer for flushed entities.
//! - **Live sets**: filter results kept current from library events.
//!
//! # Quick Start
//!
//! ```text
//! let library = Arc::new(Library::open("books.db")?);
//! let author = library.create_tag_class(&TagClass::new("author", ValueType::Text)?)?;
//!
//! let mut book = Node::new("{title} by {author}")?;
//! book.link(&library, Tag::new(&author, TagValue::text("Lewis Carrol"))?)?;
//! library.flush_node(&mut book)?;
//!
//! let carrol = NodeSet::new(&library, NodeFilter::has_tag(TagFilter::text_wildcard("*Carrol")));
//! assert_eq!(carrol.len()?, 1);
//! ```
//!
//! # Modules
//!
//! - `models`: identities, values, tag classes, tags and nodes
//! - `filter`: tag and node filters
//! - `library`: storage facade, transactions and events
//! - `set`: live query results
//! - `template`: node display-name templates
//! - `storage`: SQLite schema and row access
//! - `config`: application configuration

pub mod config;
pub mod error;
pub mod filter;
pub mod library;
pub mod models;
pub mod set;
pub mod storage;
pub mod template;

pub use config::Config;
pub use error::{Error, Result};
pub use filter::{CompareOp, Filter, Hint, NodeFilter, TagFilter};
pub use library::{Library, LibraryEvent, Listener, SubscriptionId, Transaction};
pub use models::{Identity, LibraryId, Locator, Node, Number, Resolved, Tag, TagClass, TagValue, ValueType};
pub use set::{LiveSet, NodeSet, SetEvent, TagSet};
pub use template::DisplayTemplate;
