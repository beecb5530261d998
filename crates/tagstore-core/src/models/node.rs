//! Nodes: the user-visible objects tags are linked to

use serde::Serialize;

use crate::error::{Error, Result};
use crate::library::Library;
use crate::models::{Identity, Tag};
use crate::template::DisplayTemplate;

/// A user-visible object
///
/// The linked tags are fetched from the library on first access and kept
/// until explicitly invalidated. Edits to the tag list are written back by
/// `Library::flush_node`; until then matching and rendering see the edited
/// list. An unedited copy of a flushed node always defers to the library,
/// so links made through `Library::create_link` are never masked by it.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub identity: Identity,
    display_name_template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<Tag>>,
    #[serde(skip)]
    edited: bool,
}

impl Node {
    /// Create an unflushed node
    pub fn new(display_name_template: impl Into<String>) -> Result<Self> {
        let template = display_name_template.into();
        DisplayTemplate::parse(&template)?;
        Ok(Self {
            identity: Identity::new(),
            display_name_template: template,
            tags: Some(Vec::new()),
            edited: false,
        })
    }

    pub(crate) fn from_row(identity: Identity, display_name_template: String) -> Self {
        Self {
            identity,
            display_name_template,
            tags: None,
            edited: false,
        }
    }

    pub fn is_flushed(&self) -> bool {
        self.identity.is_flushed()
    }

    pub fn display_name_template(&self) -> &str {
        &self.display_name_template
    }

    pub fn set_display_name_template(&mut self, template: impl Into<String>) -> Result<()> {
        let template = template.into();
        DisplayTemplate::parse(&template)?;
        self.display_name_template = template;
        Ok(())
    }

    /// Parsed display-name template
    pub fn template(&self) -> DisplayTemplate {
        // Validated on construction; rows that fail to parse render literally
        DisplayTemplate::parse(&self.display_name_template)
            .unwrap_or_else(|_| DisplayTemplate::literal(&self.display_name_template))
    }

    /// Tags if they have been fetched (or edited) already
    pub fn loaded_tags(&self) -> Option<&[Tag]> {
        self.tags.as_deref()
    }

    /// Linked tags, fetched from `library` on first access
    pub fn tags(&mut self, library: &Library) -> Result<&[Tag]> {
        if self.tags.is_none() {
            let fetched = if self.is_flushed() {
                library.node_tags(&self.identity)?
            } else {
                Vec::new()
            };
            self.tags = Some(fetched);
        }
        Ok(self.tags.as_deref().unwrap_or_default())
    }

    /// Drop the fetched tag list so the next access re-fetches
    ///
    /// Pending edits are discarded with it.
    pub fn invalidate_tags(&mut self) {
        if self.is_flushed() {
            self.tags = None;
            self.edited = false;
        }
    }

    /// Whether the tag list was changed since it was fetched
    pub fn tags_edited(&self) -> bool {
        self.edited
    }

    /// The list the library should treat as authoritative for this copy
    ///
    /// `None` means "ask the library": a flushed node whose list is absent
    /// or unedited.
    pub(crate) fn local_tags(&self) -> Option<&[Tag]> {
        if self.edited || !self.is_flushed() {
            Some(self.tags.as_deref().unwrap_or_default())
        } else {
            None
        }
    }

    /// Link a tag in memory
    ///
    /// Rejected when a tag with the same class and value is already linked.
    pub fn link(&mut self, library: &Library, tag: Tag) -> Result<()> {
        self.tags(library)?;
        let tags = self.tags.get_or_insert_with(Vec::new);
        if tags.iter().any(|t| t.same_content(&tag) || t.identity == tag.identity) {
            return Err(Error::library(format!(
                "node {} already has a '{}' tag with value '{}'",
                self.identity,
                tag.class().name(),
                tag.value()
            )));
        }
        tags.push(tag);
        self.edited = true;
        Ok(())
    }

    /// Unlink a tag in memory; returns whether anything was removed
    pub fn unlink(&mut self, library: &Library, tag: &Tag) -> Result<bool> {
        self.tags(library)?;
        let tags = self.tags.get_or_insert_with(Vec::new);
        let before = tags.len();
        tags.retain(|t| !(t.identity == tag.identity || (!t.is_flushed() && t.same_content(tag))));
        let removed = tags.len() != before;
        self.edited |= removed;
        Ok(removed)
    }

    pub(crate) fn set_loaded_tags(&mut self, tags: Option<Vec<Tag>>) {
        self.tags = tags;
    }

    pub(crate) fn loaded_tags_mut(&mut self) -> Option<&mut Vec<Tag>> {
        self.tags.as_mut()
    }
}

/// Equal when both refer to the same flushed node
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}
