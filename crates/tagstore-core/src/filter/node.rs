//! Node predicates

use rusqlite::types::Value;

use crate::error::Result;
use crate::filter::{Atom, Filter, Fragment, MatchContext, TagFilter, TextMatch, Wildcard};
use crate::models::{Identity, Node, Tag};

/// Leaf predicate over nodes
#[derive(Debug, Clone)]
pub enum NodeAtom {
    /// Display-name template text
    DisplayName(TextMatch),
    Id(Identity),
    /// At least one linked tag passes the filter (its paging is ignored)
    HasTag(Box<TagFilter>),
    NoTags,
}

pub type NodeFilter = Filter<NodeAtom>;

/// Tags to evaluate a node against: pending edits, else the stored links
fn linked_tags(node: &Node, ctx: &dyn MatchContext) -> Result<Vec<Tag>> {
    match node.local_tags() {
        Some(tags) => Ok(tags.to_vec()),
        None => ctx.node_tags(&node.identity),
    }
}

impl Atom for NodeAtom {
    type Entity = Node;

    fn matches(&self, node: &Node, ctx: &dyn MatchContext) -> Result<bool> {
        match self {
            NodeAtom::DisplayName(m) => Ok(m.matches(node.display_name_template())),
            NodeAtom::Id(id) => Ok(node.identity == *id),
            NodeAtom::HasTag(filter) => {
                for tag in linked_tags(node, ctx)? {
                    if filter.matches(&tag, ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            NodeAtom::NoTags => Ok(linked_tags(node, ctx)?.is_empty()),
        }
    }

    fn to_sql(&self) -> Fragment {
        match self {
            NodeAtom::DisplayName(m) => {
                let (cmp, param) = m.sql("nodes.display_name");
                Fragment::atom(cmp, vec![param])
            }
            NodeAtom::Id(id) => Fragment::atom("nodes.id = ?", vec![Value::Integer(id.id())]),
            NodeAtom::HasTag(filter) => {
                let inner = filter.to_sql();
                Fragment::atom(
                    format!(
                        "EXISTS (SELECT 1 FROM links AS hl JOIN tags ON tags.id = hl.tag_id \
                         WHERE hl.node_id = nodes.id AND ({}))",
                        inner.sql()
                    ),
                    inner.params().to_vec(),
                )
            }
            NodeAtom::NoTags => Fragment::atom(
                "NOT EXISTS (SELECT 1 FROM links AS nl WHERE nl.node_id = nodes.id)",
                Vec::new(),
            ),
        }
    }
}

impl Filter<NodeAtom> {
    /// Nodes whose display-name template equals `name`, ignoring case
    pub fn display_name(name: &str) -> Self {
        Self::atom(NodeAtom::DisplayName(TextMatch::Exact(name.to_string())))
    }

    pub fn display_name_wildcard(pattern: &str) -> Self {
        Self::atom(NodeAtom::DisplayName(TextMatch::Pattern(Wildcard::new(
            pattern,
        ))))
    }

    pub fn id(id: Identity) -> Self {
        if id.is_flushed() {
            Self::atom(NodeAtom::Id(id))
        } else {
            Self::block()
        }
    }

    /// Nodes with at least one tag passing `filter`
    pub fn has_tag(filter: TagFilter) -> Self {
        Self::atom(NodeAtom::HasTag(Box::new(filter)))
    }

    pub fn no_tags() -> Self {
        Self::atom(NodeAtom::NoTags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::Library;
    use crate::models::{TagClass, TagValue, ValueType};

    fn agree(library: &Library, nodes: &[Node], filter: &NodeFilter) -> Vec<i64> {
        let mut by_sql: Vec<i64> = library
            .nodes(filter)
            .unwrap()
            .iter()
            .map(|n| n.identity.id())
            .collect();
        by_sql.sort();
        let by_memory: Vec<i64> = nodes
            .iter()
            .filter(|n| filter.matches(n, library).unwrap())
            .map(|n| n.identity.id())
            .collect();
        assert_eq!(by_sql, by_memory, "disagreement on {:?}", filter);
        by_sql
    }

    #[test]
    fn test_node_atoms_agree() {
        let library = Library::open_in_memory().unwrap();
        let author = library
            .create_tag_class(&TagClass::new("author", ValueType::Text).unwrap())
            .unwrap();
        let lewis = library
            .create_tag(&author, TagValue::text("Lewis Carrol"))
            .unwrap();
        let tolkien = library.create_tag(&author, TagValue::text("Tolkien")).unwrap();

        let alice = library.create_node("Alice in Wonderland").unwrap();
        let hobbit = library.create_node("The Hobbit").unwrap();
        let empty = library.create_node("{author}").unwrap();
        library.create_link(&alice, &lewis).unwrap();
        library.create_link(&hobbit, &tolkien).unwrap();

        let nodes = library.nodes(&NodeFilter::all()).unwrap();
        assert_eq!(nodes.len(), 3);

        assert_eq!(
            agree(&library, &nodes, &NodeFilter::has_tag(TagFilter::text("lewis carrol"))),
            vec![alice.identity.id()]
        );
        assert_eq!(
            agree(&library, &nodes, &NodeFilter::no_tags()),
            vec![empty.identity.id()]
        );
        assert_eq!(
            agree(&library, &nodes, &NodeFilter::display_name_wildcard("the *")),
            vec![hobbit.identity.id()]
        );
        assert_eq!(
            agree(&library, &nodes, &NodeFilter::display_name("{AUTHOR}")),
            vec![empty.identity.id()]
        );
        assert_eq!(
            agree(
                &library,
                &nodes,
                &NodeFilter::has_tag(TagFilter::class_name("author")).negate()
            ),
            vec![empty.identity.id()]
        );
        assert_eq!(
            agree(
                &library,
                &nodes,
                &NodeFilter::has_tag(TagFilter::class_name("author").and(TagFilter::unused()))
            ),
            Vec::<i64>::new()
        );
        assert_eq!(
            agree(&library, &nodes, &NodeFilter::id(hobbit.identity)),
            vec![hobbit.identity.id()]
        );
        assert!(agree(&library, &nodes, &NodeFilter::id(Identity::new())).is_empty());
    }

    #[test]
    fn test_edited_tags_take_precedence() {
        let library = Library::open_in_memory().unwrap();
        let author = TagClass::new("author", ValueType::Text).unwrap();
        let mut node = Node::new("draft").unwrap();
        node.link(&library, Tag::new(&author, TagValue::text("Lewis")).unwrap())
            .unwrap();

        let filter = NodeFilter::has_tag(TagFilter::class_name("author"));
        assert!(filter.matches(&node, &library).unwrap());
        assert!(!NodeFilter::no_tags().matches(&node, &library).unwrap());
    }
}
