//! Node command handlers

use anyhow::{anyhow, bail, Context, Result};

use tagstore_core::{Library, Node, NodeFilter, Tag, TagFilter};

use super::{find_class, node_view, parse_assignment, parse_id, parse_value};
use crate::output::Output;

fn load(library: &Library, id: &str) -> Result<Node> {
    let identity = parse_id(library, id)?;
    library
        .node(&identity)?
        .ok_or_else(|| anyhow!("Node not found: {}", id))
}

/// Unflushed tag for `class=value`
fn tag_for(library: &Library, assignment: &str) -> Result<Tag> {
    let (class, value) = parse_assignment(assignment)?;
    let class = find_class(library, class)?;
    let value = parse_value(library, &class, value)?;
    Ok(Tag::new(&class, value)?)
}

/// Create a node with its tags in one transaction
pub fn add(library: &Library, template: String, tags: Vec<String>, output: &Output) -> Result<()> {
    let node = library.transaction(|lib| -> Result<Node> {
        let mut node = Node::new(template)?;
        for assignment in &tags {
            node.link(lib, tag_for(lib, assignment)?)?;
        }
        lib.flush_node(&mut node).context("Failed to create node")?;
        Ok(node)
    })?;
    output.print_node(&node_view(library, &node)?);
    Ok(())
}

/// List nodes matching all given conditions
///
/// `tags` are `class=pattern` pairs; the pattern accepts `*` and `?`.
pub fn list(
    library: &Library,
    name: Option<String>,
    tags: Vec<String>,
    untagged: bool,
    output: &Output,
) -> Result<()> {
    let mut filter = NodeFilter::all();
    if let Some(name) = name {
        filter = filter.and(NodeFilter::display_name_wildcard(&name));
    }
    for assignment in &tags {
        let (class, pattern) = parse_assignment(assignment)?;
        filter = filter.and(NodeFilter::has_tag(
            TagFilter::class_name(class).and(TagFilter::text_wildcard(pattern)),
        ));
    }
    if untagged {
        filter = filter.and(NodeFilter::no_tags());
    }

    let views = library
        .nodes(&filter)?
        .iter()
        .map(|node| node_view(library, node))
        .collect::<Result<Vec<_>>>()?;
    output.print_nodes(&views);
    Ok(())
}

/// Show one node
pub fn show(library: &Library, id: String, output: &Output) -> Result<()> {
    let node = load(library, &id)?;
    output.print_node(&node_view(library, &node)?);
    Ok(())
}

/// Remove a node; `cascade` also removes tags referencing it
pub fn remove(library: &Library, id: String, cascade: bool, output: &Output) -> Result<()> {
    let mut node = load(library, &id)?;
    let identity = node.identity;
    library
        .remove_node(&mut node, cascade)
        .with_context(|| format!("Failed to remove node {}", id))?;
    output.success(&format!("Removed node {}", identity));
    Ok(())
}

/// Link `class=value` to a node, creating the tag if needed
pub fn link(library: &Library, id: String, assignment: String, output: &Output) -> Result<()> {
    let node = load(library, &id)?;
    let tag = tag_for(library, &assignment)?;
    let tag = library.create_tag(tag.class(), tag.value().clone())?;
    if !library.create_link(&node, &tag)? {
        bail!("Node {} already has {}", node.identity, assignment);
    }
    output.success(&format!("Linked {} to {}", assignment, node.identity));
    Ok(())
}

/// Unlink `class=value` from a node
pub fn unlink(library: &Library, id: String, assignment: String, output: &Output) -> Result<()> {
    let node = load(library, &id)?;
    let wanted = tag_for(library, &assignment)?;
    let tag = library
        .node_tags(&node.identity)?
        .into_iter()
        .find(|t| t.same_content(&wanted))
        .ok_or_else(|| anyhow!("Node {} has no {}", node.identity, assignment))?;
    library.remove_link(&node, &tag)?;
    output.success(&format!("Unlinked {} from {}", assignment, node.identity));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use tagstore_core::{TagClass, ValueType};

    fn setup() -> (Library, Output) {
        let library = Library::open_in_memory().unwrap();
        library
            .create_tag_class(&TagClass::new("author", ValueType::Text).unwrap())
            .unwrap();
        (library, Output::new(OutputFormat::Quiet))
    }

    #[test]
    fn test_add_with_tags_and_show() {
        let (library, output) = setup();
        add(
            &library,
            "{author}".into(),
            vec!["author=Lewis Carrol".into()],
            &output,
        )
        .unwrap();

        let node = library.nodes(&NodeFilter::all()).unwrap().remove(0);
        let view = node_view(&library, &node).unwrap();
        assert_eq!(view.display_name, "Lewis Carrol");
        assert_eq!(view.tags.len(), 1);
        show(&library, view.id.to_string(), &output).unwrap();
    }

    #[test]
    fn test_failed_add_leaves_nothing_behind() {
        let (library, output) = setup();
        let err = add(
            &library,
            "{author}".into(),
            vec!["author=Lewis".into(), "genre=fantasy".into()],
            &output,
        );
        assert!(err.is_err());
        assert_eq!(library.node_count(&NodeFilter::all()).unwrap(), 0);
        assert_eq!(library.tag_count(&TagFilter::all()).unwrap(), 0);
    }

    #[test]
    fn test_link_unlink_remove() {
        let (library, output) = setup();
        let node = library.create_node("book").unwrap();
        let id = node.identity.id().to_string();

        link(&library, id.clone(), "author=Peake".into(), &output).unwrap();
        assert!(link(&library, id.clone(), "author=peake".into(), &output).is_err());
        assert_eq!(library.node_tags(&node.identity).unwrap().len(), 1);

        unlink(&library, id.clone(), "author=PEAKE".into(), &output).unwrap();
        assert!(library.node_tags(&node.identity).unwrap().is_empty());
        assert!(unlink(&library, id.clone(), "author=Peake".into(), &output).is_err());

        remove(&library, id.clone(), false, &output).unwrap();
        assert!(show(&library, id, &output).is_err());
    }
}
