//! Command handlers and the argument parsing they share

pub mod class;
pub mod config;
pub mod meta;
pub mod node;
pub mod tag;

use anyhow::{anyhow, bail, Context, Result};

use tagstore_core::{Identity, Library, Locator, Node, Number, TagClass, TagValue, ValueType};

use crate::output::NodeView;

/// Parse `5` or `#5` into an identity of `library`
pub fn parse_id(library: &Library, raw: &str) -> Result<Identity> {
    let digits = raw.trim().trim_start_matches('#');
    let id: i64 = digits
        .parse()
        .with_context(|| format!("Invalid id: '{}'", raw))?;
    if id <= 0 {
        bail!("Invalid id: '{}'", raw);
    }
    Ok(Identity::flushed(library.id(), id))
}

/// Split `class=value`
pub fn parse_assignment(raw: &str) -> Result<(&str, &str)> {
    raw.split_once('=')
        .map(|(class, value)| (class.trim(), value.trim()))
        .filter(|(class, _)| !class.is_empty())
        .ok_or_else(|| anyhow!("Expected CLASS=VALUE, got '{}'", raw))
}

/// Existing class by name
pub fn find_class(library: &Library, name: &str) -> Result<TagClass> {
    library
        .tag_class(name)?
        .ok_or_else(|| anyhow!("Tag class not found: {}", name))
}

/// Interpret command-line text as a value of `class`
pub fn parse_value(library: &Library, class: &TagClass, raw: &str) -> Result<TagValue> {
    Ok(match class.value_type() {
        ValueType::None => TagValue::None,
        ValueType::Text => TagValue::text(raw),
        ValueType::Number => TagValue::Number(
            Number::parse(raw).ok_or_else(|| anyhow!("Not a number: '{}'", raw))?,
        ),
        ValueType::Locator => TagValue::Locator(Locator::parse(raw)?),
        ValueType::NodeReference => TagValue::NodeReference(parse_id(library, raw)?),
    })
}

/// Rendered node with its tags
pub fn node_view(library: &Library, node: &Node) -> Result<NodeView> {
    Ok(NodeView {
        id: node.identity.id(),
        display_name: library.display_name(node)?,
        template: node.display_name_template().to_string(),
        tags: library.node_tags(&node.identity)?,
    })
}
