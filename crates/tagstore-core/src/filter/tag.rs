//! Tag predicates
//!
//! Fragments are written against a `tags` row in scope (`tags.id`,
//! `tags.class_id`, `tags.value_type`, `tags.value`), so the same fragment
//! works for the top-level tag query and inside node subqueries.

use rusqlite::types::Value;

use crate::error::{Error, Result};
use crate::filter::{Atom, CompareOp, Filter, Fragment, MatchContext, TextMatch, Wildcard};
use crate::models::{Identity, Locator, Number, Tag, TagClass, TagValue, ValueType};

/// Leaf predicate over tags
#[derive(Debug, Clone)]
pub enum TagAtom {
    /// Class name, case-insensitive
    ClassName(String),
    ClassWildcard(Wildcard),
    /// Flushed class identity
    Class(Identity),
    Id(Identity),
    Text(TextMatch),
    Number(CompareOp, Number),
    Locator(Locator),
    /// Node-reference tags pointing at a flushed node
    NodeReference(Identity),
    ValueType(ValueType),
    /// No node links the tag
    Unused,
    /// Linked to a flushed node
    LinkedWith(Identity),
}

pub type TagFilter = Filter<TagAtom>;

impl Atom for TagAtom {
    type Entity = Tag;

    fn matches(&self, tag: &Tag, ctx: &dyn MatchContext) -> Result<bool> {
        let value = tag.value();
        Ok(match self {
            TagAtom::ClassName(name) => tag.class().name().eq_ignore_ascii_case(name),
            TagAtom::ClassWildcard(w) => w.matches(tag.class().name()),
            TagAtom::Class(class) => tag.class().identity == *class,
            TagAtom::Id(id) => tag.identity == *id,
            TagAtom::Text(m) => value.as_text().is_some_and(|text| m.matches(text)),
            TagAtom::Number(op, target) => value.as_number().is_some_and(|n| op.apply(&n, target)),
            TagAtom::Locator(target) => value.as_locator() == Some(target),
            TagAtom::NodeReference(node) => value.as_node_reference().is_some_and(|r| r == node),
            TagAtom::ValueType(t) => value.value_type() == *t,
            TagAtom::Unused => !ctx.tag_is_used(&tag.identity)?,
            TagAtom::LinkedWith(node) => ctx.is_linked(node, &tag.identity)?,
        })
    }

    fn to_sql(&self) -> Fragment {
        match self {
            TagAtom::ClassName(name) => Fragment::atom(
                "tags.class_id IN (SELECT tag_classes.id FROM tag_classes \
                 WHERE tag_classes.name = ? COLLATE NOCASE)",
                vec![Value::Text(name.clone())],
            ),
            TagAtom::ClassWildcard(w) => Fragment::atom(
                "tags.class_id IN (SELECT tag_classes.id FROM tag_classes \
                 WHERE tag_classes.name LIKE ? ESCAPE '\\')",
                vec![Value::Text(w.to_like())],
            ),
            TagAtom::Class(class) => {
                Fragment::atom("tags.class_id = ?", vec![Value::Integer(class.id())])
            }
            TagAtom::Id(id) => Fragment::atom("tags.id = ?", vec![Value::Integer(id.id())]),
            TagAtom::Text(m) => {
                let (cmp, param) = m.sql("tags.value");
                typed(ValueType::Text, &cmp, param)
            }
            TagAtom::Number(op, n) => typed(
                ValueType::Number,
                &format!("tags.value {} ?", op.sql()),
                number_param(*n),
            ),
            TagAtom::Locator(l) => typed(
                ValueType::Locator,
                "tags.value = ?",
                Value::Text(l.as_str().to_string()),
            ),
            TagAtom::NodeReference(node) => typed(
                ValueType::NodeReference,
                "tags.value = ?",
                Value::Integer(node.id()),
            ),
            TagAtom::ValueType(t) => {
                Fragment::atom("tags.value_type = ?", vec![Value::Integer(t.code())])
            }
            TagAtom::Unused => Fragment::atom(
                "NOT EXISTS (SELECT 1 FROM links AS ul WHERE ul.tag_id = tags.id)",
                Vec::new(),
            ),
            TagAtom::LinkedWith(node) => Fragment::atom(
                "EXISTS (SELECT 1 FROM links AS wl WHERE wl.tag_id = tags.id AND wl.node_id = ?)",
                vec![Value::Integer(node.id())],
            ),
        }
    }
}

/// Value comparison guarded by the stored value type
fn typed(value_type: ValueType, cmp: &str, param: Value) -> Fragment {
    Fragment::atom(
        format!("tags.value_type = {} AND {}", value_type.code(), cmp),
        vec![param],
    )
}

fn number_param(n: Number) -> Value {
    match n {
        Number::Int(i) => Value::Integer(i),
        Number::Real(r) => Value::Real(r),
    }
}

impl Filter<TagAtom> {
    /// Tags whose class has this name (case-insensitive)
    pub fn class_name(name: &str) -> Self {
        Self::atom(TagAtom::ClassName(name.to_string()))
    }

    /// Tags whose class name matches a wildcard pattern
    pub fn class_wildcard(pattern: &str) -> Self {
        Self::atom(TagAtom::ClassWildcard(Wildcard::new(pattern)))
    }

    /// Tags of a class; an unflushed class has no tags
    pub fn class(class: &TagClass) -> Self {
        Self::class_identity(class.identity)
    }

    pub fn class_identity(class: Identity) -> Self {
        if class.is_flushed() {
            Self::atom(TagAtom::Class(class))
        } else {
            Self::block()
        }
    }

    pub fn id(id: Identity) -> Self {
        if id.is_flushed() {
            Self::atom(TagAtom::Id(id))
        } else {
            Self::block()
        }
    }

    /// Text tags equal to `text`, ignoring case
    pub fn text(text: &str) -> Self {
        Self::atom(TagAtom::Text(TextMatch::Exact(text.to_string())))
    }

    /// Text tags matching a wildcard pattern
    pub fn text_wildcard(pattern: &str) -> Self {
        Self::atom(TagAtom::Text(TextMatch::Pattern(Wildcard::new(pattern))))
    }

    /// Number tags compared with `op` (`=`, `!=`, `>`, `<`, `>=`, `<=`)
    pub fn number(op: &str, value: impl Into<Number>) -> Result<Self> {
        Self::number_cmp(CompareOp::parse(op)?, value.into())
    }

    pub fn number_cmp(op: CompareOp, value: Number) -> Result<Self> {
        if let Number::Real(r) = value {
            if !r.is_finite() {
                return Err(Error::invalid_filter(format!(
                    "cannot compare against non-finite number {}",
                    r
                )));
            }
        }
        Ok(Self::atom(TagAtom::Number(op, value)))
    }

    pub fn locator(locator: &Locator) -> Self {
        Self::atom(TagAtom::Locator(locator.clone()))
    }

    /// Node-reference tags pointing at `node`
    pub fn node_reference(node: Identity) -> Self {
        if node.is_flushed() {
            Self::atom(TagAtom::NodeReference(node))
        } else {
            Self::block()
        }
    }

    pub fn value_type(value_type: ValueType) -> Self {
        Self::atom(TagAtom::ValueType(value_type))
    }

    /// Tags equal to an arbitrary value
    ///
    /// `None` values never compare equal and are rejected.
    pub fn value(value: &TagValue) -> Result<Self> {
        match value {
            TagValue::None => Err(Error::invalid_filter("cannot filter by a None value")),
            TagValue::Text(s) => Ok(Self::text(s)),
            TagValue::Number(n) => Self::number_cmp(CompareOp::Eq, *n),
            TagValue::Locator(l) => Ok(Self::locator(l)),
            TagValue::NodeReference(id) => Ok(Self::node_reference(*id)),
        }
    }

    /// Tags no node links
    pub fn unused() -> Self {
        Self::atom(TagAtom::Unused)
    }

    /// Tags linked to `node`
    pub fn linked_with(node: Identity) -> Self {
        if node.is_flushed() {
            Self::atom(TagAtom::LinkedWith(node))
        } else {
            Self::block()
        }
    }
}
