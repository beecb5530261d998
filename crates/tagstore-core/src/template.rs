//! Display-name templates
//!
//! A node's display name is a format string over tag values:
//!
//! - `{author}`: values of the node's `author` tags, joined by `, `
//! - `{series.title}`: follow the node's `series` node-reference tags, then
//!   take the referenced nodes' `title` values
//! - `{{` and `}}`: literal braces
//!
//! Paths are finite, so rendering terminates even when references form a
//! cycle. The library uses `depends_on` / `traverses` to work out which nodes
//! a tag change can affect.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Field(Vec<String>),
}

/// Parsed display-name template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayTemplate {
    parts: Vec<Part>,
}

impl DisplayTemplate {
    pub fn parse(source: &str) -> Result<Self> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut field = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        field.push(c);
                    }
                    if !closed {
                        return Err(Error::invalid(format!(
                            "unterminated placeholder in template '{}'",
                            source
                        )));
                    }
                    let path: Vec<String> =
                        field.split('.').map(|s| s.trim().to_string()).collect();
                    if path.iter().any(|s| s.is_empty() || s.contains('{')) {
                        return Err(Error::invalid(format!(
                            "invalid placeholder '{{{}}}' in template '{}'",
                            field, source
                        )));
                    }
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(Part::Field(path));
                }
                '}' => {
                    return Err(Error::invalid(format!(
                        "unmatched '}}' in template '{}'",
                        source
                    )));
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }
        Ok(Self { parts })
    }

    /// A template with no placeholders
    pub fn literal(text: &str) -> Self {
        Self {
            parts: vec![Part::Literal(text.to_string())],
        }
    }

    /// Placeholder paths in order of appearance
    pub fn fields(&self) -> impl Iterator<Item = &[String]> {
        self.parts.iter().filter_map(|p| match p {
            Part::Field(path) => Some(path.as_slice()),
            Part::Literal(_) => None,
        })
    }

    pub fn has_fields(&self) -> bool {
        self.fields().next().is_some()
    }

    /// True if any placeholder mentions `class_name` at any depth
    pub fn depends_on(&self, class_name: &str) -> bool {
        self.fields()
            .any(|path| path.iter().any(|s| s.eq_ignore_ascii_case(class_name)))
    }

    /// True if some placeholder follows `class_name` references into other nodes
    pub fn traverses(&self, class_name: &str) -> bool {
        self.fields().any(|path| {
            path[..path.len().saturating_sub(1)]
                .iter()
                .any(|s| s.eq_ignore_ascii_case(class_name))
        })
    }

    /// Render, resolving each placeholder path to its values
    pub fn render<F>(&self, mut resolve: F) -> Result<String>
    where
        F: FnMut(&[String]) -> Result<Vec<String>>,
    {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Field(path) => out.push_str(&resolve(path)?.join(", ")),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fields_and_literals() {
        let t = DisplayTemplate::parse("{title} by {author}").unwrap();
        let fields: Vec<_> = t.fields().collect();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0], ["title".to_string()]);
        assert_eq!(fields[1], ["author".to_string()]);
    }

    #[test]
    fn test_escaped_braces() {
        let t = DisplayTemplate::parse("{{literal}} {x}").unwrap();
        let rendered = t.render(|_| Ok(vec!["v".to_string()])).unwrap();
        assert_eq!(rendered, "{literal} v");
    }

    #[test]
    fn test_invalid_templates() {
        assert!(DisplayTemplate::parse("{open").is_err());
        assert!(DisplayTemplate::parse("close}").is_err());
        assert!(DisplayTemplate::parse("{}").is_err());
        assert!(DisplayTemplate::parse("{a..b}").is_err());
    }

    #[test]
    fn test_dependencies() {
        let t = DisplayTemplate::parse("{series.title} #{number}").unwrap();
        assert!(t.depends_on("Series"));
        assert!(t.depends_on("title"));
        assert!(t.depends_on("number"));
        assert!(!t.depends_on("author"));

        assert!(t.traverses("series"));
        assert!(!t.traverses("title"));
        assert!(!t.traverses("number"));
    }

    #[test]
    fn test_render_joins_multiple_values() {
        let t = DisplayTemplate::parse("{author}").unwrap();
        let rendered = t
            .render(|_| Ok(vec!["Alice".to_string(), "Bob".to_string()]))
            .unwrap();
        assert_eq!(rendered, "Alice, Bob");
    }

    #[test]
    fn test_literal_template() {
        let t = DisplayTemplate::literal("{not parsed}");
        assert!(!t.has_fields());
        assert_eq!(t.render(|_| Ok(vec![])).unwrap(), "{not parsed}");
    }
}
