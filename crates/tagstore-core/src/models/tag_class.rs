//! Tag classes: the typed schema of tag values

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{Identity, ValueType};

/// Named, typed schema entry
///
/// Names are unique case-insensitively. The value type is fixed once the
/// class is flushed; `name` and `hidden` may change through
/// `Library::flush_tag_class`.
#[derive(Debug, Clone, Serialize)]
pub struct TagClass {
    pub identity: Identity,
    name: String,
    value_type: ValueType,
    pub hidden: bool,
}

impl TagClass {
    /// Create an unflushed class
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            identity: Identity::new(),
            name,
            value_type,
            hidden: false,
        })
    }

    pub(crate) fn from_row(
        identity: Identity,
        name: String,
        value_type: ValueType,
        hidden: bool,
    ) -> Self {
        Self {
            identity,
            name,
            value_type,
            hidden,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Case-folded name used as the cache key
    pub fn key(&self) -> String {
        fold(&self.name)
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn is_flushed(&self) -> bool {
        self.identity.is_flushed()
    }

    /// Rename (takes effect on flush)
    pub fn set_name(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        validate_name(&name)?;
        self.name = name;
        Ok(())
    }

    /// Change the value type
    ///
    /// Allowed on the in-memory copy; flushing a changed type of a flushed
    /// class is rejected by the library.
    pub fn set_value_type(&mut self, value_type: ValueType) {
        self.value_type = value_type;
    }

    /// Same name (ignoring case) and same schema
    pub fn same_schema(&self, other: &TagClass) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.value_type == other.value_type
            && self.hidden == other.hidden
    }
}

/// Equal when both refer to the same flushed class
impl PartialEq for TagClass {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

/// Case folding shared by the cache keys and the SQLite NOCASE collation
pub(crate) fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::invalid("tag class name cannot be empty"));
    }
    if name.contains(['{', '}', '.']) {
        return Err(Error::invalid(format!(
            "tag class name '{}' cannot contain '{{', '}}' or '.'",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_class_is_unflushed() {
        let class = TagClass::new("author", ValueType::Text).unwrap();
        assert!(!class.is_flushed());
        assert_eq!(class.name(), "author");
        assert_eq!(class.value_type(), ValueType::Text);
        assert!(!class.hidden);
        assert_ne!(class, class.clone());
    }

    #[test]
    fn test_invalid_names() {
        assert!(TagClass::new("", ValueType::Text).is_err());
        assert!(TagClass::new("   ", ValueType::Text).is_err());
        assert!(TagClass::new("a.b", ValueType::Text).is_err());
        assert!(TagClass::new("{x}", ValueType::Text).is_err());
    }

    #[test]
    fn test_same_schema_ignores_case() {
        let a = TagClass::new("Author", ValueType::Text).unwrap();
        let b = TagClass::new("author", ValueType::Text).unwrap();
        let c = TagClass::new("author", ValueType::Number).unwrap();
        assert!(a.same_schema(&b));
        assert!(!a.same_schema(&c));
        assert_eq!(a.key(), "author");
    }
}
