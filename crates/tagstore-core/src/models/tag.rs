//! Tags: typed values instantiated from a tag class

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{Identity, TagClass, TagValue};

/// A typed metadata value
///
/// The class is held as a copy; the library refreshes it from its class
/// cache on every read, so renames are seen through the class identity.
#[derive(Debug, Clone, Serialize)]
pub struct Tag {
    pub identity: Identity,
    class: TagClass,
    value: TagValue,
}

impl Tag {
    /// Create an unflushed tag
    ///
    /// The value must have the class's value type.
    pub fn new(class: &TagClass, value: TagValue) -> Result<Self> {
        check_type(class, &value)?;
        Ok(Self {
            identity: Identity::new(),
            class: class.clone(),
            value,
        })
    }

    pub(crate) fn from_row(identity: Identity, class: TagClass, value: TagValue) -> Self {
        Self {
            identity,
            class,
            value,
        }
    }

    pub fn class(&self) -> &TagClass {
        &self.class
    }

    pub fn value(&self) -> &TagValue {
        &self.value
    }

    pub fn is_flushed(&self) -> bool {
        self.identity.is_flushed()
    }

    /// Replace the value (takes effect on flush)
    pub fn set_value(&mut self, value: TagValue) -> Result<()> {
        check_type(&self.class, &value)?;
        self.value = value;
        Ok(())
    }

    pub(crate) fn set_class(&mut self, class: TagClass) {
        self.class = class;
    }

    /// Same class and equal value, identity ignored
    pub fn same_content(&self, other: &Tag) -> bool {
        same_class(&self.class, &other.class) && self.value == other.value
    }
}

/// Both unflushed or the same identity, plus same class and value
impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        let identity_ok =
            (!self.is_flushed() && !other.is_flushed()) || self.identity == other.identity;
        identity_ok && self.same_content(other)
    }
}

fn same_class(a: &TagClass, b: &TagClass) -> bool {
    if a.is_flushed() && b.is_flushed() {
        a.identity == b.identity
    } else {
        a.key() == b.key() && a.value_type() == b.value_type()
    }
}

fn check_type(class: &TagClass, value: &TagValue) -> Result<()> {
    if value.value_type() != class.value_type() {
        return Err(Error::invalid(format!(
            "tag class '{}' holds {} values, got {}",
            class.name(),
            class.value_type(),
            value.value_type()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LibraryId, ValueType};

    fn author() -> TagClass {
        TagClass::new("author", ValueType::Text).unwrap()
    }

    #[test]
    fn test_wrong_value_type_rejected() {
        let err = Tag::new(&author(), TagValue::number(3)).unwrap_err();
        assert!(err.is_invalid_argument());

        let mut tag = Tag::new(&author(), TagValue::text("Lewis")).unwrap();
        assert!(tag.set_value(TagValue::number(1)).is_err());
        tag.set_value(TagValue::text("Carrol")).unwrap();
        assert_eq!(tag.value().as_text(), Some("Carrol"));
    }

    #[test]
    fn test_unflushed_tags_compare_by_content() {
        let a = Tag::new(&author(), TagValue::text("Lewis Carrol")).unwrap();
        let b = Tag::new(&author(), TagValue::text("lewis carrol")).unwrap();
        let c = Tag::new(&author(), TagValue::text("Tolkien")).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_flushed_tags_with_different_identities_differ() {
        let lib = LibraryId::next();
        let mut a = Tag::new(&author(), TagValue::text("x")).unwrap();
        let mut b = a.clone();
        a.identity = Identity::flushed(lib, 1);
        b.identity = Identity::flushed(lib, 2);
        assert_ne!(a, b);
        assert!(a.same_content(&b));

        b.identity = Identity::flushed(lib, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn test_none_valued_tags_never_equal() {
        let flag = TagClass::new("flag", ValueType::None).unwrap();
        let a = Tag::new(&flag, TagValue::None).unwrap();
        let b = Tag::new(&flag, TagValue::None).unwrap();
        assert_ne!(a, b);
    }
}
