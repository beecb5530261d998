//! Entity identity
//!
//! An `Identity` pairs the library an entity lives in with its row id.
//! Ids `<= 0` mean the entity has not been flushed yet. Unflushed identities
//! have no stable identity at all, so they never compare equal, not even to a
//! copy of themselves. That makes `Identity` `PartialEq` but deliberately not
//! `Eq` (the same way `f64` treats NaN).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Serialize, Serializer};

static NEXT_LIBRARY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique handle of an open library
///
/// Carries no ownership; it only lets identities from different libraries
/// be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LibraryId(u64);

impl LibraryId {
    pub(crate) fn next() -> Self {
        Self(NEXT_LIBRARY_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

/// (library, id) pair identifying a persisted entity
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity {
    library: Option<LibraryId>,
    id: i64,
}

impl Identity {
    /// An unflushed identity
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of a row in `library`
    ///
    /// `id <= 0` still yields an unflushed identity.
    pub fn flushed(library: LibraryId, id: i64) -> Self {
        Self {
            library: Some(library),
            id,
        }
    }

    pub fn is_flushed(&self) -> bool {
        self.library.is_some() && self.id > 0
    }

    /// Row id, `<= 0` when unflushed
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn library(&self) -> Option<LibraryId> {
        self.library
    }

    /// Row id when flushed into `library`
    pub fn id_in(&self, library: LibraryId) -> Option<i64> {
        (self.is_flushed() && self.library == Some(library)).then_some(self.id)
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.is_flushed()
            && other.is_flushed()
            && self.library == other.library
            && self.id == other.id
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_flushed() {
            write!(f, "#{}", self.id)
        } else {
            write!(f, "#unflushed")
        }
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_flushed() {
            serializer.serialize_i64(self.id)
        } else {
            serializer.serialize_none()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unflushed_never_equal() {
        let a = Identity::new();
        let b = a;
        assert_ne!(a, b);
        assert_ne!(Identity::new(), Identity::new());
        #[allow(clippy::eq_op)]
        let reflexive = a == a;
        assert!(!reflexive);
    }

    #[test]
    fn test_flushed_equality() {
        let lib = LibraryId::next();
        assert_eq!(Identity::flushed(lib, 5), Identity::flushed(lib, 5));
        assert_ne!(Identity::flushed(lib, 5), Identity::flushed(lib, 6));
    }

    #[test]
    fn test_different_libraries_differ() {
        let a = LibraryId::next();
        let b = LibraryId::next();
        assert_ne!(a, b);
        assert_ne!(Identity::flushed(a, 1), Identity::flushed(b, 1));
    }

    #[test]
    fn test_non_positive_id_is_unflushed() {
        let lib = LibraryId::next();
        let zero = Identity::flushed(lib, 0);
        assert!(!zero.is_flushed());
        assert_ne!(zero, Identity::flushed(lib, 0));
        assert_eq!(zero.id_in(lib), None);
        assert_eq!(Identity::flushed(lib, 3).id_in(lib), Some(3));
    }

    #[test]
    fn test_serialize() {
        let lib = LibraryId::next();
        assert_eq!(serde_json::to_string(&Identity::flushed(lib, 7)).unwrap(), "7");
        assert_eq!(serde_json::to_string(&Identity::new()).unwrap(), "null");
    }
}
