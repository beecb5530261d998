//! Error handling
//!
//! A single typed error for every library operation. The variants follow the
//! taxonomy callers care about:
//!
//! - `InvalidArgument` / `InvalidFilterArgument`: the call itself was malformed
//! - `Library`: a business rule was violated (the transaction is rolled back)
//! - `Resolution`: a locator could not be resolved to a concrete resource
//! - `Database` / `Io`: the backing store failed

use std::io;
use thiserror::Error;

/// Errors that can occur during library operations
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed identifier, wrong value type for a class, bad template
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Filter atom constructed with an unsupported operator or value
    #[error("Invalid filter argument: {0}")]
    InvalidFilterArgument(String),

    /// Business-rule violation (duplicate class, live dependents, immutable field)
    #[error("Library error: {0}")]
    Library(String),

    /// A locator could not be resolved
    #[error("Cannot resolve '{locator}': {reason}")]
    Resolution { locator: String, reason: String },

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn invalid_filter(msg: impl Into<String>) -> Self {
        Error::InvalidFilterArgument(msg.into())
    }

    pub(crate) fn library(msg: impl Into<String>) -> Self {
        Error::Library(msg.into())
    }

    /// True for business-rule violations
    pub fn is_library_error(&self) -> bool {
        matches!(self, Error::Library(_))
    }

    /// True when the caller passed something malformed
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Error::InvalidArgument(_) | Error::InvalidFilterArgument(_)
        )
    }

    /// Check if retrying with different input can succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::InvalidArgument(_)
                | Error::InvalidFilterArgument(_)
                | Error::Library(_)
                | Error::Resolution { .. }
        )
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Library(_) => {
                Some("Check for dependent tags or links; pass cascade to remove them as well.")
            }
            Error::Resolution { .. } => {
                Some("Attach a storage directory (storage_dir) so managed locators can resolve.")
            }
            Error::InvalidFilterArgument(_) => {
                Some("Use one of the supported operators: =, !=, >, <, >=, <=.")
            }
            _ => None,
        }
    }
}

/// Result type for library operations
pub type Result<T> = std::result::Result<T, Error>;
