//! Explicit transactions
//!
//! A `Transaction` holds the library lock for its whole lifetime and owns
//! one savepoint frame. Library calls made while it is open (from the same
//! thread) nest inside it. Rolling back restores the cache snapshot taken
//! at `begin`, undoes the savepoint, and replaces every event queued since
//! the outermost frame opened with a single `LibraryReset`.

use std::cell::RefCell;
use std::ops::Deref;

use parking_lot::ReentrantMutexGuard;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::library::state::State;
use crate::library::Library;

pub struct Transaction<'a> {
    library: &'a Library,
    guard: ReentrantMutexGuard<'a, RefCell<State>>,
    depth: usize,
    finished: bool,
}

impl<'a> Transaction<'a> {
    pub(crate) fn begin(library: &'a Library) -> Result<Self> {
        let guard = library.state.lock();
        let depth = {
            let mut state = super::borrow(&guard)?;
            if state.dispatching {
                return Err(Error::library(
                    "cannot open a transaction from inside an event handler",
                ));
            }
            state.begin_frame(true)?
        };
        debug!(depth, "transaction started");
        Ok(Self {
            library,
            guard,
            depth,
            finished: false,
        })
    }

    /// Nesting level, 1 for the outermost transaction
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn commit(mut self) -> Result<()> {
        self.finish(true)
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finish(false)
    }

    fn finish(&mut self, commit: bool) -> Result<()> {
        self.finished = true;
        let result = {
            let mut state = super::borrow(&self.guard)?;
            // Inner transactions left open are undone with this one
            while state.depth() > self.depth {
                state.rollback_frame()?;
            }
            if state.depth() < self.depth {
                Err(Error::library("transaction already ended"))
            } else if commit {
                match state.commit_frame() {
                    Ok(()) => Ok(()),
                    Err(e) => state.rollback_frame().and(Err(e)),
                }
            } else {
                state.rollback_frame()
            }
        };
        debug!(depth = self.depth, commit, ok = result.is_ok(), "transaction finished");
        self.library.deliver(&self.guard);
        result
    }
}

impl Deref for Transaction<'_> {
    type Target = Library;

    fn deref(&self) -> &Library {
        self.library
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(depth = self.depth, "transaction dropped without commit, rolling back");
            if let Err(e) = self.finish(false) {
                warn!(error = %e, "rollback of dropped transaction failed");
            }
        }
    }
}
