//! Corpus seam - the deterministic reducer store
//!
//! The corpus owns the in-memory object graph. Dispatching a command
//! applies it and returns the story; reinitialize rewinds to an earlier
//! snapshot during rollback and reformation. Snapshots must be cheap to
//! clone (persistent structures or copy-on-write) because the ledger
//! keeps one per queued prophecy.

use crate::{Command, SibylResult, Story};

pub trait Corpus: Send + 'static {
    /// Immutable state snapshot. Equality is used by tests and by the
    /// adjacency invariant of the prophecy queue.
    type State: Clone + PartialEq + Send + Sync + 'static;

    /// Apply one command, returning the story of what changed.
    ///
    /// Must be deterministic: the same command against the same state
    /// yields the same story and post-state, which is what makes
    /// reformation replay sound.
    fn dispatch(&mut self, action: Command) -> SibylResult<Story>;

    /// Rewind to an earlier snapshot.
    fn reinitialize(&mut self, state: Self::State);

    /// Snapshot the current state.
    fn state(&self) -> Self::State;
}
