//! Follower seam - downstream consumers of prophecies and truths
//!
//! Followers are the reactive binding layer: they see every optimistic
//! prophecy synchronously at claim time, later learn which became
//! truths, and are told when a prophecy turned out heretical. Broadcast
//! order is follower registration order.

use crate::{BoxFuture, SibylResult, Story};

/// Read-only view of one prophecy handed to followers
pub struct ProphecyView<'a, S> {
    pub story: &'a Story,
    /// Graph state after this prophecy's command was applied
    pub state: &'a S,
    pub is_truth: bool,
}

pub trait Follower<S>: Send + Sync {
    /// A new prophecy has been optimistically applied. Returned futures
    /// are the follower's asynchronous reactions; the claim handle
    /// aggregates them for the caller to await.
    fn reveal_prophecy(&self, prophecy: &ProphecyView<'_, S>) -> Vec<BoxFuture<SibylResult<()>>>;

    /// A previously revealed prophecy is now authoritative truth.
    fn confirm_truth(&self, story: &Story);

    /// A previously revealed prophecy was purged by the authority.
    /// `purged_state` is the graph state the purge rewound to and
    /// `revised` the replacement stories produced by reformation.
    fn reject_heresy(&self, story: &Story, purged_state: &S, revised: &[Story]);
}
