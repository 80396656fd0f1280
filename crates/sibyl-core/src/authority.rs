//! Upstream and downstream seams between the ledger and the router
//!
//! The ledger pushes universalized commands up through `Upstream`
//! (implemented by the router), the router pushes authorized truths back
//! down through `TruthSink` (implemented by the ledger), and the router
//! reaches remote order-givers through `Authority` endpoints resolved by
//! the nexus.

use crate::{BoxFuture, Command, SibylResult};

/// One authority endpoint - the single order-giver for its partitions.
/// Claiming returns the authorized, event-id-stamped command.
pub trait Authority: Send + Sync {
    fn claim(&self, command: Command) -> BoxFuture<SibylResult<Command>>;
}

/// The ledger's handle to whatever sits upstream of it.
pub trait Upstream: Send + Sync {
    fn claim(&self, command: Command) -> BoxFuture<SibylResult<Command>>;
}

/// The router's handle to whatever consumes confirmed truths downstream.
pub trait TruthSink: Send + Sync {
    fn confirm_truth(&self, truth: Command, purged: Vec<Command>) -> SibylResult<()>;
}
