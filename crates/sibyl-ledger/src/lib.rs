//! SIBYL Ledger - the false prophet
//!
//! Owns the corpus and the ordered prophecy queue. Claims apply
//! optimistically and broadcast to followers before any upstream I/O;
//! authoritative confirmations drain the queue head in FIFO order; purges
//! trigger the reformation replay that rebuilds the optimistic suffix.

pub mod prophecy;
pub mod queue;
pub mod prophet;

pub use prophecy::*;
pub use queue::*;
pub use prophet::*;
