//! SIBYL Router - the oracle upstream of the prophecy ledger
//!
//! Resolves a command's target partitions, serializes local event-id
//! allocation process-wide through a FIFO ticket queue, forwards to the
//! partition authority, and gates downstream truth revelation behind the
//! multi-partition ordering barrier.

pub mod ticket;
pub mod oracle;

pub use ticket::*;
pub use oracle::*;
