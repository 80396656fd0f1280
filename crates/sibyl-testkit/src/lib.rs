//! SIBYL Test Kit - deterministic doubles for the sync core
//!
//! This crate provides:
//! - An in-memory corpus with a tiny textual op language
//! - A follower that records every broadcast it receives
//! - A scripted authority / upstream that grants event ids or rejects
//! - An in-memory partition connection with a pending-truth queue

pub mod corpus;
pub mod follower;
pub mod authority;
pub mod connection;

pub use corpus::*;
pub use follower::*;
pub use authority::*;
pub use connection::*;
