//! SIBYL Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout the SIBYL sync core:
//! - Identifiers (CommandId, PartitionId, EventId) and URIs
//! - Commands and their partition envelopes (the only persisted wire shape)
//! - Stories (commands enriched with corpus-computed field deltas)
//! - The Corpus, Follower and PartitionConnection seams
//! - Error types shared by the ledger and the router

pub mod id;
pub mod uri;
pub mod command;
pub mod story;
pub mod corpus;
pub mod follower;
pub mod connection;
pub mod authority;
pub mod error;

pub use id::*;
pub use uri::*;
pub use command::*;
pub use story::*;
pub use corpus::*;
pub use follower::*;
pub use connection::*;
pub use authority::*;
pub use error::*;

use std::future::Future;
use std::pin::Pin;

/// Boxed future used at the async seams (follower reactions, authority claims).
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;
