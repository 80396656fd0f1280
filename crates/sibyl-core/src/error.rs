//! Error types for the SIBYL sync core

use thiserror::Error;

use crate::{AuthorityUri, CommandId, PartitionId, PartitionUri};

/// Why a prophecy ended up conflicted during reformation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConflictReason {
    /// Soft conflict: overlapping modification with a newer truth
    Overlap,
    /// Hard conflict: the corpus rejected the reapplication
    ReapplyFailed(String),
    /// An earlier prophecy in the same replay conflicted on a shared partition
    Cascaded(PartitionId),
    /// A non-purged prophecy failed review; invariant violation
    Internal(String),
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictReason::Overlap => write!(f, "overlapping modification with new truth"),
            ConflictReason::ReapplyFailed(e) => write!(f, "reapplication failed: {e}"),
            ConflictReason::Cascaded(p) => write!(f, "cascaded from conflicted partition {p}"),
            ConflictReason::Internal(e) => write!(f, "internal review failure: {e}"),
        }
    }
}

/// Core SIBYL errors
#[derive(Error, Debug)]
pub enum SibylError {
    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Unsupported command version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown command kind: {0}")]
    UnknownCommandKind(u8),

    // Routing errors
    #[error("Missing partition connections: {0:?}")]
    MissingConnections(Vec<PartitionUri>),

    #[error("Partition {0} is frozen")]
    FrozenPartition(PartitionId),

    #[error("Command names multiple authorities: {0:?}")]
    MultipleAuthorities(Vec<AuthorityUri>),

    #[error("Command {0:?} names no partitions")]
    NoPartitions(CommandId),

    // Nexus errors
    #[error("Unknown partition scheme: {0}")]
    UnknownScheme(String),

    #[error("No authority registered for {0}")]
    UnknownAuthority(AuthorityUri),

    // Upstream errors
    #[error("Authority rejected command {command_id:?}: {reason}")]
    AuthorityRejected {
        command_id: CommandId,
        reason: String,
    },

    #[error("Authority unavailable: {0}")]
    AuthorityUnavailable(String),

    #[error("Content persistence failed: {0}")]
    ContentPersistence(String),

    // Ledger errors
    #[error("Corpus dispatch failed: {0}")]
    Corpus(String),

    #[error("Prophecy conflicted: {0}")]
    Conflict(ConflictReason),

    #[error("Internal invariant violation: {0}")]
    Internal(String),
}

impl SibylError {
    /// Whether retrying the identical call may succeed after the caller
    /// repairs its environment (e.g. establishes the named connections).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SibylError::MissingConnections(_) | SibylError::AuthorityUnavailable(_)
        )
    }
}

/// Result type for SIBYL operations
pub type SibylResult<T> = Result<T, SibylError>;
