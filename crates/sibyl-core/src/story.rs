//! Stories - commands enriched with corpus-computed deltas
//!
//! The corpus is a black box here: dispatching a command yields the
//! command back together with the per-field passages its reducers
//! computed. The sync core never inspects passage contents, it only
//! carries them to followers and back through reformation.

use bytes::Bytes;

use crate::{Command, CommandId, PartitionId};

/// One opaque per-field delta record computed by the corpus
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Passage {
    /// Field path the delta applies to
    pub field: String,
    /// Opaque delta body
    pub delta: Bytes,
}

impl Passage {
    pub fn new(field: impl Into<String>, delta: impl Into<Bytes>) -> Self {
        Passage {
            field: field.into(),
            delta: delta.into(),
        }
    }
}

/// A command as applied: the action plus its computed deltas
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Story {
    pub command: Command,
    pub passages: Vec<Passage>,
}

impl Story {
    pub fn new(command: Command, passages: Vec<Passage>) -> Self {
        Story { command, passages }
    }

    #[inline]
    pub fn command_id(&self) -> CommandId {
        self.command.command_id
    }

    pub fn partition_ids(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.command.partition_ids()
    }
}
