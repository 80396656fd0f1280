//! Prophecy - one queued, possibly unconfirmed command application

use sibyl_core::{Command, CommandId, ConflictReason, PartitionId, Story};

/// A queue node wrapping one applied command.
///
/// `previous_state` is the corpus snapshot before the command applied and
/// `state` the snapshot after; for adjacent queue entries A then B,
/// `B.previous_state == A.state` except while a reformation is in flight.
#[derive(Clone, Debug)]
pub struct Prophecy<S> {
    pub story: Story,
    /// Corpus snapshot after this command applied
    pub state: S,
    /// Corpus snapshot this command applied against
    pub previous_state: S,
    /// Pre-universalization command, present only when locally originated.
    /// Needed to re-derive a fresh command during reformation.
    pub restricted_command: Option<Command>,
    /// Confirmed authoritative by upstream
    pub is_truth: bool,
    /// Targeted by a purge; must be reviewed during reformation
    pub should_review: bool,
    pub conflict_reason: Option<ConflictReason>,
}

impl<S> Prophecy<S> {
    pub fn new(story: Story, state: S, previous_state: S) -> Self {
        Prophecy {
            story,
            state,
            previous_state,
            restricted_command: None,
            is_truth: false,
            should_review: false,
            conflict_reason: None,
        }
    }

    pub fn with_restricted(mut self, restricted: Command) -> Self {
        self.restricted_command = Some(restricted);
        self
    }

    pub fn as_truth(mut self) -> Self {
        self.is_truth = true;
        self
    }

    #[inline]
    pub fn command_id(&self) -> CommandId {
        self.story.command_id()
    }

    pub fn partition_ids(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.story.partition_ids()
    }

    pub fn is_conflicted(&self) -> bool {
        self.conflict_reason.is_some()
    }
}
