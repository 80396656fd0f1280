//! Partition connection seam
//!
//! One connection per partition, owned by the router. It allocates
//! monotonic local event ids for outgoing commands and queues incoming
//! downstream truths until the router's barrier releases them.

use crate::{Command, EventId, PartitionId, PartitionUri, SibylResult};

/// A granted local event id plus the deferred finalize callback.
///
/// The router collects grants from every partition a command touches and
/// only then invokes the finalizes, so local persistence is caller-visibly
/// all-or-nothing even though partitions are independent.
pub struct EventGrant {
    pub event_id: EventId,
    pub finalize: Box<dyn FnOnce(&Command) + Send>,
}

/// One authoritative event waiting behind the multi-partition barrier,
/// together with any purges the authority bundled alongside it.
#[derive(Clone, Debug)]
pub struct PendingTruth {
    pub truth: Command,
    pub purged_commands: Vec<Command>,
}

impl PendingTruth {
    pub fn new(truth: Command) -> Self {
        PendingTruth {
            truth,
            purged_commands: Vec::new(),
        }
    }

    pub fn with_purged(mut self, purged: Vec<Command>) -> Self {
        self.purged_commands = purged;
        self
    }
}

pub trait PartitionConnection: Send + Sync {
    fn partition_id(&self) -> PartitionId;

    fn partition_uri(&self) -> PartitionUri;

    /// Frozen partitions accept no further writes.
    fn is_frozen(&self) -> bool;

    /// The next event id this partition will grant locally.
    fn expected_event_id(&self) -> EventId;

    /// Allocate the next local event id for an outgoing command. The
    /// grant takes effect only when its finalize callback runs.
    fn claim_command_event(&self, command: &Command) -> SibylResult<EventGrant>;

    /// Queue a downstream truth behind the barrier.
    fn register_pending_truth(&self, pending: PendingTruth);

    /// Peek the next queued downstream truth without removing it.
    fn next_pending_truth(&self) -> Option<Command>;

    /// Remove and return the next queued downstream truth.
    fn take_next_pending_truth(&self) -> Option<PendingTruth>;
}
