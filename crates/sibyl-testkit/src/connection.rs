//! In-memory partition connection with a pending-truth queue

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use sibyl_core::{
    Command, EventGrant, EventId, PartitionConnection, PartitionId, PartitionUri, PendingTruth,
    SibylError, SibylResult,
};

pub struct MemoryConnection {
    partition_id: PartitionId,
    partition_uri: PartitionUri,
    frozen: AtomicBool,
    /// Next event id to grant; advanced only by the grant's finalize.
    next_event: Arc<Mutex<u64>>,
    /// Event ids granted but not yet finalized, counted for stacking.
    outstanding: Arc<Mutex<u64>>,
    finalized: Arc<Mutex<Vec<(EventId, Command)>>>,
    pending_truths: Mutex<VecDeque<PendingTruth>>,
}

impl MemoryConnection {
    pub fn new(partition_id: PartitionId, partition_uri: PartitionUri) -> Self {
        MemoryConnection {
            partition_id,
            partition_uri,
            frozen: AtomicBool::new(false),
            next_event: Arc::new(Mutex::new(0)),
            outstanding: Arc::new(Mutex::new(0)),
            finalized: Arc::new(Mutex::new(Vec::new())),
            pending_truths: Mutex::new(VecDeque::new()),
        }
    }

    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
    }

    /// Commands whose local persistence was finalized, in grant order.
    pub fn finalized(&self) -> Vec<(EventId, Command)> {
        self.finalized.lock().clone()
    }

    /// How many event ids were ever granted (finalized or not).
    pub fn granted_count(&self) -> u64 {
        *self.next_event.lock() + *self.outstanding.lock()
    }

    pub fn pending_len(&self) -> usize {
        self.pending_truths.lock().len()
    }
}

impl PartitionConnection for MemoryConnection {
    fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    fn partition_uri(&self) -> PartitionUri {
        self.partition_uri.clone()
    }

    fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    fn expected_event_id(&self) -> EventId {
        EventId::new(*self.next_event.lock() + *self.outstanding.lock())
    }

    fn claim_command_event(&self, _command: &Command) -> SibylResult<EventGrant> {
        if self.is_frozen() {
            return Err(SibylError::FrozenPartition(self.partition_id));
        }

        let event_id = self.expected_event_id();
        *self.outstanding.lock() += 1;

        let next_event = Arc::clone(&self.next_event);
        let outstanding = Arc::clone(&self.outstanding);
        let finalized = Arc::clone(&self.finalized);
        Ok(EventGrant {
            event_id,
            finalize: Box::new(move |command: &Command| {
                *next_event.lock() += 1;
                *outstanding.lock() -= 1;
                finalized.lock().push((event_id, command.clone()));
            }),
        })
    }

    fn register_pending_truth(&self, pending: PendingTruth) {
        self.pending_truths.lock().push_back(pending);
    }

    fn next_pending_truth(&self) -> Option<Command> {
        self.pending_truths.lock().front().map(|p| p.truth.clone())
    }

    fn take_next_pending_truth(&self) -> Option<PendingTruth> {
        self.pending_truths.lock().pop_front()
    }
}
