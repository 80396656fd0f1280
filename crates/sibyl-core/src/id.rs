//! Identity types for the SIBYL sync core
//!
//! Partition and event identifiers are 64-bit for wire efficiency;
//! command identifiers are 128-bit random values because they are the
//! process-wide deduplication key and must never collide across nodes.

use std::fmt;

/// Partition identity - one independently ordered unit of the graph
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PartitionId(pub u64);

impl PartitionId {
    pub const ZERO: PartitionId = PartitionId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        PartitionId(id)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        PartitionId(u64::from_le_bytes(bytes))
    }
}

impl fmt::Debug for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Partition({:016x})", self.0)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Event identity - monotonic sequence number within one partition
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EventId(pub u64);

impl EventId {
    pub const ZERO: EventId = EventId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        EventId(id)
    }

    /// The event id that directly follows this one in partition order.
    #[inline]
    pub fn next(self) -> Self {
        EventId(self.0 + 1)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        EventId(u64::from_le_bytes(bytes))
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event({})", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Command identity - the deduplication key for optimistic commands
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CommandId(pub u128);

impl CommandId {
    pub const ZERO: CommandId = CommandId(0);

    #[inline]
    pub fn new(id: u128) -> Self {
        CommandId(id)
    }

    /// Generate a fresh random command id.
    pub fn generate() -> Self {
        CommandId(rand::random())
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 16] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        CommandId(u128::from_le_bytes(bytes))
    }
}

impl fmt::Debug for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({:032x})", self.0)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}
