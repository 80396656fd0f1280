//! Command definitions and wire codec
//!
//! A command is the unit of optimistic mutation. Its `partitions` map
//! enumerates every partition it touches; event ids inside the map are
//! absent until the command has been universalized by the router. The
//! encoded command is the only structure this core persists externally.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::{AuthorityUri, CommandId, EventId, PartitionId, SibylError, SibylResult};

/// Current command wire format version
pub const COMMAND_VERSION: u8 = 2;

/// Command kind classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandKind {
    /// Composite transaction of several sub-actions
    Transact = 0x01,
    /// Resource creation
    Create = 0x02,
    /// Field modification
    Modify = 0x03,
    /// Resource destruction
    Destroy = 0x04,
}

impl CommandKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(CommandKind::Transact),
            0x02 => Some(CommandKind::Create),
            0x03 => Some(CommandKind::Modify),
            0x04 => Some(CommandKind::Destroy),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Per-partition routing envelope inside a command
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionEnvelope {
    /// Authority responsible for ordering this partition
    pub authority_uri: AuthorityUri,
    /// Event id granted by the partition, absent until universalized
    pub event_id: Option<EventId>,
}

impl PartitionEnvelope {
    pub fn new(authority_uri: AuthorityUri) -> Self {
        PartitionEnvelope {
            authority_uri,
            event_id: None,
        }
    }

    pub fn with_event_id(mut self, event_id: EventId) -> Self {
        self.event_id = Some(event_id);
        self
    }
}

/// Command - one optimistic mutation of the object graph
///
/// Immutable once issued; `command_id` is the identity and dedup key.
/// `BTreeMap` keeps partition iteration deterministic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub version: u8,
    pub command_id: CommandId,
    pub partitions: BTreeMap<PartitionId, PartitionEnvelope>,
    pub parent_id: Option<CommandId>,
    pub time_stamp: u64,
    /// Opaque action body interpreted by the corpus
    pub payload: Bytes,
}

impl Command {
    /// Create a new restricted (not yet universalized) command.
    pub fn new(kind: CommandKind, payload: impl Into<Bytes>) -> Self {
        Command {
            kind,
            version: COMMAND_VERSION,
            command_id: CommandId::generate(),
            partitions: BTreeMap::new(),
            parent_id: None,
            time_stamp: 0,
            payload: payload.into(),
        }
    }

    pub fn with_command_id(mut self, command_id: CommandId) -> Self {
        self.command_id = command_id;
        self
    }

    pub fn with_parent(mut self, parent_id: CommandId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_time_stamp(mut self, time_stamp: u64) -> Self {
        self.time_stamp = time_stamp;
        self
    }

    /// Add a partition this command touches.
    pub fn touching(mut self, partition: PartitionId, envelope: PartitionEnvelope) -> Self {
        self.partitions.insert(partition, envelope);
        self
    }

    /// A command is universal once every partition envelope carries an
    /// authority-granted event id.
    pub fn is_universal(&self) -> bool {
        !self.partitions.is_empty()
            && self.partitions.values().all(|e| e.event_id.is_some())
    }

    /// Partition ids this command touches, in deterministic order.
    pub fn partition_ids(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.partitions.keys().copied()
    }

    /// Distinct authority URIs named by the partition envelopes.
    pub fn authorities(&self) -> Vec<AuthorityUri> {
        let mut uris: Vec<AuthorityUri> = self
            .partitions
            .values()
            .map(|e| e.authority_uri.clone())
            .collect();
        uris.sort();
        uris.dedup();
        uris
    }

    /// The granted event id for one partition, if universalized there.
    pub fn event_id_for(&self, partition: PartitionId) -> Option<EventId> {
        self.partitions.get(&partition).and_then(|e| e.event_id)
    }

    /// Encode to the wire format.
    pub fn encode(&self) -> Bytes {
        let mut buf = Vec::new();
        buf.push(self.version);
        buf.push(self.kind.to_byte());
        buf.extend_from_slice(&self.command_id.to_bytes());

        match self.parent_id {
            Some(parent) => {
                buf.push(0x01);
                buf.extend_from_slice(&parent.to_bytes());
            }
            None => buf.push(0x00),
        }

        buf.extend_from_slice(&self.time_stamp.to_le_bytes());

        buf.extend_from_slice(&(self.partitions.len() as u16).to_le_bytes());
        for (partition, envelope) in &self.partitions {
            buf.extend_from_slice(&partition.to_bytes());
            let uri = envelope.authority_uri.as_str().as_bytes();
            buf.extend_from_slice(&(uri.len() as u16).to_le_bytes());
            buf.extend_from_slice(uri);
            match envelope.event_id {
                Some(event_id) => {
                    buf.push(0x01);
                    buf.extend_from_slice(&event_id.to_bytes());
                }
                None => buf.push(0x00),
            }
        }

        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);

        Bytes::from(buf)
    }

    /// Decode from the wire format.
    pub fn decode(buf: &[u8]) -> SibylResult<Command> {
        let mut cursor = Cursor::new(buf);

        let version = cursor.u8()?;
        if version != COMMAND_VERSION {
            return Err(SibylError::UnsupportedVersion(version));
        }
        let kind_byte = cursor.u8()?;
        let kind = CommandKind::from_byte(kind_byte)
            .ok_or(SibylError::UnknownCommandKind(kind_byte))?;
        let command_id = CommandId::from_bytes(cursor.array::<16>()?);

        let parent_id = match cursor.u8()? {
            0x00 => None,
            0x01 => Some(CommandId::from_bytes(cursor.array::<16>()?)),
            b => {
                return Err(SibylError::InvalidWireFormat(format!(
                    "bad parent flag: {b:#04x}"
                )))
            }
        };

        let time_stamp = u64::from_le_bytes(cursor.array::<8>()?);

        let partition_count = u16::from_le_bytes(cursor.array::<2>()?) as usize;
        let mut partitions = BTreeMap::new();
        for _ in 0..partition_count {
            let partition = PartitionId::from_bytes(cursor.array::<8>()?);
            let uri_len = u16::from_le_bytes(cursor.array::<2>()?) as usize;
            let uri_bytes = cursor.slice(uri_len)?;
            let uri = std::str::from_utf8(uri_bytes)
                .map_err(|_| SibylError::InvalidWireFormat("non-utf8 authority uri".into()))?;
            let event_id = match cursor.u8()? {
                0x00 => None,
                0x01 => Some(EventId::from_bytes(cursor.array::<8>()?)),
                b => {
                    return Err(SibylError::InvalidWireFormat(format!(
                        "bad event id flag: {b:#04x}"
                    )))
                }
            };
            partitions.insert(
                partition,
                PartitionEnvelope {
                    authority_uri: AuthorityUri::new(uri),
                    event_id,
                },
            );
        }

        let payload_len = u32::from_le_bytes(cursor.array::<4>()?) as usize;
        let payload = Bytes::copy_from_slice(cursor.slice(payload_len)?);

        Ok(Command {
            kind,
            version,
            command_id,
            partitions,
            parent_id,
            time_stamp,
            payload,
        })
    }
}

/// Bounds-checked byte cursor for decoding
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn slice(&mut self, len: usize) -> SibylResult<&'a [u8]> {
        if self.buf.len() < self.pos + len {
            return Err(SibylError::BufferTooShort {
                expected: self.pos + len,
                actual: self.buf.len(),
            });
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn u8(&mut self) -> SibylResult<u8> {
        Ok(self.slice(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> SibylResult<[u8; N]> {
        let slice = self.slice(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }
}
