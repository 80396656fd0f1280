//! Scripted authority - grants monotonic event ids or rejects on cue

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use sibyl_core::{
    Authority, BoxFuture, Command, CommandId, EventId, PartitionId, SibylError, SibylResult,
    Upstream,
};

/// Authorizes every claim by stamping the next event id per partition,
/// unless the command id was marked for rejection. Usable both as a
/// nexus `Authority` endpoint and directly as the ledger's `Upstream`.
#[derive(Default)]
pub struct ScriptedAuthority {
    rejects: Mutex<HashSet<CommandId>>,
    next_events: Mutex<HashMap<PartitionId, u64>>,
    claimed: Mutex<Vec<Command>>,
}

impl ScriptedAuthority {
    pub fn new() -> Self {
        ScriptedAuthority::default()
    }

    /// Make the authority reject this command id.
    pub fn reject(&self, command_id: CommandId) {
        self.rejects.lock().insert(command_id);
    }

    /// Every command this authority has authorized, in arrival order.
    pub fn claimed(&self) -> Vec<Command> {
        self.claimed.lock().clone()
    }

    fn authorize(&self, mut command: Command) -> SibylResult<Command> {
        if self.rejects.lock().contains(&command.command_id) {
            return Err(SibylError::AuthorityRejected {
                command_id: command.command_id,
                reason: "scripted rejection".into(),
            });
        }

        let mut next_events = self.next_events.lock();
        for (partition, envelope) in command.partitions.iter_mut() {
            if envelope.event_id.is_none() {
                let next = next_events.entry(*partition).or_insert(0);
                envelope.event_id = Some(EventId::new(*next));
                *next += 1;
            }
        }
        drop(next_events);

        self.claimed.lock().push(command.clone());
        Ok(command)
    }
}

impl Upstream for ScriptedAuthority {
    fn claim(&self, command: Command) -> BoxFuture<SibylResult<Command>> {
        let result = self.authorize(command);
        Box::pin(async move { result })
    }
}

impl Authority for ScriptedAuthority {
    fn claim(&self, command: Command) -> BoxFuture<SibylResult<Command>> {
        let result = self.authorize(command);
        Box::pin(async move { result })
    }
}
