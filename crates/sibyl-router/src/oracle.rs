//! Oracle - partition authority router
//!
//! Sits between the prophecy ledger and the per-partition authorities.
//! Claims resolve their target connections, wait for content persistence,
//! take a global FIFO ticket for the local persistence step, collect an
//! event-id grant from every target partition and only then finalize all
//! of them. Downstream, authoritative events queue per partition until
//! the multi-partition barrier says every partition they touch expects
//! them next.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use sibyl_core::{
    AuthorityUri, BoxFuture, Command, EventGrant, PartitionConnection, PartitionId, PartitionUri,
    PendingTruth, SibylError, SibylResult, TruthSink, Upstream,
};
use sibyl_nexus::AuthorityNexus;

use crate::TicketQueue;

/// Per-claim options supplied by the caller.
#[derive(Default)]
pub struct ClaimOptions {
    /// Outstanding remote blob persistence this command's added content
    /// references depend on. Awaited before any event id is allocated,
    /// so content always lands upstream before commands referencing it.
    pub content_uploads: Vec<BoxFuture<SibylResult<()>>>,
}

/// Ephemeral record of one claim being routed; lives for the duration of
/// a single `Oracle::claim` call.
struct ClaimOperation {
    command: Command,
    connections: Vec<(PartitionId, Arc<dyn PartitionConnection>)>,
    authority: AuthorityUri,
    content_uploads: Vec<BoxFuture<SibylResult<()>>>,
}

#[derive(Clone, Debug, Default)]
pub struct RouterStats {
    pub claims_routed: u64,
    pub grants_issued: u64,
    pub truths_confirmed: u64,
    pub purges_delivered: u64,
}

struct OracleInner {
    nexus: Arc<AuthorityNexus>,
    connections: Mutex<HashMap<PartitionId, Arc<dyn PartitionConnection>>>,
    tickets: TicketQueue,
    downstream: Mutex<Option<Arc<dyn TruthSink>>>,
    /// Authorities persisted locally only; claims against them synthesize
    /// their confirmation instead of a network round trip.
    local_authorities: Mutex<HashSet<AuthorityUri>>,
    stats: Mutex<RouterStats>,
}

#[derive(Clone)]
pub struct Oracle {
    inner: Arc<OracleInner>,
}

impl Oracle {
    pub fn new(nexus: Arc<AuthorityNexus>) -> Self {
        Oracle {
            inner: Arc::new(OracleInner {
                nexus,
                connections: Mutex::new(HashMap::new()),
                tickets: TicketQueue::new(),
                downstream: Mutex::new(None),
                local_authorities: Mutex::new(HashSet::new()),
                stats: Mutex::new(RouterStats::default()),
            }),
        }
    }

    /// Register the sink confirmed truths flow into (the ledger).
    pub fn set_downstream(&self, sink: Arc<dyn TruthSink>) {
        *self.inner.downstream.lock() = Some(sink);
    }

    pub fn register_connection(&self, connection: Arc<dyn PartitionConnection>) {
        self.inner
            .connections
            .lock()
            .insert(connection.partition_id(), connection);
    }

    /// Declare an authority purely local: its claims confirm without any
    /// remote round trip.
    pub fn mark_local_authority(&self, authority: AuthorityUri) {
        self.inner.local_authorities.lock().insert(authority);
    }

    pub fn stats(&self) -> RouterStats {
        self.inner.stats.lock().clone()
    }

    pub fn connection(&self, partition: PartitionId) -> Option<Arc<dyn PartitionConnection>> {
        self.inner.connections.lock().get(&partition).cloned()
    }

    /// Route one universalizable command: order it locally, persist it on
    /// every target partition, forward it to the authority. Returns the
    /// authoritative final event.
    pub async fn claim(&self, command: Command, options: ClaimOptions) -> SibylResult<Command> {
        let operation = self.prepare(command, options)?;
        let ClaimOperation {
            mut command,
            connections,
            authority,
            content_uploads,
        } = operation;

        // Content must land upstream before any command referencing it.
        for upload in content_uploads {
            upload
                .await
                .map_err(|e| SibylError::ContentPersistence(e.to_string()))?;
        }

        // Local persistence critical section, strictly in claim order.
        {
            let _turn = self.inner.tickets.acquire().await;

            let mut grants: Vec<(PartitionId, EventGrant)> = Vec::new();
            for (partition, connection) in &connections {
                let grant = connection.claim_command_event(&command)?;
                grants.push((*partition, grant));
            }
            for (partition, grant) in &grants {
                let envelope = command
                    .partitions
                    .get_mut(partition)
                    .expect("resolved partitions come from the command");
                envelope.event_id = Some(grant.event_id);
            }
            let grant_count = grants.len() as u64;
            for (_, grant) in grants {
                (grant.finalize)(&command);
            }
            let mut stats = self.inner.stats.lock();
            stats.grants_issued += grant_count;
            stats.claims_routed += 1;
        }

        if self.inner.local_authorities.lock().contains(&authority) {
            // Synthesize the confirmation and run it through the barrier
            // like any other downstream truth.
            for (_, connection) in &connections {
                connection.register_pending_truth(PendingTruth::new(command.clone()));
            }
            self.confirm_pending_truths()?;
            return Ok(command);
        }

        let partition_uri = connections[0].1.partition_uri();
        let endpoint = self.inner.nexus.obtain_authority(&partition_uri)?;
        endpoint.claim(command).await
    }

    /// Resolve a command into its claim operation. Every check here runs
    /// before any side effect: a frozen or unresolvable partition must
    /// not cost the others an event id.
    fn prepare(&self, command: Command, options: ClaimOptions) -> SibylResult<ClaimOperation> {
        if command.partitions.is_empty() {
            return Err(SibylError::NoPartitions(command.command_id));
        }

        let connections = self.resolve_connections(&command)?;

        let authorities = command.authorities();
        if authorities.len() > 1 {
            return Err(SibylError::MultipleAuthorities(authorities));
        }
        let authority = authorities[0].clone();

        for (partition, connection) in &connections {
            if connection.is_frozen() {
                return Err(SibylError::FrozenPartition(*partition));
            }
        }

        Ok(ClaimOperation {
            command,
            connections,
            authority,
            content_uploads: options.content_uploads,
        })
    }

    /// An authoritative event arrived on one partition's downstream,
    /// possibly bundled with purges of optimistic commands.
    pub fn deliver_truth(&self, partition: PartitionId, pending: PendingTruth) -> SibylResult<()> {
        let connection = self
            .connection(partition)
            .ok_or_else(|| SibylError::Internal(format!("no connection for {partition:?}")))?;
        if !pending.purged_commands.is_empty() {
            self.inner.stats.lock().purges_delivered += 1;
        }
        connection.register_pending_truth(pending);
        self.confirm_pending_truths()
    }

    /// Drain every pending truth the barrier allows, to fixed point.
    ///
    /// A candidate is ready only when each partition it touches has it as
    /// the next expected event; confirming it advances those queues,
    /// which may unblock single-partition events stuck behind it.
    pub fn confirm_pending_truths(&self) -> SibylResult<()> {
        loop {
            let connections: Vec<Arc<dyn PartitionConnection>> =
                self.inner.connections.lock().values().cloned().collect();

            let mut confirmed = false;
            for connection in &connections {
                let Some(candidate) = connection.next_pending_truth() else {
                    continue;
                };
                if !self.candidate_ready(&candidate) {
                    continue;
                }

                let mut purged: Vec<Command> = Vec::new();
                for partition in candidate.partition_ids() {
                    let Some(target) = self.connection(partition) else {
                        continue;
                    };
                    match target.take_next_pending_truth() {
                        Some(pending)
                            if pending.truth.command_id == candidate.command_id =>
                        {
                            for purge in pending.purged_commands {
                                if !purged.iter().any(|c| c.command_id == purge.command_id) {
                                    purged.push(purge);
                                }
                            }
                        }
                        Some(pending) => {
                            // Ready-check raced; put it back where it was.
                            tracing::error!(
                                partition = %partition,
                                expected = %candidate.command_id,
                                got = %pending.truth.command_id,
                                "pending truth changed under the barrier"
                            );
                            return Err(SibylError::Internal(
                                "pending truth changed under the barrier".into(),
                            ));
                        }
                        None => {
                            return Err(SibylError::Internal(
                                "ready candidate missing from partition queue".into(),
                            ));
                        }
                    }
                }

                let sink = self
                    .inner
                    .downstream
                    .lock()
                    .clone()
                    .ok_or_else(|| SibylError::Internal("no downstream truth sink".into()))?;
                sink.confirm_truth(candidate, purged)?;
                self.inner.stats.lock().truths_confirmed += 1;
                confirmed = true;
                break;
            }

            if !confirmed {
                return Ok(());
            }
        }
    }

    fn candidate_ready(&self, candidate: &Command) -> bool {
        candidate.partition_ids().all(|partition| {
            self.connection(partition)
                .and_then(|c| c.next_pending_truth())
                .is_some_and(|next| next.command_id == candidate.command_id)
        })
    }

    fn resolve_connections(
        &self,
        command: &Command,
    ) -> SibylResult<Vec<(PartitionId, Arc<dyn PartitionConnection>)>> {
        let connections = self.inner.connections.lock();
        let mut resolved = Vec::new();
        let mut missing = Vec::new();
        for (partition, envelope) in &command.partitions {
            match connections.get(partition) {
                Some(connection) => resolved.push((*partition, Arc::clone(connection))),
                None => missing.push(PartitionUri::derive(&envelope.authority_uri, *partition)),
            }
        }
        if !missing.is_empty() {
            // Recoverable: the caller establishes these connections and
            // retries the identical claim.
            return Err(SibylError::MissingConnections(missing));
        }
        Ok(resolved)
    }
}

impl Upstream for Oracle {
    fn claim(&self, command: Command) -> BoxFuture<SibylResult<Command>> {
        let oracle = self.clone();
        Box::pin(async move { oracle.claim(command, ClaimOptions::default()).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sibyl_core::{CommandKind, PartitionEnvelope};
    use sibyl_testkit::MemoryConnection;

    const LOCAL: &str = "valaa-memory:";

    #[derive(Default)]
    struct RecordingSink {
        confirmed: Mutex<Vec<(Command, Vec<Command>)>>,
    }

    impl RecordingSink {
        fn confirmed_ids(&self) -> Vec<sibyl_core::CommandId> {
            self.confirmed
                .lock()
                .iter()
                .map(|(c, _)| c.command_id)
                .collect()
        }
    }

    impl TruthSink for RecordingSink {
        fn confirm_truth(&self, truth: Command, purged: Vec<Command>) -> SibylResult<()> {
            self.confirmed.lock().push((truth, purged));
            Ok(())
        }
    }

    fn oracle_with_sink() -> (Oracle, Arc<RecordingSink>) {
        let oracle = Oracle::new(Arc::new(AuthorityNexus::new()));
        oracle.mark_local_authority(AuthorityUri::from(LOCAL));
        let sink = Arc::new(RecordingSink::default());
        oracle.set_downstream(sink.clone());
        (oracle, sink)
    }

    fn connect(oracle: &Oracle, partition: u64) -> Arc<MemoryConnection> {
        let connection = Arc::new(MemoryConnection::new(
            PartitionId::new(partition),
            PartitionUri::derive(&AuthorityUri::from(LOCAL), PartitionId::new(partition)),
        ));
        oracle.register_connection(connection.clone());
        connection
    }

    fn command_on(partitions: &[u64]) -> Command {
        let mut command = Command::new(CommandKind::Modify, Bytes::from_static(b"set a=1"));
        for partition in partitions {
            command = command.touching(
                PartitionId::new(*partition),
                PartitionEnvelope::new(AuthorityUri::from(LOCAL)),
            );
        }
        command
    }

    #[tokio::test]
    async fn test_missing_connections_recoverable_then_retry() {
        let (oracle, _sink) = oracle_with_sink();
        let command = command_on(&[1, 2]);

        let err = oracle
            .claim(command.clone(), ClaimOptions::default())
            .await
            .unwrap_err();
        match &err {
            SibylError::MissingConnections(uris) => assert_eq!(uris.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_recoverable());

        connect(&oracle, 1);
        connect(&oracle, 2);
        let confirmed = oracle.claim(command, ClaimOptions::default()).await.unwrap();
        assert!(confirmed.is_universal());
    }

    #[tokio::test]
    async fn test_multi_authority_rejected_before_routing() {
        let (oracle, _sink) = oracle_with_sink();
        let conn = connect(&oracle, 1);
        connect(&oracle, 2);

        let command = Command::new(CommandKind::Modify, Bytes::new())
            .touching(
                PartitionId::new(1),
                PartitionEnvelope::new(AuthorityUri::from(LOCAL)),
            )
            .touching(
                PartitionId::new(2),
                PartitionEnvelope::new(AuthorityUri::from("valaa-aws:eu")),
            );

        let err = oracle.claim(command, ClaimOptions::default()).await.unwrap_err();
        assert!(matches!(err, SibylError::MultipleAuthorities(_)));
        assert_eq!(conn.granted_count(), 0);
    }

    #[tokio::test]
    async fn test_frozen_partition_grants_nothing_anywhere() {
        let (oracle, _sink) = oracle_with_sink();
        let healthy = connect(&oracle, 1);
        let frozen = connect(&oracle, 2);
        frozen.freeze();

        let err = oracle
            .claim(command_on(&[1, 2]), ClaimOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SibylError::FrozenPartition(p) if p == PartitionId::new(2)));
        assert_eq!(healthy.granted_count(), 0);
        assert_eq!(frozen.granted_count(), 0);
    }

    #[tokio::test]
    async fn test_multi_partition_grants_finalize_together() {
        let (oracle, _sink) = oracle_with_sink();
        let first = connect(&oracle, 1);
        let second = connect(&oracle, 2);

        let confirmed = oracle
            .claim(command_on(&[1, 2]), ClaimOptions::default())
            .await
            .unwrap();

        assert!(confirmed.is_universal());
        assert_eq!(first.finalized().len(), 1);
        assert_eq!(second.finalized().len(), 1);
        // Finalized commands carry every partition's granted event id.
        let (_, persisted) = &first.finalized()[0];
        assert!(persisted.is_universal());
    }

    #[tokio::test]
    async fn test_sequential_claims_get_monotonic_event_ids() {
        let (oracle, _sink) = oracle_with_sink();
        connect(&oracle, 1);

        let first = oracle
            .claim(command_on(&[1]), ClaimOptions::default())
            .await
            .unwrap();
        let second = oracle
            .claim(command_on(&[1]), ClaimOptions::default())
            .await
            .unwrap();

        let p = PartitionId::new(1);
        assert_eq!(first.event_id_for(p).unwrap().next(), second.event_id_for(p).unwrap());
    }

    #[tokio::test]
    async fn test_content_upload_failure_precedes_grants() {
        let (oracle, _sink) = oracle_with_sink();
        let conn = connect(&oracle, 1);

        let options = ClaimOptions {
            content_uploads: vec![Box::pin(async {
                Err(SibylError::ContentPersistence("blob store down".into()))
            })],
        };
        let err = oracle.claim(command_on(&[1]), options).await.unwrap_err();
        assert!(matches!(err, SibylError::ContentPersistence(_)));
        assert_eq!(conn.granted_count(), 0);
    }

    #[tokio::test]
    async fn test_barrier_holds_multi_partition_event() {
        let (oracle, sink) = oracle_with_sink();
        connect(&oracle, 1);
        connect(&oracle, 2);

        let c1 = command_on(&[1]);
        let c2 = command_on(&[1, 2]);

        // P1 has applied C1 and queued C2; P2 has seen nothing yet.
        oracle
            .deliver_truth(PartitionId::new(1), PendingTruth::new(c1.clone()))
            .unwrap();
        oracle
            .deliver_truth(PartitionId::new(1), PendingTruth::new(c2.clone()))
            .unwrap();
        assert_eq!(sink.confirmed_ids(), vec![c1.command_id]);

        // Once P2 catches up, C2 is revealed exactly once.
        oracle
            .deliver_truth(PartitionId::new(2), PendingTruth::new(c2.clone()))
            .unwrap();
        assert_eq!(sink.confirmed_ids(), vec![c1.command_id, c2.command_id]);
    }

    #[tokio::test]
    async fn test_barrier_unblocks_stuck_single_partition_events() {
        let (oracle, sink) = oracle_with_sink();
        connect(&oracle, 1);
        connect(&oracle, 2);

        let multi = command_on(&[1, 2]);
        let single = command_on(&[1]);

        oracle
            .deliver_truth(PartitionId::new(1), PendingTruth::new(multi.clone()))
            .unwrap();
        oracle
            .deliver_truth(PartitionId::new(1), PendingTruth::new(single.clone()))
            .unwrap();
        assert!(sink.confirmed_ids().is_empty());

        oracle
            .deliver_truth(PartitionId::new(2), PendingTruth::new(multi.clone()))
            .unwrap();
        // Confirming the multi-partition event unblocked the single one.
        assert_eq!(
            sink.confirmed_ids(),
            vec![multi.command_id, single.command_id]
        );
    }

    #[tokio::test]
    async fn test_purges_bundle_with_their_truth() {
        let (oracle, sink) = oracle_with_sink();
        connect(&oracle, 1);

        let purged = command_on(&[1]);
        let truth = command_on(&[1]);
        oracle
            .deliver_truth(
                PartitionId::new(1),
                PendingTruth::new(truth.clone()).with_purged(vec![purged.clone()]),
            )
            .unwrap();

        let confirmed = sink.confirmed.lock();
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].1.len(), 1);
        assert_eq!(confirmed[0].1[0].command_id, purged.command_id);
    }
}
