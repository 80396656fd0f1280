//! End-to-end loop: ledger -> oracle -> authority -> barrier -> ledger

use std::sync::Arc;

use bytes::Bytes;

use sibyl_core::{
    Authority, AuthorityUri, Command, CommandKind, PartitionEnvelope, PartitionId, PartitionUri,
    PendingTruth, SibylResult, TruthSink, Upstream,
};
use sibyl_ledger::FalseProphet;
use sibyl_nexus::{AuthorityNexus, AuthorityScheme};
use sibyl_router::Oracle;
use sibyl_testkit::{MemoryConnection, MemoryCorpus, RecordingFollower, ScriptedAuthority};

const SCHEME: &str = "valaa-test";
const AUTHORITY: &str = "valaa-test:";

struct SharedScheme {
    authority: Arc<ScriptedAuthority>,
}

impl AuthorityScheme for SharedScheme {
    fn authority_uri(&self, _partition: &PartitionUri) -> SibylResult<AuthorityUri> {
        Ok(AuthorityUri::from(AUTHORITY))
    }

    fn build(&self, _authority: &AuthorityUri) -> SibylResult<Arc<dyn Authority>> {
        Ok(self.authority.clone())
    }
}

struct Harness {
    oracle: Oracle,
    prophet: Arc<FalseProphet<MemoryCorpus>>,
    follower: Arc<RecordingFollower>,
    authority: Arc<ScriptedAuthority>,
}

fn harness(partitions: &[u64]) -> Harness {
    let authority = Arc::new(ScriptedAuthority::new());
    let nexus = Arc::new(AuthorityNexus::new());
    nexus.register_scheme(
        SCHEME,
        Arc::new(SharedScheme {
            authority: authority.clone(),
        }),
    );

    let oracle = Oracle::new(nexus);
    for partition in partitions {
        oracle.register_connection(Arc::new(MemoryConnection::new(
            PartitionId::new(*partition),
            PartitionUri::derive(&AuthorityUri::from(AUTHORITY), PartitionId::new(*partition)),
        )));
    }

    let prophet = Arc::new(FalseProphet::new(
        MemoryCorpus::new(),
        Arc::new(oracle.clone()) as Arc<dyn Upstream>,
    ));
    oracle.set_downstream(prophet.clone() as Arc<dyn TruthSink>);

    let follower = Arc::new(RecordingFollower::new());
    prophet.add_follower(follower.clone());

    Harness {
        oracle,
        prophet,
        follower,
        authority,
    }
}

fn command_on(partitions: &[u64], payload: &str) -> Command {
    let mut command =
        Command::new(CommandKind::Modify, Bytes::copy_from_slice(payload.as_bytes()));
    for partition in partitions {
        command = command.touching(
            PartitionId::new(*partition),
            PartitionEnvelope::new(AuthorityUri::from(AUTHORITY)),
        );
    }
    command
}

#[tokio::test]
async fn test_claim_travels_up_and_truth_travels_down() {
    let h = harness(&[1]);

    let c1 = command_on(&[1], "set title=hello");
    let ticket = h.prophet.claim(c1.clone()).unwrap();
    assert_eq!(h.prophet.state().field("title"), Some("hello"));

    let truth = ticket.final_event().await.unwrap();
    assert!(truth.is_universal());
    assert_eq!(h.authority.claimed().len(), 1);

    // The authority's downstream feed confirms the event.
    h.oracle
        .deliver_truth(PartitionId::new(1), PendingTruth::new(truth))
        .unwrap();
    assert_eq!(h.follower.confirmed(), vec![c1.command_id]);
    assert!(h.prophet.queued_commands().is_empty());
}

#[tokio::test]
async fn test_multi_partition_truth_waits_for_both_feeds() {
    let h = harness(&[1, 2]);

    let c1 = command_on(&[1], "set a=1");
    let c2 = command_on(&[1, 2], "set b=2");
    let t1 = h.prophet.claim(c1.clone()).unwrap().final_event().await.unwrap();
    let t2 = h.prophet.claim(c2.clone()).unwrap().final_event().await.unwrap();

    h.oracle
        .deliver_truth(PartitionId::new(1), PendingTruth::new(t1))
        .unwrap();
    h.oracle
        .deliver_truth(PartitionId::new(1), PendingTruth::new(t2.clone()))
        .unwrap();
    // P2 has not caught up; c2 stays optimistic downstream.
    assert_eq!(h.follower.confirmed(), vec![c1.command_id]);
    assert_eq!(h.prophet.queued_commands(), vec![c2.command_id]);

    h.oracle
        .deliver_truth(PartitionId::new(2), PendingTruth::new(t2))
        .unwrap();
    assert_eq!(h.follower.confirmed(), vec![c1.command_id, c2.command_id]);
    assert!(h.prophet.queued_commands().is_empty());
}

#[tokio::test]
async fn test_purge_bundled_with_truth_triggers_reformation() {
    let h = harness(&[1]);

    let local = command_on(&[1], "set mine=1");
    h.prophet.claim(local.clone()).unwrap();

    // The authority ordered someone else's event first and purged ours;
    // reformation replays the purged command after the foreign truth.
    let foreign = command_on(&[1], "set theirs=2");
    h.oracle
        .deliver_truth(
            PartitionId::new(1),
            PendingTruth::new(foreign.clone()).with_purged(vec![local.clone()]),
        )
        .unwrap();

    assert_eq!(h.follower.confirmed(), vec![foreign.command_id]);
    assert_eq!(h.prophet.queued_commands(), vec![local.command_id]);
    assert_eq!(h.prophet.state().field("theirs"), Some("2"));
    assert_eq!(h.prophet.state().field("mine"), Some("1"));
    assert_eq!(h.prophet.stats().reformations, 1);
}

#[tokio::test]
async fn test_rejected_claim_never_reaches_downstream() {
    let h = harness(&[1]);

    let doomed = command_on(&[1], "set a=1");
    h.authority.reject(doomed.command_id);

    let ticket = h.prophet.claim(doomed).unwrap();
    assert!(ticket.final_event().await.is_err());

    assert_eq!(h.prophet.state().field("a"), None);
    assert!(h.prophet.queued_commands().is_empty());
    assert!(h.follower.confirmed().is_empty());
}
