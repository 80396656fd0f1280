//! FalseProphet - the optimistic prophecy ledger
//!
//! Owns the corpus and the prophecy queue behind one mutex: every
//! structural mutation (append, reformation detach, truth draining) is
//! serialized there, while upstream I/O runs on spawned tasks outside it.
//! Followers are broadcast to in registration order, always before any
//! upstream I/O for the same prophecy.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use sibyl_core::{
    BoxFuture, Command, CommandId, ConflictReason, Corpus, Follower, PartitionId, ProphecyView,
    SibylError, SibylResult, Story, TruthSink, Upstream,
};

use crate::{Prophecy, ProphecyQueue};

/// Pluggable soft-conflict policy: given a reapplied story and the truth
/// that triggered the reformation, decide whether they overlap in a way
/// that invalidates the reapplication. The default never conflicts.
pub type SoftConflictPolicy = Arc<dyn Fn(&Story, &Story) -> Option<ConflictReason> + Send + Sync>;

#[derive(Clone, Debug, Default)]
pub struct LedgerStats {
    pub claims: u64,
    pub repeats_deduplicated: u64,
    pub truths_confirmed: u64,
    pub reformations: u64,
    pub conflicts: u64,
}

/// Handle returned by a claim: the optimistic story plus the two awaits
/// the caller may care about.
pub struct ClaimTicket {
    story: Story,
    reactions: Vec<BoxFuture<SibylResult<()>>>,
    final_event: oneshot::Receiver<SibylResult<Command>>,
}

impl ClaimTicket {
    /// The optimistically applied story.
    pub fn story(&self) -> &Story {
        &self.story
    }

    /// Await every follower-returned reaction, in broadcast order.
    pub async fn follower_reactions(&mut self) -> SibylResult<()> {
        for reaction in self.reactions.drain(..) {
            reaction.await?;
        }
        Ok(())
    }

    /// Await the follower reactions, then the authoritative final event.
    pub async fn final_event(mut self) -> SibylResult<Command> {
        self.follower_reactions().await?;
        match self.final_event.await {
            Ok(result) => result,
            Err(_) => Err(SibylError::Internal("upstream claim task dropped".into())),
        }
    }
}

struct Inner<C: Corpus> {
    corpus: C,
    queue: ProphecyQueue<C::State>,
    stats: LedgerStats,
    soft_conflict: SoftConflictPolicy,
}

/// Ordered follower notifications collected under the ledger lock and
/// emitted after it is released.
enum Note<S> {
    Reveal {
        story: Story,
        state: S,
        is_truth: bool,
    },
    Truth(Story),
    Heresy {
        story: Story,
        purged_state: S,
    },
}

struct Shared<C: Corpus> {
    inner: Mutex<Inner<C>>,
    followers: Mutex<Vec<Arc<dyn Follower<C::State>>>>,
    upstream: Arc<dyn Upstream>,
}

pub struct FalseProphet<C: Corpus> {
    shared: Arc<Shared<C>>,
}

impl<C: Corpus> Clone for FalseProphet<C> {
    fn clone(&self) -> Self {
        FalseProphet {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Corpus> FalseProphet<C> {
    pub fn new(corpus: C, upstream: Arc<dyn Upstream>) -> Self {
        FalseProphet {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    corpus,
                    queue: ProphecyQueue::new(),
                    stats: LedgerStats::default(),
                    soft_conflict: Arc::new(|_, _| None),
                }),
                followers: Mutex::new(Vec::new()),
                upstream,
            }),
        }
    }

    pub fn with_soft_conflict_policy(self, policy: SoftConflictPolicy) -> Self {
        self.shared.inner.lock().soft_conflict = policy;
        self
    }

    /// Register a follower. Broadcast order is registration order.
    pub fn add_follower(&self, follower: Arc<dyn Follower<C::State>>) {
        self.shared.followers.lock().push(follower);
    }

    pub fn state(&self) -> C::State {
        self.shared.inner.lock().corpus.state()
    }

    pub fn stats(&self) -> LedgerStats {
        self.shared.inner.lock().stats.clone()
    }

    /// Command ids currently queued, head first.
    pub fn queued_commands(&self) -> Vec<CommandId> {
        self.shared.inner.lock().queue.iter().map(|p| p.command_id()).collect()
    }

    /// Optimistically apply a restricted (not yet universalized) command.
    ///
    /// The corpus mutation and the follower broadcast happen synchronously
    /// before this returns; the universalized command travels upstream on
    /// a spawned task. If upstream rejects it, the prophecy is popped from
    /// the tail and the corpus rewound to its pre-claim snapshot.
    pub fn claim(&self, restricted: Command) -> SibylResult<ClaimTicket> {
        let universal = restricted.clone();
        self.admit(universal, Some(restricted))
    }

    /// Idempotent re-entry for already universalized commands (bootstrap
    /// replay, reformation). Returns `None` when a live prophecy already
    /// carries this command id.
    pub fn repeat_claim(&self, universal: Command) -> SibylResult<Option<ClaimTicket>> {
        {
            let mut inner = self.shared.inner.lock();
            if inner.queue.contains(universal.command_id) {
                inner.stats.repeats_deduplicated += 1;
                return Ok(None);
            }
        }
        self.admit(universal, None).map(Some)
    }

    fn admit(&self, command: Command, restricted: Option<Command>) -> SibylResult<ClaimTicket> {
        let command_id = command.command_id;
        let (story, state) = {
            let mut inner = self.shared.inner.lock();
            let previous_state = inner.corpus.state();
            let story = inner.corpus.dispatch(command.clone())?;
            let state = inner.corpus.state();
            let mut prophecy = Prophecy::new(story.clone(), state.clone(), previous_state);
            if let Some(restricted) = restricted {
                prophecy = prophecy.with_restricted(restricted);
            }
            inner.queue.push_back(prophecy);
            inner.stats.claims += 1;
            (story, state)
        };

        let reactions = self.reveal_to_followers(&story, &state, false);

        let (tx, rx) = oneshot::channel();
        let prophet = self.clone();
        tokio::spawn(async move {
            let result = prophet.shared.upstream.claim(command).await;
            if let Err(error) = &result {
                tracing::warn!(command = %command_id, %error, "upstream rejected claim");
                prophet.rollback_rejected(command_id);
            }
            let _ = tx.send(result);
        });

        Ok(ClaimTicket {
            story,
            reactions,
            final_event: rx,
        })
    }

    /// Reconcile one authoritative event, optionally purging commands the
    /// authority rejected or reordered out of the optimistic history.
    pub fn confirm_truth(&self, truth: Command, purged: Vec<Command>) -> SibylResult<()> {
        let mut notes: Vec<Note<C::State>> = Vec::new();
        let mut revised: Vec<Story> = Vec::new();
        let mut resends: Vec<Command> = Vec::new();

        {
            let mut inner = self.shared.inner.lock();

            // Step 1: detach everything from the earliest purged prophecy
            // to the tail; order past that point is provisional.
            let mut detached: Vec<Prophecy<C::State>> = Vec::new();
            let mut purged_state: Option<C::State> = None;
            if !purged.is_empty() {
                let purged_ids: Vec<CommandId> =
                    purged.iter().map(|c| c.command_id).collect();
                for id in &purged_ids {
                    match inner.queue.get_mut(*id) {
                        Some(prophecy) => prophecy.should_review = true,
                        None => tracing::debug!(command = %id, "purge names unknown command"),
                    }
                }
                if let Some(first_purge) = inner.queue.earliest_of(&purged_ids) {
                    let state = inner
                        .queue
                        .get(first_purge)
                        .expect("earliest_of returned a queued id")
                        .previous_state
                        .clone();
                    detached = inner.queue.detach_suffix(first_purge);
                    inner.corpus.reinitialize(state.clone());
                    purged_state = Some(state);
                    inner.stats.reformations += 1;
                }
            }

            // Step 2: the truth lands at the current tail in arrival
            // order, or upgrades its live optimistic prophecy in place.
            let truth_story = if let Some(existing) = inner.queue.get_mut(truth.command_id) {
                existing.is_truth = true;
                existing.story.command = truth.clone();
                existing.story.clone()
            } else {
                let previous_state = inner.corpus.state();
                let story = match inner.corpus.dispatch(truth.clone()) {
                    Ok(story) => story,
                    Err(error) => {
                        tracing::error!(command = %truth.command_id, %error,
                            "authoritative event failed to apply");
                        return Err(error);
                    }
                };
                let state = inner.corpus.state();
                inner.queue.push_back(
                    Prophecy::new(story.clone(), state.clone(), previous_state).as_truth(),
                );
                notes.push(Note::Reveal {
                    story: story.clone(),
                    state,
                    is_truth: true,
                });
                story
            };

            // Step 3: replay the detached suffix in original order with a
            // cascading conflicted-partition set.
            if let Some(purged_state) = purged_state {
                let mut conflicted: HashSet<PartitionId> = HashSet::new();
                let mut heresies: Vec<Story> = Vec::new();

                for mut old in detached {
                    if inner.queue.contains(old.command_id()) {
                        // Re-admitted already, as the new truth itself.
                        continue;
                    }
                    let partitions: Vec<PartitionId> = old.partition_ids().collect();
                    if let Some(&hit) = partitions.iter().find(|p| conflicted.contains(p)) {
                        old.conflict_reason = Some(ConflictReason::Cascaded(hit));
                        conflicted.extend(partitions);
                        inner.stats.conflicts += 1;
                        heresies.push(old.story.clone());
                        continue;
                    }

                    if old.should_review {
                        self.review_purged(
                            &mut inner,
                            old,
                            &truth_story,
                            &mut conflicted,
                            &mut heresies,
                            &mut revised,
                            &mut resends,
                            &mut notes,
                        );
                    } else {
                        self.readmit_truncated(
                            &mut inner,
                            old,
                            &mut conflicted,
                            &mut heresies,
                            &mut revised,
                            &mut resends,
                            &mut notes,
                        );
                    }
                }

                for story in heresies {
                    notes.push(Note::Heresy {
                        story,
                        purged_state: purged_state.clone(),
                    });
                }
            }

            // Step 4: drain the contiguous run of truths at the head. A
            // non-truth head blocks every truth behind it.
            while inner.queue.front().is_some_and(|p| p.is_truth) {
                let prophecy = inner.queue.pop_front().expect("front checked");
                inner.stats.truths_confirmed += 1;
                notes.push(Note::Truth(prophecy.story));
            }
        }

        self.emit(notes, &revised);
        self.resend(resends);
        Ok(())
    }

    /// Reformation of one purge-named prophecy: re-derive a fresh command
    /// from its restricted form and reapply it.
    #[allow(clippy::too_many_arguments)]
    fn review_purged(
        &self,
        inner: &mut Inner<C>,
        mut old: Prophecy<C::State>,
        truth_story: &Story,
        conflicted: &mut HashSet<PartitionId>,
        heresies: &mut Vec<Story>,
        revised: &mut Vec<Story>,
        resends: &mut Vec<Command>,
        notes: &mut Vec<Note<C::State>>,
    ) {
        let partitions: Vec<PartitionId> = old.partition_ids().collect();
        let Some(restricted) = old.restricted_command.clone() else {
            old.conflict_reason = Some(ConflictReason::Internal(
                "purged prophecy has no restricted command to re-derive".into(),
            ));
            conflicted.extend(partitions);
            inner.stats.conflicts += 1;
            heresies.push(old.story.clone());
            return;
        };

        let mut fresh = restricted.clone();
        for envelope in fresh.partitions.values_mut() {
            envelope.event_id = None;
        }

        let before = inner.corpus.state();
        match inner.corpus.dispatch(fresh.clone()) {
            Err(error) => {
                old.conflict_reason = Some(ConflictReason::ReapplyFailed(error.to_string()));
                conflicted.extend(partitions);
                inner.stats.conflicts += 1;
                heresies.push(old.story.clone());
            }
            Ok(new_story) => {
                if let Some(reason) = (inner.soft_conflict)(&new_story, truth_story) {
                    inner.corpus.reinitialize(before);
                    old.conflict_reason = Some(reason);
                    conflicted.extend(partitions);
                    inner.stats.conflicts += 1;
                    heresies.push(old.story.clone());
                } else {
                    let state = inner.corpus.state();
                    inner.queue.push_back(
                        Prophecy::new(new_story.clone(), state.clone(), before)
                            .with_restricted(restricted),
                    );
                    revised.push(new_story.clone());
                    notes.push(Note::Reveal {
                        story: new_story,
                        state,
                        is_truth: false,
                    });
                    resends.push(fresh);
                }
            }
        }
    }

    /// Re-admission of a prophecy that was only pushed out by truncation.
    /// Failure here is an internal invariant violation, not a purge.
    #[allow(clippy::too_many_arguments)]
    fn readmit_truncated(
        &self,
        inner: &mut Inner<C>,
        mut old: Prophecy<C::State>,
        conflicted: &mut HashSet<PartitionId>,
        heresies: &mut Vec<Story>,
        revised: &mut Vec<Story>,
        resends: &mut Vec<Command>,
        notes: &mut Vec<Note<C::State>>,
    ) {
        let partitions: Vec<PartitionId> = old.partition_ids().collect();
        let command = old.story.command.clone();
        let before = inner.corpus.state();
        match inner.corpus.dispatch(command.clone()) {
            Err(error) => {
                tracing::error!(command = %old.command_id(), %error,
                    "non-purged prophecy failed reformation review");
                old.conflict_reason = Some(ConflictReason::Internal(error.to_string()));
                conflicted.extend(partitions);
                inner.stats.conflicts += 1;
                heresies.push(old.story.clone());
            }
            Ok(new_story) => {
                let state = inner.corpus.state();
                let mut prophecy = Prophecy::new(new_story.clone(), state.clone(), before);
                if let Some(restricted) = old.restricted_command.clone() {
                    prophecy = prophecy.with_restricted(restricted);
                }
                if old.is_truth {
                    // Was already authoritative: re-admit directly.
                    prophecy.is_truth = true;
                } else {
                    resends.push(command);
                    notes.push(Note::Reveal {
                        story: new_story.clone(),
                        state,
                        is_truth: false,
                    });
                }
                inner.queue.push_back(prophecy);
                revised.push(new_story);
            }
        }
    }

    fn reveal_to_followers(
        &self,
        story: &Story,
        state: &C::State,
        is_truth: bool,
    ) -> Vec<BoxFuture<SibylResult<()>>> {
        let followers = self.shared.followers.lock();
        let view = ProphecyView {
            story,
            state,
            is_truth,
        };
        let mut reactions = Vec::new();
        for follower in followers.iter() {
            reactions.extend(follower.reveal_prophecy(&view));
        }
        reactions
    }

    /// Emit collected notifications in order, outside the ledger lock.
    /// Reveal reactions raised here have no claim ticket to ride on, so
    /// they run detached.
    fn emit(&self, notes: Vec<Note<C::State>>, revised: &[Story]) {
        let followers = self.shared.followers.lock().clone();
        for note in notes {
            match note {
                Note::Reveal {
                    story,
                    state,
                    is_truth,
                } => {
                    let view = ProphecyView {
                        story: &story,
                        state: &state,
                        is_truth,
                    };
                    for follower in &followers {
                        for reaction in follower.reveal_prophecy(&view) {
                            tokio::spawn(async move {
                                if let Err(error) = reaction.await {
                                    tracing::warn!(%error, "follower reaction failed");
                                }
                            });
                        }
                    }
                }
                Note::Truth(story) => {
                    for follower in &followers {
                        follower.confirm_truth(&story);
                    }
                }
                Note::Heresy {
                    story,
                    purged_state,
                } => {
                    for follower in &followers {
                        follower.reject_heresy(&story, &purged_state, revised);
                    }
                }
            }
        }
    }

    /// Resend reformed commands upstream. A failure here comes back as a
    /// purge from the authority in a later confirm_truth, so it is only
    /// logged.
    fn resend(&self, resends: Vec<Command>) {
        for command in resends {
            let upstream = Arc::clone(&self.shared.upstream);
            tokio::spawn(async move {
                let command_id = command.command_id;
                if let Err(error) = upstream.claim(command).await {
                    tracing::warn!(command = %command_id, %error,
                        "upstream rejected reformed command");
                }
            });
        }
    }

    /// Undo the optimistic application of a claim whose upstream leg
    /// failed. A rejected prophecy still at the tail is popped and the
    /// corpus rewound point-wise. One buried under later claims forces a
    /// partial reformation: detach the suffix from the rejected prophecy,
    /// rewind to its pre-state, replay the successors in order, and drain
    /// any truth run this frees at the head. Successors are not resent;
    /// their own upstream legs are unaffected by this rejection.
    fn rollback_rejected(&self, command_id: CommandId) {
        let mut notes: Vec<Note<C::State>> = Vec::new();
        let mut revised: Vec<Story> = Vec::new();

        {
            let mut inner = self.shared.inner.lock();
            if !inner.queue.contains(command_id) {
                // Already drained or purged by a reformation.
                return;
            }

            if inner.queue.back().map(|p| p.command_id()) == Some(command_id) {
                let prophecy = inner.queue.pop_back().expect("tail checked");
                inner.corpus.reinitialize(prophecy.previous_state.clone());
                notes.push(Note::Heresy {
                    story: prophecy.story,
                    purged_state: prophecy.previous_state,
                });
            } else {
                let previous = inner
                    .queue
                    .get(command_id)
                    .expect("containment checked")
                    .previous_state
                    .clone();
                let mut detached = inner.queue.detach_suffix(command_id);
                inner.corpus.reinitialize(previous.clone());
                let rejected = detached.remove(0);

                let mut conflicted: HashSet<PartitionId> = HashSet::new();
                let mut heresies: Vec<Story> = vec![rejected.story];

                for mut old in detached {
                    let partitions: Vec<PartitionId> = old.partition_ids().collect();
                    if let Some(&hit) = partitions.iter().find(|p| conflicted.contains(p)) {
                        old.conflict_reason = Some(ConflictReason::Cascaded(hit));
                        conflicted.extend(partitions);
                        inner.stats.conflicts += 1;
                        heresies.push(old.story.clone());
                        continue;
                    }

                    let before = inner.corpus.state();
                    match inner.corpus.dispatch(old.story.command.clone()) {
                        Err(error) => {
                            tracing::error!(command = %old.command_id(), %error,
                                "successor failed rollback replay");
                            old.conflict_reason =
                                Some(ConflictReason::Internal(error.to_string()));
                            conflicted.extend(partitions);
                            inner.stats.conflicts += 1;
                            heresies.push(old.story.clone());
                        }
                        Ok(new_story) => {
                            let state = inner.corpus.state();
                            let mut prophecy =
                                Prophecy::new(new_story.clone(), state.clone(), before);
                            if let Some(restricted) = old.restricted_command.clone() {
                                prophecy = prophecy.with_restricted(restricted);
                            }
                            if old.is_truth {
                                prophecy.is_truth = true;
                            } else {
                                notes.push(Note::Reveal {
                                    story: new_story.clone(),
                                    state,
                                    is_truth: false,
                                });
                            }
                            inner.queue.push_back(prophecy);
                            revised.push(new_story);
                        }
                    }
                }

                for story in heresies {
                    notes.push(Note::Heresy {
                        story,
                        purged_state: previous.clone(),
                    });
                }

                // Removing a pending head can expose a run of truths.
                while inner.queue.front().is_some_and(|p| p.is_truth) {
                    let prophecy = inner.queue.pop_front().expect("front checked");
                    inner.stats.truths_confirmed += 1;
                    notes.push(Note::Truth(prophecy.story));
                }
            }
        }

        self.emit(notes, &revised);
    }
}

impl<C: Corpus> TruthSink for FalseProphet<C> {
    fn confirm_truth(&self, truth: Command, purged: Vec<Command>) -> SibylResult<()> {
        FalseProphet::confirm_truth(self, truth, purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sibyl_core::{AuthorityUri, CommandKind, PartitionEnvelope};
    use sibyl_testkit::{FollowerEvent, MemoryCorpus, RecordingFollower, ScriptedAuthority};

    const LOCAL: &str = "valaa-memory:";

    fn setup() -> (
        FalseProphet<MemoryCorpus>,
        Arc<ScriptedAuthority>,
        Arc<RecordingFollower>,
    ) {
        let authority = Arc::new(ScriptedAuthority::new());
        let prophet = FalseProphet::new(MemoryCorpus::new(), authority.clone());
        let follower = Arc::new(RecordingFollower::new());
        prophet.add_follower(follower.clone());
        (prophet, authority, follower)
    }

    fn command_on(partition: u64, payload: &str) -> Command {
        Command::new(CommandKind::Modify, Bytes::copy_from_slice(payload.as_bytes()))
            .touching(
                sibyl_core::PartitionId::new(partition),
                PartitionEnvelope::new(AuthorityUri::from(LOCAL)),
            )
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_claim_applies_and_reveals_before_upstream() {
        let (prophet, _authority, follower) = setup();

        let ticket = prophet.claim(command_on(1, "set title=hello")).unwrap();
        // Optimistic state and follower broadcast are visible before any
        // upstream await.
        assert_eq!(prophet.state().field("title"), Some("hello"));
        assert_eq!(follower.revealed().len(), 1);

        let confirmed = ticket.final_event().await.unwrap();
        assert!(confirmed.is_universal());
    }

    #[tokio::test]
    async fn test_claim_sequence_matches_plain_dispatch() {
        let (prophet, _authority, _follower) = setup();

        let commands = vec![
            command_on(1, "set a=1"),
            command_on(1, "set b=2"),
            command_on(1, "set a=3; del b"),
        ];
        for command in &commands {
            prophet.claim(command.clone()).unwrap();
        }

        let mut reference = MemoryCorpus::new();
        for command in &commands {
            reference.dispatch(command.clone()).unwrap();
        }
        assert_eq!(prophet.state(), reference.state());
    }

    #[tokio::test]
    async fn test_upstream_rejection_rolls_back() {
        let (prophet, authority, _follower) = setup();

        prophet.claim(command_on(1, "set a=1")).unwrap();
        let before = prophet.state();

        let doomed = command_on(1, "set a=2");
        authority.reject(doomed.command_id);
        let ticket = prophet.claim(doomed).unwrap();
        assert_eq!(prophet.state().field("a"), Some("2"));

        let err = ticket.final_event().await.unwrap_err();
        assert!(matches!(err, SibylError::AuthorityRejected { .. }));
        assert_eq!(prophet.state(), before);
        assert_eq!(prophet.queued_commands().len(), 1);
    }

    #[tokio::test]
    async fn test_repeat_claim_is_idempotent() {
        let (prophet, _authority, follower) = setup();

        let command = command_on(1, "set a=1");
        let ticket = prophet.claim(command.clone()).unwrap();
        let universal = ticket.final_event().await.unwrap();

        assert!(prophet.repeat_claim(universal).unwrap().is_none());
        assert_eq!(follower.revealed().len(), 1);
        assert_eq!(prophet.queued_commands().len(), 1);
        assert_eq!(prophet.stats().repeats_deduplicated, 1);
    }

    #[tokio::test]
    async fn test_confirm_truth_drains_fifo() {
        let (prophet, _authority, follower) = setup();

        let c1 = command_on(1, "set a=1");
        let c2 = command_on(1, "set b=2");
        let t1 = prophet.claim(c1.clone()).unwrap().final_event().await.unwrap();
        let t2 = prophet.claim(c2.clone()).unwrap().final_event().await.unwrap();

        prophet.confirm_truth(t1, Vec::new()).unwrap();
        prophet.confirm_truth(t2, Vec::new()).unwrap();

        assert_eq!(follower.confirmed(), vec![c1.command_id, c2.command_id]);
        assert!(prophet.queued_commands().is_empty());
    }

    #[tokio::test]
    async fn test_pending_head_blocks_later_truths() {
        let (prophet, _authority, follower) = setup();

        let c1 = command_on(1, "set a=1");
        let c2 = command_on(1, "set b=2");
        let c3 = command_on(1, "set c=3");
        let t1 = prophet.claim(c1.clone()).unwrap().final_event().await.unwrap();
        let t2 = prophet.claim(c2.clone()).unwrap().final_event().await.unwrap();
        let t3 = prophet.claim(c3.clone()).unwrap().final_event().await.unwrap();

        // Authority confirms the later commands first; the pending head
        // holds everything back.
        prophet.confirm_truth(t2, Vec::new()).unwrap();
        prophet.confirm_truth(t3, Vec::new()).unwrap();
        assert!(follower.confirmed().is_empty());

        prophet.confirm_truth(t1, Vec::new()).unwrap();
        assert_eq!(
            follower.confirmed(),
            vec![c1.command_id, c2.command_id, c3.command_id]
        );
    }

    #[tokio::test]
    async fn test_foreign_truth_fabricated_and_confirmed() {
        let (prophet, _authority, follower) = setup();

        let foreign = command_on(1, "set remote=yes");
        prophet.confirm_truth(foreign.clone(), Vec::new()).unwrap();

        assert_eq!(prophet.state().field("remote"), Some("yes"));
        assert_eq!(follower.confirmed(), vec![foreign.command_id]);
        assert!(follower.events().contains(&FollowerEvent::Revealed {
            command: foreign.command_id,
            is_truth: true,
        }));
    }

    #[tokio::test]
    async fn test_reformation_replays_survivors() {
        let (prophet, _authority, follower) = setup();

        let c1 = command_on(1, "set a=1");
        let c2 = command_on(1, "set b=2");
        let purged_snapshot = prophet.state();
        prophet.claim(c1.clone()).unwrap();
        prophet.claim(c2.clone()).unwrap();

        let truth = command_on(1, "set a=9");
        prophet.confirm_truth(truth.clone(), vec![c1.clone()]).unwrap();
        settle().await;

        // Purged c1 re-derived and reapplied after the truth, c2 replayed.
        assert_eq!(
            prophet.queued_commands(),
            vec![c1.command_id, c2.command_id]
        );
        assert_eq!(prophet.state().field("a"), Some("1"));
        assert_eq!(prophet.state().field("b"), Some("2"));
        assert_eq!(follower.confirmed(), vec![truth.command_id]);
        assert_eq!(prophet.stats().reformations, 1);

        // Reformation correctness: replaying the survivors against the
        // pre-purge snapshot reproduces the final state.
        let mut reference = MemoryCorpus::new();
        reference.reinitialize(purged_snapshot);
        reference.dispatch(truth).unwrap();
        reference.dispatch(c1).unwrap();
        reference.dispatch(c2).unwrap();
        assert_eq!(prophet.state(), reference.state());
    }

    #[tokio::test]
    async fn test_hard_conflict_cascades_across_partitions() {
        let (prophet, _authority, follower) = setup();

        // Seed a confirmed truth the purged command depends on.
        let seed = command_on(1, "set flag=on");
        let seed_truth = prophet.claim(seed).unwrap().final_event().await.unwrap();
        prophet.confirm_truth(seed_truth, Vec::new()).unwrap();

        let c1 = command_on(1, "require flag=on; set a=1");
        let c2 = command_on(1, "set b=2");
        let c3 = command_on(2, "set c=3");
        prophet.claim(c1.clone()).unwrap();
        prophet.claim(c2.clone()).unwrap();
        prophet.claim(c3.clone()).unwrap();

        // The authority removes the flag and purges c1; its requirement
        // now fails on replay, and c2 shares the conflicted partition.
        let truth = command_on(1, "del flag");
        prophet.confirm_truth(truth.clone(), vec![c1.clone()]).unwrap();
        settle().await;

        assert_eq!(follower.rejected(), vec![c1.command_id, c2.command_id]);
        assert_eq!(prophet.queued_commands(), vec![c3.command_id]);
        assert_eq!(prophet.state().field("flag"), None);
        assert_eq!(prophet.state().field("a"), None);
        assert_eq!(prophet.state().field("b"), None);
        assert_eq!(prophet.state().field("c"), Some("3"));
        assert_eq!(prophet.stats().conflicts, 2);
        let confirmed = follower.confirmed();
        assert_eq!(confirmed.last(), Some(&truth.command_id));
    }

    #[tokio::test]
    async fn test_soft_conflict_policy_rolls_back_reapplication() {
        let authority = Arc::new(ScriptedAuthority::new());
        let prophet = FalseProphet::new(MemoryCorpus::new(), authority.clone())
            .with_soft_conflict_policy(Arc::new(|reapplied, truth| {
                // Overlapping modification with the new truth.
                let overlaps = reapplied.passages.iter().any(|p| {
                    truth.passages.iter().any(|t| t.field == p.field)
                });
                overlaps.then_some(ConflictReason::Overlap)
            }));
        let follower = Arc::new(RecordingFollower::new());
        prophet.add_follower(follower.clone());

        let c1 = command_on(1, "set x=1");
        prophet.claim(c1.clone()).unwrap();

        let truth = command_on(1, "set x=5");
        prophet.confirm_truth(truth.clone(), vec![c1.clone()]).unwrap();
        settle().await;

        assert_eq!(prophet.state().field("x"), Some("5"));
        assert_eq!(follower.rejected(), vec![c1.command_id]);
        assert!(prophet.queued_commands().is_empty());
        assert_eq!(prophet.stats().conflicts, 1);
    }

    #[tokio::test]
    async fn test_truncated_truth_readmitted_directly() {
        let (prophet, authority, follower) = setup();

        let c1 = command_on(1, "set a=1");
        prophet.claim(c1.clone()).unwrap();

        // A foreign truth lands behind the pending head and stays queued.
        let blocked = command_on(1, "set z=1");
        prophet.confirm_truth(blocked.clone(), Vec::new()).unwrap();
        assert!(follower.confirmed().is_empty());

        // Purging c1 detaches both; the blocked truth must come back as a
        // truth without being resent upstream.
        let truth = command_on(1, "set a=9");
        prophet.confirm_truth(truth.clone(), vec![c1.clone()]).unwrap();
        settle().await;

        assert_eq!(
            prophet.queued_commands(),
            vec![c1.command_id, blocked.command_id]
        );
        assert_eq!(follower.confirmed(), vec![truth.command_id]);
        let resent = authority
            .claimed()
            .iter()
            .filter(|c| c.command_id == blocked.command_id)
            .count();
        assert_eq!(resent, 0);
    }

    #[tokio::test]
    async fn test_follower_reactions_are_awaited() {
        let authority = Arc::new(ScriptedAuthority::new());
        let prophet = FalseProphet::new(MemoryCorpus::new(), authority);
        let follower = Arc::new(RecordingFollower::reacting());
        prophet.add_follower(follower.clone());

        let mut ticket = prophet.claim(command_on(1, "set a=1")).unwrap();
        ticket.follower_reactions().await.unwrap();
        let confirmed = ticket.final_event().await.unwrap();
        assert!(confirmed.is_universal());
    }

    #[tokio::test]
    async fn test_rejection_of_buried_claim_rewinds_and_replays() {
        let (prophet, authority, follower) = setup();

        let doomed = command_on(1, "set a=1");
        authority.reject(doomed.command_id);
        let ticket = prophet.claim(doomed.clone()).unwrap();
        // A later claim buries the doomed one before the rejection lands.
        let survivor = command_on(1, "set b=2");
        prophet.claim(survivor.clone()).unwrap();

        let err = ticket.final_event().await.unwrap_err();
        assert!(matches!(err, SibylError::AuthorityRejected { .. }));
        settle().await;

        // The rejected mutation is gone, the survivor replayed on top.
        assert_eq!(prophet.state().field("a"), None);
        assert_eq!(prophet.state().field("b"), Some("2"));
        assert_eq!(prophet.queued_commands(), vec![survivor.command_id]);
        assert_eq!(follower.rejected(), vec![doomed.command_id]);
    }

    #[tokio::test]
    async fn test_rejection_cascades_to_dependent_successor() {
        let (prophet, authority, follower) = setup();

        let doomed = command_on(1, "set flag=on");
        authority.reject(doomed.command_id);
        let ticket = prophet.claim(doomed.clone()).unwrap();
        let dependent = command_on(1, "require flag=on; set a=1");
        prophet.claim(dependent.clone()).unwrap();

        ticket.final_event().await.unwrap_err();
        settle().await;

        assert_eq!(prophet.state().field("flag"), None);
        assert_eq!(prophet.state().field("a"), None);
        assert!(prophet.queued_commands().is_empty());
        assert_eq!(
            follower.rejected(),
            vec![doomed.command_id, dependent.command_id]
        );
        assert_eq!(prophet.stats().conflicts, 1);
    }

    #[tokio::test]
    async fn test_rejection_unblocks_truth_behind_it() {
        let (prophet, authority, follower) = setup();

        let doomed = command_on(1, "set a=1");
        authority.reject(doomed.command_id);
        let ticket = prophet.claim(doomed.clone()).unwrap();

        // A foreign truth queues behind the pending head.
        let foreign = command_on(1, "set z=9");
        prophet.confirm_truth(foreign.clone(), Vec::new()).unwrap();
        assert!(follower.confirmed().is_empty());

        ticket.final_event().await.unwrap_err();
        settle().await;

        // Rolling back the head exposed the truth, which confirms.
        assert_eq!(follower.confirmed(), vec![foreign.command_id]);
        assert_eq!(prophet.state().field("z"), Some("9"));
        assert_eq!(prophet.state().field("a"), None);
        assert!(prophet.queued_commands().is_empty());
    }

    proptest::proptest! {
        #[test]
        fn prop_reformation_replay_matches_reference(
            entries in proptest::collection::vec(
                (0u8..4, proptest::prelude::any::<u8>(), proptest::prelude::any::<bool>()),
                1..10,
            ),
        ) {
            proptest::prop_assume!(entries.iter().any(|(_, _, purged)| *purged));

            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            runtime.block_on(async {
                let (prophet, _authority, _follower) = setup();

                let mut commands = Vec::new();
                for (key, value, _) in &entries {
                    let command = command_on(1, &format!("set k{key}={value}"));
                    prophet.claim(command.clone()).unwrap();
                    commands.push(command);
                }

                let purged: Vec<Command> = entries
                    .iter()
                    .zip(&commands)
                    .filter(|((_, _, purged), _)| *purged)
                    .map(|(_, command)| command.clone())
                    .collect();
                let first_idx = entries.iter().position(|(_, _, p)| *p).unwrap();

                let truth = command_on(1, "set truth=1");
                prophet.confirm_truth(truth.clone(), purged).unwrap();

                // Replaying the survivors against the pre-purge snapshot
                // reproduces the final state exactly.
                let mut reference = MemoryCorpus::new();
                for command in &commands[..first_idx] {
                    reference.dispatch(command.clone()).unwrap();
                }
                reference.dispatch(truth).unwrap();
                for command in &commands[first_idx..] {
                    reference.dispatch(command.clone()).unwrap();
                }
                assert_eq!(prophet.state(), reference.state());
            });
        }
    }
}
