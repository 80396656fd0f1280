//! Recording follower - captures every broadcast in arrival order

use parking_lot::Mutex;

use sibyl_core::{BoxFuture, CommandId, Follower, ProphecyView, SibylResult, Story};

use crate::GraphState;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FollowerEvent {
    Revealed { command: CommandId, is_truth: bool },
    Confirmed { command: CommandId },
    Rejected { command: CommandId, revised: Vec<CommandId> },
}

#[derive(Default)]
pub struct RecordingFollower {
    events: Mutex<Vec<FollowerEvent>>,
    /// When set, every reveal returns one ready reaction future.
    react: bool,
}

impl RecordingFollower {
    pub fn new() -> Self {
        RecordingFollower::default()
    }

    pub fn reacting() -> Self {
        RecordingFollower {
            events: Mutex::new(Vec::new()),
            react: true,
        }
    }

    pub fn events(&self) -> Vec<FollowerEvent> {
        self.events.lock().clone()
    }

    pub fn confirmed(&self) -> Vec<CommandId> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                FollowerEvent::Confirmed { command } => Some(*command),
                _ => None,
            })
            .collect()
    }

    pub fn revealed(&self) -> Vec<CommandId> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                FollowerEvent::Revealed { command, .. } => Some(*command),
                _ => None,
            })
            .collect()
    }

    pub fn rejected(&self) -> Vec<CommandId> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                FollowerEvent::Rejected { command, .. } => Some(*command),
                _ => None,
            })
            .collect()
    }
}

impl Follower<GraphState> for RecordingFollower {
    fn reveal_prophecy(
        &self,
        prophecy: &ProphecyView<'_, GraphState>,
    ) -> Vec<BoxFuture<SibylResult<()>>> {
        self.events.lock().push(FollowerEvent::Revealed {
            command: prophecy.story.command_id(),
            is_truth: prophecy.is_truth,
        });
        if self.react {
            vec![Box::pin(async { Ok(()) })]
        } else {
            Vec::new()
        }
    }

    fn confirm_truth(&self, story: &Story) {
        self.events.lock().push(FollowerEvent::Confirmed {
            command: story.command_id(),
        });
    }

    fn reject_heresy(&self, story: &Story, _purged_state: &GraphState, revised: &[Story]) {
        self.events.lock().push(FollowerEvent::Rejected {
            command: story.command_id(),
            revised: revised.iter().map(Story::command_id).collect(),
        });
    }
}
