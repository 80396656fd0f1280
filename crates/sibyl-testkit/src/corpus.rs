//! In-memory corpus speaking a tiny textual op language
//!
//! Command payloads are utf8, semicolon-separated ops:
//! - `set key=value`     write a field
//! - `del key`           remove a field
//! - `require key=value` fail unless the field currently has that value
//!
//! `require` is what tests use to manufacture hard conflicts: a command
//! that succeeded against the optimistic state can fail when reformation
//! replays it against the authority's.

use std::collections::BTreeMap;
use std::sync::Arc;

use sibyl_core::{Command, CommandId, Corpus, Passage, SibylError, SibylResult, Story};

/// Cheap-to-clone snapshot of the graph: fields plus the applied log.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct GraphState(Arc<GraphStateInner>);

#[derive(Debug, PartialEq, Eq, Default)]
struct GraphStateInner {
    fields: BTreeMap<String, String>,
    log: Vec<CommandId>,
}

impl GraphState {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.0.fields.get(key).map(String::as_str)
    }

    /// Command ids applied to reach this state, in order.
    pub fn log(&self) -> &[CommandId] {
        &self.0.log
    }
}

#[derive(Default)]
pub struct MemoryCorpus {
    state: GraphState,
}

impl MemoryCorpus {
    pub fn new() -> Self {
        MemoryCorpus::default()
    }
}

impl Corpus for MemoryCorpus {
    type State = GraphState;

    fn dispatch(&mut self, action: Command) -> SibylResult<Story> {
        let text = std::str::from_utf8(&action.payload)
            .map_err(|_| SibylError::Corpus("non-utf8 payload".into()))?;

        // Apply against a scratch copy so a failing op leaves the
        // corpus untouched.
        let mut fields = self.state.0.fields.clone();
        let mut passages = Vec::new();
        for op in text.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            match op.split_once(' ') {
                Some(("set", assignment)) => {
                    let (key, value) = assignment
                        .split_once('=')
                        .ok_or_else(|| SibylError::Corpus(format!("bad set op: {op}")))?;
                    fields.insert(key.to_string(), value.to_string());
                    passages.push(Passage::new(key, value.as_bytes().to_vec()));
                }
                Some(("del", key)) => {
                    fields.remove(key);
                    passages.push(Passage::new(key, Vec::new()));
                }
                Some(("require", assignment)) => {
                    let (key, value) = assignment
                        .split_once('=')
                        .ok_or_else(|| SibylError::Corpus(format!("bad require op: {op}")))?;
                    if fields.get(key).map(String::as_str) != Some(value) {
                        return Err(SibylError::Corpus(format!(
                            "requirement failed: {key} != {value}"
                        )));
                    }
                }
                _ => return Err(SibylError::Corpus(format!("unknown op: {op}"))),
            }
        }

        let mut log = self.state.0.log.clone();
        log.push(action.command_id);
        self.state = GraphState(Arc::new(GraphStateInner { fields, log }));
        Ok(Story::new(action, passages))
    }

    fn reinitialize(&mut self, state: Self::State) {
        self.state = state;
    }

    fn state(&self) -> Self::State {
        self.state.clone()
    }
}
