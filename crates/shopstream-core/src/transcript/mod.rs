//! Transcript state and the message reducer.
//!
//! [`TranscriptState::apply`] folds one [`Message`] into the state and returns
//! the next state. The open slot (the entry receiving `state`/`token`
//! messages) is an explicit field: terminal messages clear it, and messages
//! that need a slot are dropped while it is clear.

mod steps;

use serde::Serialize;
use serde_json::Value;
pub use steps::{Stage, StageRule, StepLabel, StepPolicy, default_stage_rules};

use crate::message::Message;

/// Text used when an error message carries no description.
pub const UNKNOWN_ERROR: &str = "unknown error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One recorded progress step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub stage: Stage,
    pub label: String,
}

/// Visible steps of one stage, for grouped display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageGroup<'a> {
    pub stage: Stage,
    pub labels: Vec<&'a str>,
    /// The stage is in progress on an unfinished entry.
    pub active: bool,
}

/// One conversational turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    role: Role,
    text: String,
    steps: Vec<Step>,
    current_stage: Option<Stage>,
    done: bool,
}

impl TranscriptEntry {
    fn user(text: &str) -> Self {
        Self {
            role: Role::User,
            text: text.to_string(),
            steps: Vec::new(),
            current_stage: None,
            done: true,
        }
    }

    fn assistant_pending() -> Self {
        Self {
            role: Role::Assistant,
            text: String::new(),
            steps: Vec::new(),
            current_stage: None,
            done: false,
        }
    }

    fn assistant_notice(text: String) -> Self {
        Self {
            role: Role::Assistant,
            text,
            steps: Vec::new(),
            current_stage: None,
            done: true,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn current_stage(&self) -> Option<Stage> {
        self.current_stage
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Groups step labels by stage in display order.
    ///
    /// The current stage is included even when it has no visible step.
    pub fn stage_groups(&self) -> Vec<StageGroup<'_>> {
        Stage::DISPLAY_ORDER
            .iter()
            .filter_map(|&stage| {
                let labels: Vec<&str> = self
                    .steps
                    .iter()
                    .filter(|step| step.stage == stage)
                    .map(|step| step.label.as_str())
                    .collect();
                let current = self.current_stage == Some(stage);
                (!labels.is_empty() || current).then_some(StageGroup {
                    stage,
                    labels,
                    active: current && !self.done,
                })
            })
            .collect()
    }

    fn push_step(&mut self, stage: Stage, label: String) {
        if !self.steps.iter().any(|step| step.label == label) {
            self.steps.push(Step { stage, label });
        }
    }
}

/// The whole conversation plus the per-turn streaming context.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TranscriptState {
    entries: Vec<TranscriptEntry>,
    open_slot: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    final_meta: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
}

impl TranscriptState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a turn: records the user query and opens a slot on a fresh
    /// assistant entry. A slot still open from a previous turn is abandoned
    /// and its entry marked done.
    #[must_use]
    pub fn begin_turn(mut self, query: &str) -> Self {
        self.close_slot();
        self.final_meta = None;
        self.message_id = None;
        self.entries.push(TranscriptEntry::user(query));
        self.entries.push(TranscriptEntry::assistant_pending());
        self.open_slot = Some(self.entries.len() - 1);
        self
    }

    /// Applies one message and returns the next state. Never fails.
    #[must_use]
    pub fn apply(mut self, message: &Message, policy: &StepPolicy) -> Self {
        self.reduce(message, policy);
        self
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Index of the entry currently receiving `state`/`token` messages.
    pub fn open_slot(&self) -> Option<usize> {
        self.open_slot
    }

    pub fn open_entry(&self) -> Option<&TranscriptEntry> {
        self.open_slot.and_then(|idx| self.entries.get(idx))
    }

    pub fn final_meta(&self) -> Option<&Value> {
        self.final_meta.as_ref()
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Returns true when no turn is receiving updates.
    pub fn is_idle(&self) -> bool {
        self.open_slot.is_none()
    }

    fn reduce(&mut self, message: &Message, policy: &StepPolicy) {
        match message {
            Message::Start { message_id, .. } => {
                if let Some(id) = message_id {
                    self.message_id = Some(id.clone());
                }
            }
            Message::State { node, update_keys } => {
                let label = policy.label(node, update_keys);
                if label == StepLabel::Empty {
                    return;
                }
                let stage = policy.classify(node);
                if let Some(entry) = self.open_entry_mut() {
                    if let StepLabel::Visible(label) = label {
                        entry.push_step(stage, label);
                    }
                    entry.current_stage = Some(stage);
                }
            }
            Message::Token { delta } => {
                if let Some(entry) = self.open_entry_mut() {
                    entry.text.push_str(delta);
                }
            }
            Message::Final(payload) => {
                self.final_meta = Some(payload.clone());
                self.close_slot();
            }
            Message::Error { error, .. } => {
                let text = error.as_deref().unwrap_or(UNKNOWN_ERROR);
                self.entries
                    .push(TranscriptEntry::assistant_notice(format!("Error: {text}")));
                self.close_slot();
            }
            Message::Done => self.close_slot(),
            Message::Unknown { .. } => {}
        }
    }

    fn open_entry_mut(&mut self) -> Option<&mut TranscriptEntry> {
        self.open_slot.and_then(|idx| self.entries.get_mut(idx))
    }

    fn close_slot(&mut self) {
        if let Some(entry) = self
            .open_slot
            .take()
            .and_then(|idx| self.entries.get_mut(idx))
        {
            entry.done = true;
        }
    }
}
