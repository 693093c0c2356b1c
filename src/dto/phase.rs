use serde::Serialize;
use utoipa::ToSchema;

use crate::state::state_machine::SessionPhase;

/// Publicly visible session phase exposed to clients (REST/WebSocket).
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisiblePhase {
    /// Players can join; no question opened yet.
    Lobby,
    /// A question is open and accepting answers.
    QuestionOpen,
    /// The current question is closed; results are available.
    QuestionClosed,
    /// The session is over; the final leaderboard is available.
    Finished,
}

impl From<&SessionPhase> for VisiblePhase {
    fn from(value: &SessionPhase) -> Self {
        match value {
            SessionPhase::Lobby => VisiblePhase::Lobby,
            SessionPhase::QuestionOpen { .. } => VisiblePhase::QuestionOpen,
            SessionPhase::QuestionClosed { .. } => VisiblePhase::QuestionClosed,
            SessionPhase::Finished { .. } => VisiblePhase::Finished,
        }
    }
}

/// Snapshot describing the current phase and question position.
#[derive(Debug, Serialize, ToSchema, Clone, Copy)]
pub struct PhaseSnapshot {
    /// Current phase of the session.
    pub phase: VisiblePhase,
    /// Index of the current question while one is open or closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl From<&SessionPhase> for PhaseSnapshot {
    fn from(value: &SessionPhase) -> Self {
        Self {
            phase: value.into(),
            index: value.question_index(),
        }
    }
}
