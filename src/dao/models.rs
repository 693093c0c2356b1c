use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

use crate::state::state_machine::{FinishReason, SessionPhase};

/// Session record stored under `session:<PIN>`, shared across layers.
///
/// Players and score entries live in their own namespaced sub-collections
/// (`session:<PIN>:players`, `session:<PIN>:scores`) and are not embedded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Internal session identifier.
    pub id: Uuid,
    /// PIN the session is addressed by while active.
    pub pin: String,
    /// Display title of the quiz being played.
    pub title: String,
    /// Token the host connection must present.
    pub host_token: Uuid,
    /// Answer-display mode for player devices.
    pub answer_display: AnswerDisplayEntity,
    /// Ordered questions of the session.
    pub questions: Vec<QuestionEntity>,
    /// Index of the question currently (or last) played.
    pub current_index: Option<usize>,
    /// Persisted phase; the engine is the sole writer.
    pub phase: PhaseEntity,
    /// Creation timestamp for auditing.
    pub created_at: SystemTime,
    /// Moment the record becomes eligible for eviction.
    pub expires_at: SystemTime,
}

/// Persisted answer-display mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerDisplayEntity {
    /// Choice texts are sent to player devices.
    OnDevice,
    /// Players only see choice indices.
    HostScreen,
}

/// Question entry inside a session record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionEntity {
    /// Prompt shown to all participants.
    pub prompt: String,
    /// Answer window length in milliseconds.
    pub time_limit_ms: u64,
    /// Kind-specific content.
    pub kind: QuestionKindEntity,
}

/// Persisted kind-specific question content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionKindEntity {
    /// Pick one choice out of a fixed set.
    MultipleChoice {
        /// The selectable choices, addressed by index.
        choices: Vec<ChoiceEntity>,
    },
    /// Free-text answer compared against accepted strings.
    FreeText {
        /// Accepted answer strings.
        accepted: Vec<String>,
    },
    /// Poll without a correct answer.
    Voting {
        /// The selectable choices, addressed by index.
        choices: Vec<ChoiceEntity>,
    },
}

/// Persisted choice of a multiple-choice or voting question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChoiceEntity {
    /// Text shown for the choice.
    pub text: String,
    /// Whether picking this choice counts as correct.
    pub correct: bool,
}

/// Persisted session phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PhaseEntity {
    /// Players can join; no question opened yet.
    Lobby,
    /// A question is open.
    QuestionOpen {
        /// Index of the open question.
        index: usize,
    },
    /// The current question is closed.
    QuestionClosed {
        /// Index of the closed question.
        index: usize,
    },
    /// Terminal phase.
    Finished {
        /// Why the session ended.
        reason: FinishReasonEntity,
    },
}

/// Persisted reason a session finished.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReasonEntity {
    /// The last question was closed and no further index exists.
    QuestionsExhausted,
    /// The host ended the game explicitly.
    HostEnded,
    /// The host stayed silent past the heartbeat threshold.
    HostLost,
    /// The process shut down and flushed the session.
    Shutdown,
}

impl From<SessionPhase> for PhaseEntity {
    fn from(value: SessionPhase) -> Self {
        match value {
            SessionPhase::Lobby => PhaseEntity::Lobby,
            SessionPhase::QuestionOpen { index } => PhaseEntity::QuestionOpen { index },
            SessionPhase::QuestionClosed { index } => PhaseEntity::QuestionClosed { index },
            SessionPhase::Finished { reason } => PhaseEntity::Finished {
                reason: reason.into(),
            },
        }
    }
}

impl From<PhaseEntity> for SessionPhase {
    fn from(value: PhaseEntity) -> Self {
        match value {
            PhaseEntity::Lobby => SessionPhase::Lobby,
            PhaseEntity::QuestionOpen { index } => SessionPhase::QuestionOpen { index },
            PhaseEntity::QuestionClosed { index } => SessionPhase::QuestionClosed { index },
            PhaseEntity::Finished { reason } => SessionPhase::Finished {
                reason: reason.into(),
            },
        }
    }
}

impl From<FinishReason> for FinishReasonEntity {
    fn from(value: FinishReason) -> Self {
        match value {
            FinishReason::QuestionsExhausted => FinishReasonEntity::QuestionsExhausted,
            FinishReason::HostEnded => FinishReasonEntity::HostEnded,
            FinishReason::HostLost => FinishReasonEntity::HostLost,
            FinishReason::Shutdown => FinishReasonEntity::Shutdown,
        }
    }
}

impl From<FinishReasonEntity> for FinishReason {
    fn from(value: FinishReasonEntity) -> Self {
        match value {
            FinishReasonEntity::QuestionsExhausted => FinishReason::QuestionsExhausted,
            FinishReasonEntity::HostEnded => FinishReason::HostEnded,
            FinishReasonEntity::HostLost => FinishReason::HostLost,
            FinishReasonEntity::Shutdown => FinishReason::Shutdown,
        }
    }
}

/// Player record stored under `session:<PIN>:players`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Display name, unique within the session.
    pub name: String,
    /// Cumulative score over all closed questions.
    pub score: i64,
    /// When the player first joined.
    pub joined_at: SystemTime,
}

/// Persisted answer value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerValueEntity {
    /// Index of the picked choice.
    Choice {
        /// Index of the picked choice.
        id: u32,
    },
    /// Free-text answer.
    Text {
        /// Submitted text.
        text: String,
    },
}

/// One accepted answer, stored append-only under `session:<PIN>:scores`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreEntryEntity {
    /// Player the entry belongs to.
    pub player: String,
    /// Question the answer was given for.
    pub question_index: usize,
    /// The submitted answer value.
    pub answer: AnswerValueEntity,
    /// Whether the answer was correct.
    pub correct: bool,
    /// Points awarded for the answer.
    pub points: i64,
    /// Server-side latency between question open and submission.
    pub latency_ms: u64,
}

/// Final standing of one player inside a results record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StandingEntity {
    /// Player display name.
    pub name: String,
    /// Final cumulative score.
    pub score: i64,
    /// Number of correct answers.
    pub correct: usize,
    /// Number of questions the player answered at all.
    pub answered: usize,
}

/// Durable results record emitted when a session finishes.
///
/// Unlike the live session records this carries no TTL; it is the payload
/// handed to the results persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FinalResultsEntity {
    /// PIN the session was played under.
    pub pin: String,
    /// Internal session identifier.
    pub session_id: Uuid,
    /// Display title of the quiz.
    pub title: String,
    /// Why the session ended.
    pub reason: FinishReasonEntity,
    /// When the session reached the terminal phase.
    pub finished_at: SystemTime,
    /// Final per-player standings, best score first.
    pub standings: Vec<StandingEntity>,
    /// Every accepted answer of the session.
    pub entries: Vec<ScoreEntryEntity>,
}
