use std::time::{Duration, SystemTime};

use indexmap::IndexMap;
use uuid::Uuid;

use crate::dao::models::{
    AnswerDisplayEntity, AnswerValueEntity, ChoiceEntity, PhaseEntity, PlayerEntity,
    QuestionEntity, QuestionKindEntity, SessionEntity,
};

/// Controls whether answer texts are pushed to player devices or only shown
/// on the shared host screen. Presentation detail, never scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerDisplay {
    /// Choice texts are sent to player devices.
    OnDevice,
    /// Players only see choice indices; texts stay on the host screen.
    HostScreen,
}

/// One selectable choice of a multiple-choice or voting question.
#[derive(Debug, Clone)]
pub struct Choice {
    /// Text shown for the choice.
    pub text: String,
    /// Whether picking this choice counts as correct.
    pub correct: bool,
}

/// Kind-specific content of a question.
#[derive(Debug, Clone)]
pub enum QuestionKind {
    /// Pick one choice out of a fixed set.
    MultipleChoice {
        /// The selectable choices, addressed by index.
        choices: Vec<Choice>,
    },
    /// Free-text answer compared against accepted strings.
    FreeText {
        /// Accepted answers; matching is case-insensitive after trimming.
        accepted: Vec<String>,
    },
    /// Poll without a correct answer; submissions are recorded but score 0.
    Voting {
        /// The selectable choices, addressed by index.
        choices: Vec<Choice>,
    },
}

/// A single question of the session, supplied by the quiz content collaborator.
#[derive(Debug, Clone)]
pub struct Question {
    /// Prompt shown to all participants.
    pub prompt: String,
    /// Answer window length for this question.
    pub time_limit: Duration,
    /// Kind-specific content.
    pub kind: QuestionKind,
}

/// The value a player submits for a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerValue {
    /// Index of the picked choice.
    Choice(u32),
    /// Free-text answer.
    Text(String),
}

impl Question {
    /// Whether the answer value is shaped correctly for this question kind.
    ///
    /// A mismatched shape is a validation failure, not a wrong answer: it must
    /// be rejected without consuming the player's single submission.
    pub fn accepts(&self, answer: &AnswerValue) -> bool {
        match (&self.kind, answer) {
            (QuestionKind::MultipleChoice { choices }, AnswerValue::Choice(id))
            | (QuestionKind::Voting { choices }, AnswerValue::Choice(id)) => {
                (*id as usize) < choices.len()
            }
            (QuestionKind::FreeText { .. }, AnswerValue::Text(_)) => true,
            _ => false,
        }
    }

    /// Evaluate the correctness of a well-shaped answer.
    pub fn evaluate(&self, answer: &AnswerValue) -> bool {
        match (&self.kind, answer) {
            (QuestionKind::MultipleChoice { choices }, AnswerValue::Choice(id)) => choices
                .get(*id as usize)
                .is_some_and(|choice| choice.correct),
            (QuestionKind::FreeText { accepted }, AnswerValue::Text(text)) => {
                let submitted = text.trim();
                accepted
                    .iter()
                    .any(|known| known.trim().eq_ignore_ascii_case(submitted))
            }
            // Voting has no correct answer.
            _ => false,
        }
    }

    /// Whether correct answers to this question award points.
    pub fn scored(&self) -> bool {
        !matches!(self.kind, QuestionKind::Voting { .. })
    }

    /// Choices of the question, if the kind has any.
    pub fn choices(&self) -> Option<&[Choice]> {
        match &self.kind {
            QuestionKind::MultipleChoice { choices } | QuestionKind::Voting { choices } => {
                Some(choices)
            }
            QuestionKind::FreeText { .. } => None,
        }
    }
}

/// Player info tracked during a live session.
///
/// Identity is the display name, unique within the session; the record
/// survives transient disconnects so a rejoin resumes score and history.
#[derive(Debug, Clone)]
pub struct Player {
    /// Display name chosen by the player.
    pub name: String,
    /// Cumulative score over all closed questions.
    pub score: i64,
    /// When the player first joined.
    pub joined_at: SystemTime,
    /// Whether a live connection is currently associated.
    pub connected: bool,
}

/// Aggregated state for one live session, owned by its engine task.
#[derive(Debug, Clone)]
pub struct LiveSession {
    /// Internal session identifier.
    pub id: Uuid,
    /// Human-enterable PIN players use to join.
    pub pin: String,
    /// Display title of the quiz being played.
    pub title: String,
    /// Token the host connection must present.
    pub host_token: Uuid,
    /// Answer-display mode for player devices.
    pub answer_display: AnswerDisplay,
    /// Ordered questions supplied by the quiz content collaborator.
    pub questions: Vec<Question>,
    /// Index of the question currently (or last) played.
    pub current_index: Option<usize>,
    /// Creation timestamp for auditing.
    pub created_at: SystemTime,
    /// Joined players keyed by display name, in join order.
    pub players: IndexMap<String, Player>,
}

impl LiveSession {
    /// Build a fresh session in the lobby with no players.
    pub fn new(
        pin: String,
        title: String,
        answer_display: AnswerDisplay,
        questions: Vec<Question>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            pin,
            title,
            host_token: Uuid::new_v4(),
            answer_display,
            questions,
            current_index: None,
            created_at: SystemTime::now(),
            players: IndexMap::new(),
        }
    }

    /// The question at `index`, if it exists.
    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }
}

impl From<ChoiceEntity> for Choice {
    fn from(value: ChoiceEntity) -> Self {
        Self {
            text: value.text,
            correct: value.correct,
        }
    }
}

impl From<Choice> for ChoiceEntity {
    fn from(value: Choice) -> Self {
        Self {
            text: value.text,
            correct: value.correct,
        }
    }
}

impl From<QuestionKindEntity> for QuestionKind {
    fn from(value: QuestionKindEntity) -> Self {
        match value {
            QuestionKindEntity::MultipleChoice { choices } => QuestionKind::MultipleChoice {
                choices: choices.into_iter().map(Into::into).collect(),
            },
            QuestionKindEntity::FreeText { accepted } => QuestionKind::FreeText { accepted },
            QuestionKindEntity::Voting { choices } => QuestionKind::Voting {
                choices: choices.into_iter().map(Into::into).collect(),
            },
        }
    }
}

impl From<QuestionKind> for QuestionKindEntity {
    fn from(value: QuestionKind) -> Self {
        match value {
            QuestionKind::MultipleChoice { choices } => QuestionKindEntity::MultipleChoice {
                choices: choices.into_iter().map(Into::into).collect(),
            },
            QuestionKind::FreeText { accepted } => QuestionKindEntity::FreeText { accepted },
            QuestionKind::Voting { choices } => QuestionKindEntity::Voting {
                choices: choices.into_iter().map(Into::into).collect(),
            },
        }
    }
}

impl From<QuestionEntity> for Question {
    fn from(value: QuestionEntity) -> Self {
        Self {
            prompt: value.prompt,
            time_limit: Duration::from_millis(value.time_limit_ms),
            kind: value.kind.into(),
        }
    }
}

impl From<Question> for QuestionEntity {
    fn from(value: Question) -> Self {
        Self {
            prompt: value.prompt,
            time_limit_ms: value.time_limit.as_millis() as u64,
            kind: value.kind.into(),
        }
    }
}

impl From<AnswerDisplayEntity> for AnswerDisplay {
    fn from(value: AnswerDisplayEntity) -> Self {
        match value {
            AnswerDisplayEntity::OnDevice => AnswerDisplay::OnDevice,
            AnswerDisplayEntity::HostScreen => AnswerDisplay::HostScreen,
        }
    }
}

impl From<AnswerDisplay> for AnswerDisplayEntity {
    fn from(value: AnswerDisplay) -> Self {
        match value {
            AnswerDisplay::OnDevice => AnswerDisplayEntity::OnDevice,
            AnswerDisplay::HostScreen => AnswerDisplayEntity::HostScreen,
        }
    }
}

impl From<AnswerValueEntity> for AnswerValue {
    fn from(value: AnswerValueEntity) -> Self {
        match value {
            AnswerValueEntity::Choice { id } => AnswerValue::Choice(id),
            AnswerValueEntity::Text { text } => AnswerValue::Text(text),
        }
    }
}

impl From<AnswerValue> for AnswerValueEntity {
    fn from(value: AnswerValue) -> Self {
        match value {
            AnswerValue::Choice(id) => AnswerValueEntity::Choice { id },
            AnswerValue::Text(text) => AnswerValueEntity::Text { text },
        }
    }
}

impl From<PlayerEntity> for Player {
    fn from(value: PlayerEntity) -> Self {
        Self {
            name: value.name,
            score: value.score,
            joined_at: value.joined_at,
            connected: false,
        }
    }
}

impl From<Player> for PlayerEntity {
    fn from(value: Player) -> Self {
        Self {
            name: value.name,
            score: value.score,
            joined_at: value.joined_at,
        }
    }
}

impl From<SessionEntity> for LiveSession {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id,
            pin: value.pin,
            title: value.title,
            host_token: value.host_token,
            answer_display: value.answer_display.into(),
            questions: value.questions.into_iter().map(Into::into).collect(),
            current_index: value.current_index,
            created_at: value.created_at,
            players: IndexMap::new(),
        }
    }
}

impl LiveSession {
    /// Snapshot the session into its persisted form.
    pub fn to_entity(&self, phase: PhaseEntity, expires_at: SystemTime) -> SessionEntity {
        SessionEntity {
            id: self.id,
            pin: self.pin.clone(),
            title: self.title.clone(),
            host_token: self.host_token,
            answer_display: self.answer_display.into(),
            questions: self.questions.iter().cloned().map(Into::into).collect(),
            current_index: self.current_index,
            phase,
            created_at: self.created_at,
            expires_at,
        }
    }
}
