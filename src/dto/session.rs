use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    dao::models::{FinalResultsEntity, FinishReasonEntity},
    dto::{format_system_time, phase::PhaseSnapshot, ws::StandingPayload},
    state::session::{AnswerDisplay, Choice, LiveSession, Question, QuestionKind},
};

/// Shortest accepted answer window, in milliseconds.
const MIN_TIME_LIMIT_MS: u64 = 5_000;
/// Longest accepted answer window, in milliseconds.
const MAX_TIME_LIMIT_MS: u64 = 600_000;

/// Payload used to open a brand-new live session.
///
/// The question list is the quiz content collaborator's output, passed
/// through verbatim; this core never authors or edits quiz content.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateSessionRequest {
    /// Display title of the quiz.
    #[validate(length(min = 1, max = 120))]
    pub title: String,
    /// Ordered questions to play.
    #[validate(length(min = 1), nested)]
    pub questions: Vec<QuestionInput>,
    /// Whether player devices show choice texts. Defaults to showing them.
    #[serde(default)]
    pub answer_display: AnswerDisplayDto,
}

/// Wire representation of the answer-display mode.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnswerDisplayDto {
    /// Choice texts are sent to player devices.
    #[default]
    OnDevice,
    /// Players only see choice indices; texts stay on the host screen.
    HostScreen,
}

impl From<AnswerDisplayDto> for AnswerDisplay {
    fn from(value: AnswerDisplayDto) -> Self {
        match value {
            AnswerDisplayDto::OnDevice => AnswerDisplay::OnDevice,
            AnswerDisplayDto::HostScreen => AnswerDisplay::HostScreen,
        }
    }
}

/// Incoming question definition for the session bootstrap.
#[derive(Debug, Deserialize, ToSchema)]
pub struct QuestionInput {
    /// Prompt shown to all participants.
    pub prompt: String,
    /// Answer window length in milliseconds.
    pub time_limit_ms: u64,
    /// Kind-specific content.
    #[serde(flatten)]
    pub kind: QuestionKindInput,
}

/// Kind-specific content of an incoming question.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionKindInput {
    /// Pick one choice out of a fixed set.
    MultipleChoice {
        /// The selectable choices.
        choices: Vec<ChoiceInput>,
    },
    /// Free-text answer compared against accepted strings.
    FreeText {
        /// Accepted answer strings.
        accepted: Vec<String>,
    },
    /// Poll without a correct answer.
    Voting {
        /// The selectable choices.
        choices: Vec<ChoiceInput>,
    },
}

/// Incoming choice definition.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ChoiceInput {
    /// Text shown for the choice.
    pub text: String,
    /// Whether picking this choice counts as correct.
    #[serde(default)]
    pub correct: bool,
}

impl Validate for QuestionInput {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.prompt.trim().is_empty() {
            let mut err = ValidationError::new("prompt_blank");
            err.message = Some("Question prompt must not be blank".into());
            errors.add("prompt", err);
        }

        if !(MIN_TIME_LIMIT_MS..=MAX_TIME_LIMIT_MS).contains(&self.time_limit_ms) {
            let mut err = ValidationError::new("time_limit_range");
            err.message = Some(
                format!(
                    "Time limit must be between {MIN_TIME_LIMIT_MS} and {MAX_TIME_LIMIT_MS} ms"
                )
                .into(),
            );
            errors.add("time_limit_ms", err);
        }

        match &self.kind {
            QuestionKindInput::MultipleChoice { choices } => {
                if choices.len() < 2 {
                    let mut err = ValidationError::new("choices_count");
                    err.message =
                        Some("Multiple-choice questions need at least two choices".into());
                    errors.add("choices", err);
                } else if !choices.iter().any(|choice| choice.correct) {
                    let mut err = ValidationError::new("choices_no_correct");
                    err.message =
                        Some("Multiple-choice questions need a correct choice".into());
                    errors.add("choices", err);
                }
            }
            QuestionKindInput::FreeText { accepted } => {
                if accepted.iter().all(|answer| answer.trim().is_empty()) {
                    let mut err = ValidationError::new("accepted_empty");
                    err.message =
                        Some("Free-text questions need at least one accepted answer".into());
                    errors.add("accepted", err);
                }
            }
            QuestionKindInput::Voting { choices } => {
                if choices.len() < 2 {
                    let mut err = ValidationError::new("choices_count");
                    err.message = Some("Voting questions need at least two choices".into());
                    errors.add("choices", err);
                }
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

impl From<QuestionInput> for Question {
    fn from(value: QuestionInput) -> Self {
        let kind = match value.kind {
            QuestionKindInput::MultipleChoice { choices } => QuestionKind::MultipleChoice {
                choices: choices.into_iter().map(Into::into).collect(),
            },
            QuestionKindInput::FreeText { accepted } => QuestionKind::FreeText { accepted },
            QuestionKindInput::Voting { choices } => QuestionKind::Voting {
                choices: choices.into_iter().map(Into::into).collect(),
            },
        };

        Self {
            prompt: value.prompt,
            time_limit: Duration::from_millis(value.time_limit_ms),
            kind,
        }
    }
}

impl From<ChoiceInput> for Choice {
    fn from(value: ChoiceInput) -> Self {
        Self {
            text: value.text,
            correct: value.correct,
        }
    }
}

/// Summary returned once a session has been created.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionCreatedResponse {
    /// PIN players use to join.
    pub pin: String,
    /// Internal session identifier.
    pub session_id: Uuid,
    /// Token the host WebSocket must present.
    pub host_token: Uuid,
    /// Display title of the quiz.
    pub title: String,
    /// Number of questions in the session.
    pub question_count: usize,
    /// RFC3339 creation timestamp.
    pub created_at: String,
}

impl From<&LiveSession> for SessionCreatedResponse {
    fn from(value: &LiveSession) -> Self {
        Self {
            pin: value.pin.clone(),
            session_id: value.id,
            host_token: value.host_token,
            title: value.title.clone(),
            question_count: value.questions.len(),
            created_at: format_system_time(value.created_at),
        }
    }
}

/// Public projection of a live session exposed over REST.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionSummary {
    /// PIN the session is addressed by.
    pub pin: String,
    /// Display title of the quiz.
    pub title: String,
    /// Current phase and question position.
    pub phase: PhaseSnapshot,
    /// Number of questions in the session.
    pub question_count: usize,
    /// Current roster with cumulative scores.
    pub players: Vec<PlayerStanding>,
    /// RFC3339 creation timestamp.
    pub created_at: String,
}

/// Roster entry of a session summary.
#[derive(Debug, Serialize, ToSchema)]
pub struct PlayerStanding {
    /// Player display name.
    pub name: String,
    /// Cumulative score.
    pub score: i64,
}

/// Final results exposed over REST once a session finished.
#[derive(Debug, Serialize, ToSchema)]
pub struct FinalResultsResponse {
    /// PIN the session was played under.
    pub pin: String,
    /// Display title of the quiz.
    pub title: String,
    /// Why the session ended.
    pub reason: FinishReasonDto,
    /// RFC3339 timestamp of the finish.
    pub finished_at: String,
    /// Final standings, best score first.
    pub standings: Vec<StandingPayload>,
}

/// Wire representation of a finish reason.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FinishReasonDto {
    /// The last question was closed and no further index exists.
    QuestionsExhausted,
    /// The host ended the game explicitly.
    HostEnded,
    /// The host stayed silent past the heartbeat threshold.
    HostLost,
    /// The process shut down and flushed the session.
    Shutdown,
}

impl From<FinishReasonEntity> for FinishReasonDto {
    fn from(value: FinishReasonEntity) -> Self {
        match value {
            FinishReasonEntity::QuestionsExhausted => FinishReasonDto::QuestionsExhausted,
            FinishReasonEntity::HostEnded => FinishReasonDto::HostEnded,
            FinishReasonEntity::HostLost => FinishReasonDto::HostLost,
            FinishReasonEntity::Shutdown => FinishReasonDto::Shutdown,
        }
    }
}

impl From<FinalResultsEntity> for FinalResultsResponse {
    fn from(value: FinalResultsEntity) -> Self {
        Self {
            pin: value.pin,
            title: value.title,
            reason: value.reason.into(),
            finished_at: format_system_time(value.finished_at),
            standings: value
                .standings
                .into_iter()
                .map(|standing| StandingPayload {
                    name: standing.name,
                    score: standing.score,
                    correct: standing.correct,
                    answered: standing.answered,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choice(text: &str, correct: bool) -> ChoiceInput {
        ChoiceInput {
            text: text.into(),
            correct,
        }
    }

    #[test]
    fn accepts_a_well_formed_multiple_choice_question() {
        let question = QuestionInput {
            prompt: "Which keyword borrows?".into(),
            time_limit_ms: 60_000,
            kind: QuestionKindInput::MultipleChoice {
                choices: vec![choice("ref", true), choice("move", false)],
            },
        };
        assert!(question.validate().is_ok());
    }

    #[test]
    fn rejects_multiple_choice_without_a_correct_answer() {
        let question = QuestionInput {
            prompt: "Pick one".into(),
            time_limit_ms: 60_000,
            kind: QuestionKindInput::MultipleChoice {
                choices: vec![choice("a", false), choice("b", false)],
            },
        };
        assert!(question.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_time_limits() {
        let question = QuestionInput {
            prompt: "Too fast".into(),
            time_limit_ms: 100,
            kind: QuestionKindInput::FreeText {
                accepted: vec!["yes".into()],
            },
        };
        assert!(question.validate().is_err());
    }

    #[test]
    fn voting_needs_no_correct_choice() {
        let question = QuestionInput {
            prompt: "Tabs or spaces?".into(),
            time_limit_ms: 20_000,
            kind: QuestionKindInput::Voting {
                choices: vec![choice("tabs", false), choice("spaces", false)],
            },
        };
        assert!(question.validate().is_ok());
    }

    #[test]
    fn question_input_deserializes_with_flattened_kind() {
        let question: QuestionInput = serde_json::from_str(
            r#"{
                "prompt": "2 + 2?",
                "time_limit_ms": 30000,
                "kind": "multiple_choice",
                "choices": [
                    {"text": "4", "correct": true},
                    {"text": "5"}
                ]
            }"#,
        )
        .unwrap();
        assert!(matches!(
            question.kind,
            QuestionKindInput::MultipleChoice { ref choices } if choices.len() == 2
        ));
    }
}
