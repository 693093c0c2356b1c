use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::phase::PhaseSnapshot,
    state::session::{AnswerDisplay, AnswerValue, Question},
};

/// Messages accepted from WebSocket clients.
///
/// The first message on a fresh socket must identify the participant: `host`
/// with the session's host token, or `join` with a display name. Everything
/// else is rejected until the role is established.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Claim the host role using the token returned at session creation.
    Host {
        /// Per-session host token.
        token: Uuid,
    },
    /// Join (or rejoin) the session as a player.
    Join {
        /// Display name, unique within the session.
        name: String,
    },
    /// Host: open question `index` and start its answer window.
    StartQuestion {
        /// Index of the question to open.
        index: usize,
    },
    /// Host: close the answer window of the open question early.
    CloseQuestion,
    /// Host: advance to the question after the current one.
    NextQuestion,
    /// Host: end the game and publish the final leaderboard.
    EndGame,
    /// Host: remove a player from the session.
    KickPlayer {
        /// Display name of the player to remove.
        name: String,
    },
    /// Player: submit an answer for the open question.
    SubmitAnswer {
        /// The answer value.
        answer: AnswerValueDto,
        /// Client-side submission timestamp, informational only.
        #[serde(default)]
        sent_at_ms: Option<u64>,
    },
    /// Keepalive; refreshes the host liveness window.
    Heartbeat,
    /// Forward-compatibility catch-all for unknown message types.
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Parse a client message from its JSON text frame.
    pub fn from_json_str(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

/// Wire representation of an answer value.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerValueDto {
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

impl From<AnswerValueDto> for AnswerValue {
    fn from(value: AnswerValueDto) -> Self {
        match value {
            AnswerValueDto::Choice { id } => AnswerValue::Choice(id),
            AnswerValueDto::Text { text } => AnswerValue::Text(text),
        }
    }
}

impl From<&AnswerValue> for AnswerValueDto {
    fn from(value: &AnswerValue) -> Self {
        match value {
            AnswerValue::Choice(id) => AnswerValueDto::Choice { id: *id },
            AnswerValue::Text(text) => AnswerValueDto::Text { text: text.clone() },
        }
    }
}

/// Role a connection was admitted as.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    /// The single authoritative controller connection.
    Host,
    /// A joined player.
    Player,
}

/// Why a player left the session.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    /// The connection dropped; the player record survives for a rejoin.
    Disconnected,
    /// The host removed the player.
    Kicked,
}

/// One selectable choice as sent to a participant.
///
/// `text` is omitted when the session's answer-display mode keeps choice
/// texts on the host screen; players then answer by index only.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChoicePayload {
    /// Index of the choice.
    pub id: u32,
    /// Choice text, when visible to the recipient.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Question content pushed when a round opens.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuestionPayload {
    /// Index of the question.
    pub index: usize,
    /// Total number of questions in the session.
    pub total: usize,
    /// Prompt shown to all participants.
    pub prompt: String,
    /// Choices of the question, absent for free-text questions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<ChoicePayload>>,
    /// Answer window length in milliseconds.
    pub time_limit_ms: u64,
}

impl QuestionPayload {
    /// Build the payload for a player device, honoring the display mode.
    pub fn for_player(
        question: &Question,
        index: usize,
        total: usize,
        display: AnswerDisplay,
    ) -> Self {
        Self::build(question, index, total, display == AnswerDisplay::OnDevice)
    }

    /// Build the payload for the host screen; texts are always visible.
    pub fn for_host(question: &Question, index: usize, total: usize) -> Self {
        Self::build(question, index, total, true)
    }

    fn build(question: &Question, index: usize, total: usize, show_texts: bool) -> Self {
        let choices = question.choices().map(|choices| {
            choices
                .iter()
                .enumerate()
                .map(|(id, choice)| ChoicePayload {
                    id: id as u32,
                    text: show_texts.then(|| choice.text.clone()),
                })
                .collect()
        });

        Self {
            index,
            total,
            prompt: question.prompt.clone(),
            choices,
            time_limit_ms: question.time_limit.as_millis() as u64,
        }
    }
}

/// Per-player outcome of a closed question.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ResultEntry {
    /// Player display name.
    pub name: String,
    /// Whether the answer was correct.
    pub correct: bool,
    /// Points awarded for the answer.
    pub points: i64,
    /// The answer the player submitted.
    pub answer: AnswerValueDto,
}

/// Number of accepted answers that picked one choice.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChoiceCount {
    /// Index of the choice.
    pub id: u32,
    /// How many accepted answers picked it.
    pub count: usize,
}

/// Final standing of one player on the leaderboard.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StandingPayload {
    /// Player display name.
    pub name: String,
    /// Final cumulative score.
    pub score: i64,
    /// Number of correct answers.
    pub correct: usize,
    /// Number of questions the player answered at all.
    pub answered: usize,
}

/// Roster entry pushed alongside lobby updates.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlayerSnapshot {
    /// Player display name.
    pub name: String,
    /// Cumulative score.
    pub score: i64,
    /// Whether a live connection is currently associated.
    pub connected: bool,
}

/// Messages pushed from the server to participants.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Acknowledges a successful `host`/`join` and synchronizes the view.
    Welcome {
        /// Role the connection was admitted as.
        role: ParticipantRole,
        /// PIN of the session.
        pin: String,
        /// Display title of the quiz.
        title: String,
        /// Current phase of the session.
        phase: PhaseSnapshot,
        /// Display name, for players.
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Resumed cumulative score, for rejoining players.
        #[serde(skip_serializing_if = "Option::is_none")]
        score: Option<i64>,
        /// Current roster, for the host.
        #[serde(skip_serializing_if = "Option::is_none")]
        players: Option<Vec<PlayerSnapshot>>,
        /// The open question, when one is running.
        #[serde(skip_serializing_if = "Option::is_none")]
        question: Option<QuestionPayload>,
    },
    /// Broadcast whenever the session phase changes.
    PhaseChanged {
        /// New phase.
        phase: PhaseSnapshot,
    },
    /// Pushed when a question opens.
    Question {
        /// Question content, shaped per recipient.
        #[serde(flatten)]
        payload: QuestionPayload,
    },
    /// Confirms that a submitted answer was accepted.
    AnswerAccepted {
        /// Index of the question the answer was recorded for.
        index: usize,
    },
    /// Host only: number of accepted answers for the open question.
    AnswerCount {
        /// Index of the open question.
        index: usize,
        /// Accepted answers so far.
        count: usize,
    },
    /// Host only: a player joined or rejoined.
    PlayerJoined {
        /// Display name of the player.
        name: String,
        /// Roster size after the join.
        players: usize,
    },
    /// Host only: a player disconnected or was kicked.
    PlayerLeft {
        /// Display name of the player.
        name: String,
        /// Why the player left.
        reason: LeaveReason,
    },
    /// Broadcast when a question closes.
    Results {
        /// Index of the closed question.
        index: usize,
        /// Per-player outcomes.
        entries: Vec<ResultEntry>,
        /// Choice distribution, for choice-based questions.
        distribution: Vec<ChoiceCount>,
    },
    /// Broadcast when the session finishes.
    Leaderboard {
        /// Final standings, best score first.
        standings: Vec<StandingPayload>,
    },
    /// Tells a player they were removed from the session.
    Kicked,
    /// Reports a rejected command or submission to its sender only.
    Error {
        /// Stable machine-readable code.
        code: String,
        /// Human-readable explanation.
        message: String,
    },
}

impl ServerMessage {
    /// Build an error message from a service error.
    pub fn error(err: &crate::error::ServiceError) -> Self {
        ServerMessage::Error {
            code: err.code().to_owned(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::session::{Choice, QuestionKind};
    use std::time::Duration;

    fn question() -> Question {
        Question {
            prompt: "Pick one".into(),
            time_limit: Duration::from_secs(30),
            kind: QuestionKind::MultipleChoice {
                choices: vec![
                    Choice {
                        text: "left".into(),
                        correct: true,
                    },
                    Choice {
                        text: "right".into(),
                        correct: false,
                    },
                ],
            },
        }
    }

    #[test]
    fn parses_tagged_client_messages() {
        let message = ClientMessage::from_json_str(r#"{"type":"join","name":"Ada"}"#).unwrap();
        assert!(matches!(message, ClientMessage::Join { name } if name == "Ada"));

        let message = ClientMessage::from_json_str(
            r#"{"type":"submit_answer","answer":{"kind":"choice","id":2}}"#,
        )
        .unwrap();
        assert!(matches!(
            message,
            ClientMessage::SubmitAnswer {
                answer: AnswerValueDto::Choice { id: 2 },
                sent_at_ms: None
            }
        ));
    }

    #[test]
    fn unknown_message_types_fall_back_to_unknown() {
        let message = ClientMessage::from_json_str(r#"{"type":"dance"}"#).unwrap();
        assert!(matches!(message, ClientMessage::Unknown));
    }

    #[test]
    fn player_payload_hides_texts_in_host_screen_mode() {
        let payload =
            QuestionPayload::for_player(&question(), 0, 3, AnswerDisplay::HostScreen);
        let choices = payload.choices.unwrap();
        assert_eq!(choices.len(), 2);
        assert!(choices.iter().all(|choice| choice.text.is_none()));

        let payload = QuestionPayload::for_player(&question(), 0, 3, AnswerDisplay::OnDevice);
        let choices = payload.choices.unwrap();
        assert_eq!(choices[0].text.as_deref(), Some("left"));
    }

    #[test]
    fn host_payload_always_shows_texts() {
        let payload = QuestionPayload::for_host(&question(), 1, 3);
        assert!(
            payload
                .choices
                .unwrap()
                .iter()
                .all(|choice| choice.text.is_some())
        );
    }
}
