use std::time::SystemTime;

use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dao::models::{
    AnswerDisplayEntity, AnswerValueEntity, FinalResultsEntity, FinishReasonEntity, PhaseEntity,
    PlayerEntity, QuestionEntity, ScoreEntryEntity, SessionEntity, StandingEntity,
};

/// Session record as stored in the `sessions` collection, keyed by PIN.
///
/// `expires_at` backs the TTL index, so it must be a real BSON date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    pub pin: String,
    pub session_id: Uuid,
    pub title: String,
    pub host_token: Uuid,
    pub answer_display: AnswerDisplayEntity,
    pub questions: Vec<QuestionEntity>,
    pub current_index: Option<usize>,
    pub phase: PhaseEntity,
    pub created_at: DateTime,
    pub expires_at: DateTime,
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            pin: value.pin,
            session_id: value.id,
            title: value.title,
            host_token: value.host_token,
            answer_display: value.answer_display,
            questions: value.questions,
            current_index: value.current_index,
            phase: value.phase,
            created_at: DateTime::from_system_time(value.created_at),
            expires_at: DateTime::from_system_time(value.expires_at),
        }
    }
}

impl From<MongoSessionDocument> for SessionEntity {
    fn from(value: MongoSessionDocument) -> Self {
        Self {
            id: value.session_id,
            pin: value.pin,
            title: value.title,
            host_token: value.host_token,
            answer_display: value.answer_display,
            questions: value.questions,
            current_index: value.current_index,
            phase: value.phase,
            created_at: value.created_at.to_system_time(),
            expires_at: value.expires_at.to_system_time(),
        }
    }
}

/// Player record as stored in the `players` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPlayerDocument {
    pub pin: String,
    pub name: String,
    pub score: i64,
    pub joined_at: DateTime,
    pub expires_at: DateTime,
}

impl MongoPlayerDocument {
    pub fn new(pin: &str, player: PlayerEntity, expires_at: SystemTime) -> Self {
        Self {
            pin: pin.to_owned(),
            name: player.name,
            score: player.score,
            joined_at: DateTime::from_system_time(player.joined_at),
            expires_at: DateTime::from_system_time(expires_at),
        }
    }
}

impl From<MongoPlayerDocument> for PlayerEntity {
    fn from(value: MongoPlayerDocument) -> Self {
        Self {
            name: value.name,
            score: value.score,
            joined_at: value.joined_at.to_system_time(),
        }
    }
}

/// Score entry as stored in the `scores` collection, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoScoreDocument {
    pub pin: String,
    pub player: String,
    pub question_index: usize,
    pub answer: AnswerValueEntity,
    pub correct: bool,
    pub points: i64,
    pub latency_ms: u64,
    pub expires_at: DateTime,
}

impl MongoScoreDocument {
    pub fn new(pin: &str, entry: ScoreEntryEntity, expires_at: SystemTime) -> Self {
        Self {
            pin: pin.to_owned(),
            player: entry.player,
            question_index: entry.question_index,
            answer: entry.answer,
            correct: entry.correct,
            points: entry.points,
            latency_ms: entry.latency_ms,
            expires_at: DateTime::from_system_time(expires_at),
        }
    }
}

impl From<MongoScoreDocument> for ScoreEntryEntity {
    fn from(value: MongoScoreDocument) -> Self {
        Self {
            player: value.player,
            question_index: value.question_index,
            answer: value.answer,
            correct: value.correct,
            points: value.points,
            latency_ms: value.latency_ms,
        }
    }
}

/// Durable results record as stored in the `results` collection, keyed by PIN.
///
/// Deliberately carries no `expires_at`; results outlive the live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoResultsDocument {
    #[serde(rename = "_id")]
    pub pin: String,
    pub session_id: Uuid,
    pub title: String,
    pub reason: FinishReasonEntity,
    pub finished_at: DateTime,
    pub standings: Vec<StandingEntity>,
    pub entries: Vec<ScoreEntryEntity>,
}

impl From<FinalResultsEntity> for MongoResultsDocument {
    fn from(value: FinalResultsEntity) -> Self {
        Self {
            pin: value.pin,
            session_id: value.session_id,
            title: value.title,
            reason: value.reason,
            finished_at: DateTime::from_system_time(value.finished_at),
            standings: value.standings,
            entries: value.entries,
        }
    }
}

impl From<MongoResultsDocument> for FinalResultsEntity {
    fn from(value: MongoResultsDocument) -> Self {
        Self {
            pin: value.pin,
            session_id: value.session_id,
            title: value.title,
            reason: value.reason,
            finished_at: value.finished_at.to_system_time(),
            standings: value.standings,
            entries: value.entries,
        }
    }
}
