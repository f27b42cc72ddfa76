use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    dao::models::{ParticipantRecordEntity, SessionRecordEntity},
    state::session::PlayMode,
};

/// Row of the `session_records` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: Uuid,
    /// Session access code, indexed.
    pub access_code: String,
    play_mode: PlayMode,
    controller_id: String,
    question_count: u32,
    created_at: DateTime,
    completed_at: DateTime,
}

impl From<SessionRecordEntity> for MongoSessionDocument {
    fn from(value: SessionRecordEntity) -> Self {
        Self {
            id: value.id,
            access_code: value.access_code,
            play_mode: value.play_mode,
            controller_id: value.controller_id,
            question_count: value.question_count,
            created_at: DateTime::from_system_time(value.created_at),
            completed_at: DateTime::from_system_time(value.completed_at),
        }
    }
}

impl From<MongoSessionDocument> for SessionRecordEntity {
    fn from(value: MongoSessionDocument) -> Self {
        Self {
            id: value.id,
            access_code: value.access_code,
            play_mode: value.play_mode,
            controller_id: value.controller_id,
            question_count: value.question_count,
            created_at: value.created_at.to_system_time(),
            completed_at: value.completed_at.to_system_time(),
        }
    }
}

/// Row of the `participant_records` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoParticipantDocument {
    #[serde(rename = "_id")]
    id: Uuid,
    /// Session access code, indexed.
    pub access_code: String,
    /// Participant, unique per session.
    pub user_id: String,
    #[serde(default)]
    cookie_id: Option<String>,
    display_name: String,
    live_score: i64,
    deferred_score: i64,
    attempt_count: u32,
    joined_at: DateTime,
    completed_at: DateTime,
}

impl From<ParticipantRecordEntity> for MongoParticipantDocument {
    fn from(value: ParticipantRecordEntity) -> Self {
        Self {
            id: value.id,
            access_code: value.access_code,
            user_id: value.user_id,
            cookie_id: value.cookie_id,
            display_name: value.display_name,
            live_score: value.live_score,
            deferred_score: value.deferred_score,
            attempt_count: value.attempt_count,
            joined_at: DateTime::from_system_time(value.joined_at),
            completed_at: DateTime::from_system_time(value.completed_at),
        }
    }
}

impl From<MongoParticipantDocument> for ParticipantRecordEntity {
    fn from(value: MongoParticipantDocument) -> Self {
        Self {
            id: value.id,
            access_code: value.access_code,
            user_id: value.user_id,
            cookie_id: value.cookie_id,
            display_name: value.display_name,
            live_score: value.live_score,
            deferred_score: value.deferred_score,
            attempt_count: value.attempt_count,
            joined_at: value.joined_at.to_system_time(),
            completed_at: value.completed_at.to_system_time(),
        }
    }
}
