use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    dao::models::{HistoryItemEntity, HistoryMode},
    dto::{format_system_time, validation::validate_identifier},
    state::session::PlayMode,
};

/// Query of `GET /history`. Exactly one of `userId` and `cookieId` is expected.
#[derive(Debug, Deserialize, IntoParams, Validate)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Authenticated user.
    #[validate(custom(function = "validate_identifier"))]
    pub user_id: Option<String>,
    /// Guest browser cookie.
    #[validate(custom(function = "validate_identifier"))]
    pub cookie_id: Option<String>,
    /// `quiz`, `tournament` (includes deferred play) or `practice`.
    #[param(value_type = Option<String>)]
    pub mode: Option<HistoryMode>,
}

/// One completed session in a user's history.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    /// Session access code, or practice run id.
    pub access_code: String,
    /// How the session was played.
    pub play_mode: PlayMode,
    /// RFC 3339 completion time.
    pub completed_at: String,
    /// Final score; the best attempt in deferred sessions.
    pub score: i64,
    /// Attempts started.
    pub attempt_count: u32,
    /// Questions in the session.
    pub question_count: u32,
}

impl From<HistoryItemEntity> for HistoryItem {
    fn from(item: HistoryItemEntity) -> Self {
        let HistoryItemEntity {
            session,
            participant,
        } = item;
        Self {
            score: if session.play_mode.is_deferred() {
                participant.deferred_score
            } else {
                participant.live_score
            },
            access_code: session.access_code,
            play_mode: session.play_mode,
            completed_at: format_system_time(session.completed_at),
            attempt_count: participant.attempt_count,
            question_count: session.question_count,
        }
    }
}
