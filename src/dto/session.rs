//! DTOs of the live-session REST API.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    dto::{
        format_system_time,
        validation::{validate_access_code, validate_identifier},
    },
    services::session_service::{FinalResults, NewSession},
    state::{
        question::Question,
        session::{Audience, LeaderboardEntry, LiveSession, PlayMode, QuestionTimer},
        state_machine::SessionPhase,
    },
};

/// Request body of `POST /sessions`.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Requested access code. Generated when omitted.
    #[validate(custom(function = "validate_access_code"))]
    pub access_code: Option<String>,
    /// How the session is played. `practice` is refused here.
    pub play_mode: PlayMode,
    /// User allowed to drive the session.
    #[validate(custom(function = "validate_identifier"))]
    pub controller_id: String,
    /// Question bank uids, in play order.
    #[serde(default)]
    pub question_uids: Vec<String>,
    /// Inline definitions, played after the bank questions.
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl From<CreateSessionRequest> for NewSession {
    fn from(request: CreateSessionRequest) -> Self {
        Self {
            access_code: request.access_code,
            play_mode: request.play_mode,
            controller_id: request.controller_id,
            question_uids: request.question_uids,
            questions: request.questions,
        }
    }
}

/// Public view of a live session.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session access code.
    pub access_code: String,
    /// How the session is played.
    pub play_mode: PlayMode,
    /// Lifecycle phase.
    pub status: SessionPhase,
    /// User driving the session.
    pub controller_id: String,
    /// Index of the open question.
    pub current_question_index: usize,
    /// Size of the question pool.
    pub question_count: usize,
    /// Users who joined at least once.
    pub participant_count: usize,
    /// Timer of the open question.
    pub timer: Option<QuestionTimer>,
    /// The open question no longer accepts answers.
    pub answers_locked: bool,
    /// RFC 3339 creation time.
    pub created_at: String,
}

impl From<&LiveSession> for SessionSummary {
    fn from(session: &LiveSession) -> Self {
        Self {
            access_code: session.access_code.clone(),
            play_mode: session.play_mode,
            status: session.phase(),
            controller_id: session.controller_id.clone(),
            current_question_index: session.current_question_index,
            question_count: session.questions.len(),
            participant_count: session.participants.len(),
            timer: session.timer.clone(),
            answers_locked: session.answers_locked,
            created_at: format_system_time(session.created_at),
        }
    }
}

/// Query of `GET /sessions/{code}/leaderboard`.
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct LeaderboardQuery {
    /// Viewer kind. Defaults to `student`, which only sees the revealed snapshot.
    pub audience: Option<Audience>,
    /// Required for `teacher` and `projector`: must be the session controller.
    pub actor_id: Option<String>,
}

/// Response of `GET /sessions/{code}/leaderboard`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardResponse {
    /// Session access code.
    pub access_code: String,
    /// Audience the entries were computed for.
    pub audience: Audience,
    /// Ranked entries, best first.
    pub entries: Vec<LeaderboardEntry>,
}

/// Query of `GET /sessions/{code}/stats`.
#[derive(Debug, Deserialize, IntoParams, Validate)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct AnswerStatsQuery {
    /// Must be the session controller.
    #[validate(custom(function = "validate_identifier"))]
    pub actor_id: String,
    /// Question to describe. Defaults to the open question.
    pub question_uid: Option<String>,
}

/// Actor performing a controller-only REST action.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ControllerRequest {
    /// Must be the session controller.
    #[validate(custom(function = "validate_identifier"))]
    pub actor_id: String,
}

/// Final standing of one participant.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FinalStanding {
    /// Participant.
    pub user_id: String,
    /// Name shown in the results.
    pub display_name: String,
    /// Live score, or best deferred attempt in deferred sessions.
    pub score: i64,
    /// Attempts started.
    pub attempt_count: u32,
}

/// Response of `POST /sessions/{code}/complete`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompletedSessionResponse {
    /// Session access code.
    pub access_code: String,
    /// How the session was played.
    pub play_mode: PlayMode,
    /// RFC 3339 completion time.
    pub completed_at: String,
    /// The results were already stored by an earlier call.
    pub already_persisted: bool,
    /// One standing per participant.
    pub participants: Vec<FinalStanding>,
}

impl From<FinalResults> for CompletedSessionResponse {
    fn from(results: FinalResults) -> Self {
        let mode = results.play_mode;
        Self {
            access_code: results.access_code,
            play_mode: mode,
            completed_at: format_system_time(results.completed_at),
            already_persisted: results.already_persisted,
            participants: results
                .participants
                .into_iter()
                .map(|row| FinalStanding {
                    score: if mode.is_deferred() {
                        row.deferred_score
                    } else {
                        row.live_score
                    },
                    user_id: row.user_id,
                    display_name: row.display_name,
                    attempt_count: row.attempt_count,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_rejects_malformed_codes() {
        let request: CreateSessionRequest = serde_json::from_str(
            r#"{"accessCode":"abc","playMode":"quiz","controllerId":"teacher","questionUids":["q1"]}"#,
        )
        .unwrap();
        assert!(request.validate().is_err());

        let request: CreateSessionRequest = serde_json::from_str(
            r#"{"playMode":"deferred","controllerId":"teacher","questionUids":["q1"]}"#,
        )
        .unwrap();
        assert!(request.validate().is_ok());
        assert_eq!(NewSession::from(request).play_mode, PlayMode::Deferred);
    }
}
