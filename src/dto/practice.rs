//! DTOs of the practice REST API.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dto::{format_system_time, validation::validate_identifier},
    services::practice_service::{PracticeEnd, PracticeFeedback},
    state::{
        practice::{PracticeSession, PracticeSettings, PracticeStatistics, PracticeStatus},
        question::{QuestionKind, Submission},
    },
};

/// Request body of `POST /practice`.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePracticeRequest {
    /// Player, authenticated or guest.
    #[validate(custom(function = "validate_identifier"))]
    pub user_id: String,
    /// Guest browser cookie used for history lookups.
    #[validate(custom(function = "validate_identifier"))]
    pub cookie_id: Option<String>,
    /// Pool selection and feedback options.
    pub settings: PracticeSettings,
}

/// Request body of `POST /practice/{id}/answers`.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPracticeAnswerRequest {
    /// Question being answered; must be the current one.
    #[validate(length(min = 1))]
    pub question_uid: String,
    /// The answer.
    pub submission: Submission,
    /// Time spent on the question, as measured by the client.
    #[serde(default)]
    pub time_spent_ms: u64,
}

/// Request body of `POST /practice/{id}/upgrade`.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpgradePracticeRequest {
    /// Authenticated user taking over the guest run.
    #[validate(custom(function = "validate_identifier"))]
    pub user_id: String,
}

/// Client view of a practice run. The correct answers of the pool are not exposed.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSessionView {
    /// Run identifier.
    pub session_id: String,
    /// Player.
    pub user_id: String,
    /// Lifecycle status.
    pub status: PracticeStatus,
    /// Settings the run was created with.
    pub settings: PracticeSettings,
    /// Size of the pool.
    pub question_count: usize,
    /// Index of the question to answer next.
    pub current_question_index: usize,
    /// Uid of the question to answer next, absent once finished.
    pub current_question_uid: Option<String>,
    /// Points so far.
    pub score: i64,
    /// Running statistics.
    pub statistics: PracticeStatistics,
    /// RFC 3339 expiry time.
    pub expires_at: String,
    /// RFC 3339 completion time.
    pub completed_at: Option<String>,
}

impl From<&PracticeSession> for PracticeSessionView {
    fn from(session: &PracticeSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            status: session.status,
            settings: session.settings.clone(),
            question_count: session.question_pool.len(),
            current_question_index: session.current_question_index,
            current_question_uid: session.current_question().map(|question| question.uid.clone()),
            score: session.score,
            statistics: session.statistics.clone(),
            expires_at: format_system_time(session.expires_at),
            completed_at: session.completed_at.map(format_system_time),
        }
    }
}

/// Response of `POST /practice/{id}/answers`.
#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PracticeFeedbackResponse {
    /// The answer was fully correct.
    pub is_correct: bool,
    /// Points added to the run.
    pub points: i64,
    /// Expected answer when immediate feedback is enabled.
    pub correct_answer: Option<QuestionKind>,
    /// The run after the submission.
    pub session: PracticeSessionView,
}

impl From<PracticeFeedback> for PracticeFeedbackResponse {
    fn from(feedback: PracticeFeedback) -> Self {
        Self {
            is_correct: feedback.is_correct,
            points: feedback.points,
            correct_answer: feedback.correct_answer,
            session: PracticeSessionView::from(&feedback.session),
        }
    }
}

/// Response of `POST /practice/{id}/end`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PracticeEndResponse {
    /// An earlier call already recorded the run.
    pub already_persisted: bool,
    /// The finished run.
    pub session: PracticeSessionView,
}

impl From<PracticeEnd> for PracticeEndResponse {
    fn from(end: PracticeEnd) -> Self {
        Self {
            already_persisted: end.already_persisted,
            session: PracticeSessionView::from(&end.session),
        }
    }
}
