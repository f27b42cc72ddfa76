use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::practice::{
        CreatePracticeRequest, PracticeEndResponse, PracticeFeedbackResponse, PracticeSessionView,
        SubmitPracticeAnswerRequest, UpgradePracticeRequest,
    },
    error::AppError,
    state::SharedState,
};

/// Routes of the single-player practice mode.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/practice", post(create_practice))
        .route("/practice/{id}", get(get_practice).delete(delete_practice))
        .route("/practice/{id}/answers", post(submit_answer))
        .route("/practice/{id}/end", post(end_practice))
        .route("/practice/{id}/upgrade", post(upgrade_practice))
}

/// Start a practice run drawn from the question bank.
#[utoipa::path(
    post,
    path = "/practice",
    tag = "practice",
    request_body = CreatePracticeRequest,
    responses(
        (status = 200, description = "Practice run created", body = PracticeSessionView),
        (status = 400, description = "No question matches the settings")
    )
)]
pub async fn create_practice(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreatePracticeRequest>>,
) -> Result<Json<PracticeSessionView>, AppError> {
    let session = state
        .practice()
        .create_session(&payload.user_id, payload.cookie_id, payload.settings)
        .await?;
    Ok(Json(PracticeSessionView::from(&session)))
}

/// Read a practice run.
#[utoipa::path(
    get,
    path = "/practice/{id}",
    tag = "practice",
    params(("id" = String, Path, description = "Practice session id")),
    responses(
        (status = 200, description = "Practice run", body = PracticeSessionView),
        (status = 404, description = "Unknown or expired run")
    )
)]
pub async fn get_practice(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<PracticeSessionView>, AppError> {
    let session = state.practice().get_session(&id).await?;
    Ok(Json(PracticeSessionView::from(&session)))
}

/// Answer the current question of a practice run.
#[utoipa::path(
    post,
    path = "/practice/{id}/answers",
    tag = "practice",
    params(("id" = String, Path, description = "Practice session id")),
    request_body = SubmitPracticeAnswerRequest,
    responses(
        (status = 200, description = "Answer scored", body = PracticeFeedbackResponse),
        (status = 404, description = "Unknown or expired run"),
        (status = 409, description = "Run finished or question is not the current one")
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Valid(Json(payload)): Valid<Json<SubmitPracticeAnswerRequest>>,
) -> Result<Json<PracticeFeedbackResponse>, AppError> {
    let feedback = state
        .practice()
        .submit_answer(
            &id,
            &payload.question_uid,
            payload.submission,
            payload.time_spent_ms,
        )
        .await?;
    Ok(Json(PracticeFeedbackResponse::from(feedback)))
}

/// Finish a practice run and record it in the history. Repeating the call is safe.
#[utoipa::path(
    post,
    path = "/practice/{id}/end",
    tag = "practice",
    params(("id" = String, Path, description = "Practice session id")),
    responses(
        (status = 200, description = "Run ended", body = PracticeEndResponse),
        (status = 404, description = "Unknown or expired run"),
        (status = 503, description = "Result store unavailable, retry later")
    )
)]
pub async fn end_practice(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<PracticeEndResponse>, AppError> {
    let end = state.practice().end_session(&id).await?;
    Ok(Json(PracticeEndResponse::from(end)))
}

/// Hand a guest run over to an authenticated user. The run gets a new id.
#[utoipa::path(
    post,
    path = "/practice/{id}/upgrade",
    tag = "practice",
    params(("id" = String, Path, description = "Practice session id")),
    request_body = UpgradePracticeRequest,
    responses(
        (status = 200, description = "Run now owned by the user", body = PracticeSessionView),
        (status = 404, description = "Unknown or expired run")
    )
)]
pub async fn upgrade_practice(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Valid(Json(payload)): Valid<Json<UpgradePracticeRequest>>,
) -> Result<Json<PracticeSessionView>, AppError> {
    let session = state
        .practice()
        .upgrade_guest(&id, &payload.user_id)
        .await?;
    Ok(Json(PracticeSessionView::from(&session)))
}

/// Discard a practice run without recording it.
#[utoipa::path(
    delete,
    path = "/practice/{id}",
    tag = "practice",
    params(("id" = String, Path, description = "Practice session id")),
    responses(
        (status = 204, description = "Run discarded"),
        (status = 404, description = "Unknown run")
    )
)]
pub async fn delete_practice(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.practice().delete_session(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("practice session `{id}` not found")))
    }
}
