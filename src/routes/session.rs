use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::session::{
        AnswerStatsQuery, CompletedSessionResponse, ControllerRequest, CreateSessionRequest,
        LeaderboardQuery, LeaderboardResponse, SessionSummary,
    },
    error::{AppError, ServiceError},
    services::session_service::NewSession,
    state::{
        SharedState,
        session::{AnswerStats, Audience, ProjectionState},
    },
};

/// Routes exposing live sessions over REST. Play itself goes through the WebSocket.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{code}", get(get_session))
        .route("/sessions/{code}/leaderboard", get(leaderboard))
        .route("/sessions/{code}/projection", get(projection))
        .route("/sessions/{code}/stats", get(answer_stats))
        .route("/sessions/{code}/complete", post(complete_session))
}

/// Create a pending live session.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created", body = SessionSummary),
        (status = 400, description = "Invalid request"),
        (status = 409, description = "Access code already in use")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<Json<SessionSummary>, AppError> {
    let summary = state
        .sessions()
        .create_session(NewSession::from(payload))
        .await?;
    Ok(Json(summary))
}

/// Current state of a session.
#[utoipa::path(
    get,
    path = "/sessions/{code}",
    tag = "sessions",
    params(("code" = String, Path, description = "Session access code")),
    responses(
        (status = 200, description = "Current session state", body = SessionSummary),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<SessionSummary>, AppError> {
    Ok(Json(state.sessions().summary(&code).await?))
}

/// Leaderboard as visible to the requested audience.
///
/// Students only ever receive the last revealed snapshot; the live board needs the
/// controller's `actorId`.
#[utoipa::path(
    get,
    path = "/sessions/{code}/leaderboard",
    tag = "sessions",
    params(("code" = String, Path, description = "Session access code"), LeaderboardQuery),
    responses(
        (status = 200, description = "Ranked entries", body = LeaderboardResponse),
        (status = 403, description = "Live board requested by someone other than the controller"),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn leaderboard(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<LeaderboardResponse>, AppError> {
    let audience = query.audience.unwrap_or(Audience::Student);
    let entries = state
        .leaderboard()
        .compute_for(&code, audience, query.actor_id.as_deref())
        .await?;
    Ok(Json(LeaderboardResponse {
        access_code: code,
        audience,
        entries,
    }))
}

/// Projector toggles of a session.
#[utoipa::path(
    get,
    path = "/sessions/{code}/projection",
    tag = "sessions",
    params(("code" = String, Path, description = "Session access code")),
    responses(
        (status = 200, description = "Projection toggles", body = ProjectionState),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn projection(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<ProjectionState>, AppError> {
    Ok(Json(state.sessions().projection(&code).await?))
}

/// Answer distribution of a question, for the controller's dashboard.
#[utoipa::path(
    get,
    path = "/sessions/{code}/stats",
    tag = "sessions",
    params(("code" = String, Path, description = "Session access code"), AnswerStatsQuery),
    responses(
        (status = 200, description = "Answer distribution", body = AnswerStats),
        (status = 403, description = "Caller is not the session controller"),
        (status = 404, description = "Unknown session or question")
    )
)]
pub async fn answer_stats(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Valid(Query(query)): Valid<Query<AnswerStatsQuery>>,
) -> Result<Json<AnswerStats>, AppError> {
    let sessions = state.sessions();
    let is_controller = sessions
        .read(&code, |session| session.is_controller(&query.actor_id))
        .await?;
    if !is_controller {
        return Err(ServiceError::Unauthorized(
            "only the session controller may read answer statistics".into(),
        )
        .into());
    }
    let stats = sessions
        .answer_stats(&code, query.question_uid.as_deref())
        .await?;
    Ok(Json(stats))
}

/// Flush final results to the durable store. Repeating the call is safe.
#[utoipa::path(
    post,
    path = "/sessions/{code}/complete",
    tag = "sessions",
    params(("code" = String, Path, description = "Session access code")),
    request_body = ControllerRequest,
    responses(
        (status = 200, description = "Final results", body = CompletedSessionResponse),
        (status = 403, description = "Caller is not the session controller"),
        (status = 503, description = "Result store unavailable, retry later")
    )
)]
pub async fn complete_session(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Valid(Json(payload)): Valid<Json<ControllerRequest>>,
) -> Result<Json<CompletedSessionResponse>, AppError> {
    let results = state
        .sessions()
        .complete_session(&code, &payload.actor_id)
        .await?;
    Ok(Json(CompletedSessionResponse::from(results)))
}
