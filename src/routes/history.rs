use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use axum_valid::Valid;

use crate::{
    dto::history::{HistoryItem, HistoryQuery},
    error::AppError,
    services::history_service,
    state::SharedState,
};

/// History routes.
pub fn router() -> Router<SharedState> {
    Router::new().route("/history", get(list_history))
}

/// Completed sessions of a user or guest cookie, newest first.
#[utoipa::path(
    get,
    path = "/history",
    tag = "history",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Completed sessions", body = [HistoryItem]),
        (status = 400, description = "Neither userId nor cookieId given"),
        (status = 503, description = "Result store unavailable, retry later")
    )
)]
pub async fn list_history(
    State(state): State<SharedState>,
    Valid(Query(query)): Valid<Query<HistoryQuery>>,
) -> Result<Json<Vec<HistoryItem>>, AppError> {
    let owner = history_service::owner_from(query.user_id, query.cookie_id)?;
    let items =
        history_service::list_completed_sessions(state.durable(), owner, query.mode).await?;
    Ok(Json(items))
}
