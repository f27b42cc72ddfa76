use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, Query, State},
    response::sse::Sse,
    routing::get,
};
use futures::Stream;
use serde::Deserialize;
use tracing::info;
use utoipa::IntoParams;

use crate::{
    error::AppError,
    services::sse_service::{self, StreamKind},
    state::SharedState,
};

/// Query of the projector feed.
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ProjectorQuery {
    /// Session controller opening the feed.
    pub actor_id: String,
}

#[utoipa::path(
    get,
    path = "/sse/projector/{code}",
    tag = "sse",
    params(("code" = String, Path, description = "Session access code"), ProjectorQuery),
    responses(
        (status = 200, description = "Projector SSE stream", content_type = "text/event-stream", body = String),
        (status = 403, description = "Caller is not the session controller"),
        (status = 404, description = "Unknown session")
    )
)]
/// Stream leaderboard, projection and question updates of one session to a classroom display.
pub async fn projector_stream(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Query(query): Query<ProjectorQuery>,
) -> Result<Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>>, AppError> {
    let receiver = sse_service::subscribe_projector(&state, &code, &query.actor_id).await?;
    info!(code = %code, "New projector SSE connection");
    Ok(sse_service::to_sse_stream(
        receiver,
        StreamKind::Projector { state, code },
    ))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse/projector/{code}", get(projector_stream))
}
