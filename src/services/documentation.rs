//! OpenAPI document served by the Swagger UI and written by `openapi-generator`.

use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the live quiz backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::session::create_session,
        crate::routes::session::get_session,
        crate::routes::session::leaderboard,
        crate::routes::session::projection,
        crate::routes::session::answer_stats,
        crate::routes::session::complete_session,
        crate::routes::practice::create_practice,
        crate::routes::practice::get_practice,
        crate::routes::practice::submit_answer,
        crate::routes::practice::end_practice,
        crate::routes::practice::upgrade_practice,
        crate::routes::practice::delete_practice,
        crate::routes::history::list_history,
        crate::routes::sse::projector_stream,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::SessionSummary,
            crate::dto::session::LeaderboardResponse,
            crate::dto::session::ControllerRequest,
            crate::dto::session::CompletedSessionResponse,
            crate::dto::practice::CreatePracticeRequest,
            crate::dto::practice::SubmitPracticeAnswerRequest,
            crate::dto::practice::UpgradePracticeRequest,
            crate::dto::practice::PracticeSessionView,
            crate::dto::practice::PracticeFeedbackResponse,
            crate::dto::practice::PracticeEndResponse,
            crate::dto::history::HistoryItem,
            crate::dto::sse::ProjectorHandshake,
            crate::dto::ws::ClientEvent,
            crate::dto::ws::ServerMessage,
            crate::state::session::ProjectionState,
            crate::state::session::LeaderboardEntry,
            crate::state::session::AnswerStats,
            crate::state::session::QuestionTimer,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sessions", description = "Live session lifecycle and views"),
        (name = "practice", description = "Single-player practice runs"),
        (name = "history", description = "Completed sessions per user"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "live", description = "WebSocket channel of live sessions"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_rest_route_is_documented() {
        let doc = ApiDoc::openapi();
        for path in [
            "/healthcheck",
            "/sessions",
            "/sessions/{code}/leaderboard",
            "/sessions/{code}/stats",
            "/practice/{id}/upgrade",
            "/history",
            "/sse/projector/{code}",
            "/ws",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
