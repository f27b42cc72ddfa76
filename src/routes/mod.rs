use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{services::documentation::ApiDoc, state::SharedState};

/// `GET /healthcheck`.
pub mod health;
/// `GET /history`.
pub mod history;
/// `/practice` runs.
pub mod practice;
/// `/sessions` lifecycle and views.
pub mod session;
/// Projector server-sent events.
pub mod sse;
/// Live-session WebSocket upgrade.
pub mod websocket;

const SWAGGER_UI_PATH: &str = "/docs";
const OPENAPI_JSON_PATH: &str = "/api-doc/openapi.json";

/// Every HTTP surface of the quiz engine plus its Swagger UI, bound to `state`.
pub fn router(state: SharedState) -> Router<()> {
    let swagger: Router<SharedState> = SwaggerUi::new(SWAGGER_UI_PATH)
        .url(OPENAPI_JSON_PATH, ApiDoc::openapi())
        .into();

    health::router()
        .merge(sse::router())
        .merge(websocket::router())
        .merge(session::router())
        .merge(practice::router())
        .merge(history::router())
        .merge(swagger)
        .with_state(state)
}
