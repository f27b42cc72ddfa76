use serde::Serialize;
use utoipa::ToSchema;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Whether the durable result store is installed and answering.
    pub durable_store: bool,
    /// Whether the ephemeral store answered its health check.
    pub cache: bool,
}

impl HealthResponse {
    /// Build the payload from backend reachability. Any unreachable backend means degraded.
    pub fn from_checks(durable_store: bool, cache: bool) -> Self {
        let status = if durable_store && cache { "ok" } else { "degraded" };
        Self {
            status: status.to_string(),
            durable_store,
            cache,
        }
    }
}
