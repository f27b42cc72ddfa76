use serde::Serialize;
use utoipa::ToSchema;

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE `event:` name; the default event when absent.
    pub event: Option<String>,
    /// Encoded `data:` payload.
    pub data: String,
}

impl ServerEvent {
    /// Build an event from already-encoded data.
    pub fn new(event: Option<String>, data: String) -> Self {
        Self { event, data }
    }

    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// First event sent to a projector feed.
pub struct ProjectorHandshake {
    /// Session the feed follows.
    pub access_code: String,
    /// Whether results may currently fail to be recorded.
    pub degraded: bool,
}
