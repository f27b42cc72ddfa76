use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// `GET /healthcheck` payload.
pub mod health;
/// `GET /history` query and items.
pub mod history;
pub mod practice;
pub mod session;
/// Projector feed events.
pub mod sse;
pub mod validation;
pub mod ws;

fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
