/// OpenAPI documentation generation.
pub mod documentation;
/// Transport-neutral handlers of live-session client events.
pub mod handlers;
/// Health check service.
pub mod health_service;
/// Completed-session history per user or guest cookie.
pub mod history_service;
/// Audience-scoped leaderboards.
pub mod leaderboard_service;
/// Single-player practice runs.
pub mod practice_service;
/// Connection presence per session.
pub mod presence_service;
/// Answer scoring engine.
pub mod scoring_service;
/// Owner of live session state.
pub mod session_service;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Result store connection supervisor.
pub mod storage_supervisor;
/// WebSocket connection and message handling service.
pub mod websocket_service;
