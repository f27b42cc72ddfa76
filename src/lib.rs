//! Library crate for live-quiz-back, exposing modules for binaries and integration tests.

pub mod config;
/// Ephemeral cache and durable result store behind storage traits.
pub mod dao;
/// Wire types of the REST, WebSocket and SSE surfaces.
pub mod dto;
/// Service and HTTP error types.
pub mod error;
/// HTTP routing.
pub mod routes;
/// Session, scoring, presence, practice and history logic.
pub mod services;
/// Shared application state and the in-memory session model.
pub mod state;
