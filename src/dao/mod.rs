/// Ephemeral key/value and hash store holding live state.
pub mod cache;
/// Durable record definitions.
pub mod models;
/// Durable store of completed sessions.
pub mod result_store;
/// Storage error shared by every backend.
pub mod storage;
