/// In-process backend.
pub mod memory;
/// MongoDB backend.
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use crate::dao::models::{
    HistoryItemEntity, HistoryMode, HistoryOwner, ParticipantRecordEntity, SessionRecordEntity,
};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;

pub use memory::MemoryResultStore;

/// Durable store of completed sessions and their participants.
///
/// Backends enforce uniqueness of the session access code and of the (session, user) pair,
/// failing with [`StorageError::Integrity`](crate::dao::storage::StorageError::Integrity), and
/// cascade session deletion to participant rows.
pub trait ResultStore: Send + Sync {
    /// Insert a completed session with its participants, all or nothing.
    fn record_session(
        &self,
        session: SessionRecordEntity,
        participants: Vec<ParticipantRecordEntity>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Session row of `access_code`.
    fn find_session(
        &self,
        access_code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionRecordEntity>>>;
    /// Participant rows of `access_code`.
    fn find_participants(
        &self,
        access_code: String,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantRecordEntity>>>;
    /// Completed sessions of `owner`, newest first.
    fn list_history(
        &self,
        owner: HistoryOwner,
        mode: Option<HistoryMode>,
    ) -> BoxFuture<'static, StorageResult<Vec<HistoryItemEntity>>>;
    /// Delete a session and its participants, returning whether it existed.
    fn delete_session(&self, access_code: String) -> BoxFuture<'static, StorageResult<bool>>;
    /// Round-trip to the backend.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Rebuild the connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
