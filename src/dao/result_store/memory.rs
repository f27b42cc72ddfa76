use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use super::ResultStore;
use crate::dao::{
    models::{
        HistoryItemEntity, HistoryMode, HistoryOwner, ParticipantRecordEntity, SessionRecordEntity,
    },
    storage::{StorageError, StorageResult},
};

#[derive(Default)]
struct Tables {
    sessions: HashMap<String, SessionRecordEntity>,
    participants: Vec<ParticipantRecordEntity>,
}

/// In-process [`ResultStore`] with the same constraints as the database backend.
#[derive(Clone, Default)]
pub struct MemoryResultStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryResultStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn record_session(
        &self,
        session: SessionRecordEntity,
        participants: Vec<ParticipantRecordEntity>,
    ) -> StorageResult<()> {
        let mut tables = self.tables.write().await;

        if tables.sessions.contains_key(&session.access_code) {
            return Err(StorageError::integrity(format!(
                "session `{}` already recorded",
                session.access_code
            )));
        }

        let mut seen = HashSet::new();
        for participant in &participants {
            if participant.access_code != session.access_code {
                return Err(StorageError::integrity(format!(
                    "participant `{}` references unknown session `{}`",
                    participant.user_id, participant.access_code
                )));
            }
            let already_stored = tables.participants.iter().any(|existing| {
                existing.access_code == participant.access_code
                    && existing.user_id == participant.user_id
            });
            if already_stored || !seen.insert(participant.user_id.as_str()) {
                return Err(StorageError::integrity(format!(
                    "duplicate participant `{}` in session `{}`",
                    participant.user_id, participant.access_code
                )));
            }
        }

        tables
            .sessions
            .insert(session.access_code.clone(), session);
        tables.participants.extend(participants);
        Ok(())
    }

    async fn list_history(
        &self,
        owner: HistoryOwner,
        mode: Option<HistoryMode>,
    ) -> Vec<HistoryItemEntity> {
        let tables = self.tables.read().await;
        let mut items: Vec<HistoryItemEntity> = tables
            .participants
            .iter()
            .filter(|participant| owner.matches(participant))
            .filter_map(|participant| {
                let session = tables.sessions.get(&participant.access_code)?;
                mode.is_none_or(|mode| mode.includes(session.play_mode))
                    .then(|| HistoryItemEntity {
                        session: session.clone(),
                        participant: participant.clone(),
                    })
            })
            .collect();
        items.sort_by(|a, b| b.session.completed_at.cmp(&a.session.completed_at));
        items
    }
}

impl ResultStore for MemoryResultStore {
    fn record_session(
        &self,
        session: SessionRecordEntity,
        participants: Vec<ParticipantRecordEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.record_session(session, participants).await })
    }

    fn find_session(
        &self,
        access_code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionRecordEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let tables = store.tables.read().await;
            Ok(tables.sessions.get(&access_code).cloned())
        })
    }

    fn find_participants(
        &self,
        access_code: String,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantRecordEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let tables = store.tables.read().await;
            Ok(tables
                .participants
                .iter()
                .filter(|participant| participant.access_code == access_code)
                .cloned()
                .collect())
        })
    }

    fn list_history(
        &self,
        owner: HistoryOwner,
        mode: Option<HistoryMode>,
    ) -> BoxFuture<'static, StorageResult<Vec<HistoryItemEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.list_history(owner, mode).await) })
    }

    fn delete_session(&self, access_code: String) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let mut tables = store.tables.write().await;
            let removed = tables.sessions.remove(&access_code).is_some();
            tables
                .participants
                .retain(|participant| participant.access_code != access_code);
            Ok(removed)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async move { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async move { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use uuid::Uuid;

    use super::*;
    use crate::state::session::PlayMode;

    fn session(code: &str, mode: PlayMode, completed_offset: u64) -> SessionRecordEntity {
        SessionRecordEntity {
            id: Uuid::new_v4(),
            access_code: code.into(),
            play_mode: mode,
            controller_id: "teacher".into(),
            question_count: 3,
            created_at: SystemTime::UNIX_EPOCH,
            completed_at: SystemTime::UNIX_EPOCH + Duration::from_secs(completed_offset),
        }
    }

    fn participant(code: &str, user: &str, cookie: Option<&str>) -> ParticipantRecordEntity {
        ParticipantRecordEntity {
            id: Uuid::new_v4(),
            access_code: code.into(),
            user_id: user.into(),
            cookie_id: cookie.map(str::to_owned),
            display_name: user.into(),
            live_score: 100,
            deferred_score: 0,
            attempt_count: 1,
            joined_at: SystemTime::UNIX_EPOCH,
            completed_at: SystemTime::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn duplicate_session_is_an_integrity_error() {
        let store = MemoryResultStore::new();
        store
            .record_session(
                session("ABC", PlayMode::Quiz, 1),
                vec![participant("ABC", "u1", None)],
            )
            .await
            .unwrap();

        let err = store
            .record_session(
                session("ABC", PlayMode::Quiz, 2),
                vec![participant("ABC", "u1", None)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Integrity { .. }));
        assert_eq!(store.find_participants("ABC".into()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_pair_in_one_batch_is_rejected() {
        let store = MemoryResultStore::new();
        let err = store
            .record_session(
                session("XYZ", PlayMode::Quiz, 1),
                vec![participant("XYZ", "u1", None), participant("XYZ", "u1", None)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Integrity { .. }));
        assert!(store.find_session("XYZ".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_a_session_cascades() {
        let store = MemoryResultStore::new();
        store
            .record_session(
                session("ABC", PlayMode::Quiz, 1),
                vec![participant("ABC", "u1", None), participant("ABC", "u2", None)],
            )
            .await
            .unwrap();

        assert!(ResultStore::delete_session(&store, "ABC".into()).await.unwrap());
        assert!(store.find_participants("ABC".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_filters_by_owner_and_mode_newest_first() {
        let store = MemoryResultStore::new();
        store
            .record_session(
                session("Q1", PlayMode::Quiz, 10),
                vec![participant("Q1", "u1", None)],
            )
            .await
            .unwrap();
        store
            .record_session(
                session("T1", PlayMode::Deferred, 20),
                vec![participant("T1", "u1", None)],
            )
            .await
            .unwrap();
        store
            .record_session(
                session("P1", PlayMode::Practice, 30),
                vec![participant("P1", "guest-1", Some("cookie-9"))],
            )
            .await
            .unwrap();

        let all = ResultStore::list_history(&store, HistoryOwner::User("u1".into()), None)
            .await
            .unwrap();
        let codes: Vec<_> = all.iter().map(|i| i.session.access_code.as_str()).collect();
        assert_eq!(codes, vec!["T1", "Q1"]);

        let tournaments = ResultStore::list_history(
            &store,
            HistoryOwner::User("u1".into()),
            Some(HistoryMode::Tournament),
        )
        .await
        .unwrap();
        assert_eq!(tournaments.len(), 1);

        let guest = ResultStore::list_history(
            &store,
            HistoryOwner::Cookie("cookie-9".into()),
            Some(HistoryMode::Practice),
        )
        .await
        .unwrap();
        assert_eq!(guest.len(), 1);
    }
}
