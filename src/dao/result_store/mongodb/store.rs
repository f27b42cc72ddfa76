use std::{collections::HashMap, sync::Arc};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{Collection, Database, bson::doc};
use tokio::sync::RwLock;
use tracing::warn;

use super::{
    connection::{MongoConfig, ensure_indexes, open_database},
    error::{MongoDaoError, MongoResult},
    models::{MongoParticipantDocument, MongoSessionDocument},
};
use crate::dao::{
    models::{
        HistoryItemEntity, HistoryMode, HistoryOwner, ParticipantRecordEntity, SessionRecordEntity,
    },
    result_store::ResultStore,
    storage::StorageResult,
};

pub(super) const SESSION_COLLECTION_NAME: &str = "session_records";
pub(super) const PARTICIPANT_COLLECTION_NAME: &str = "participant_records";

/// [`ResultStore`] backed by MongoDB. Reconnects swap the database handle in place.
#[derive(Clone)]
pub struct MongoResultStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    database: RwLock<Database>,
    config: MongoConfig,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.database.read().await.clone();
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let database = open_database(&self.config).await?;
        *self.database.write().await = database;
        Ok(())
    }
}

impl MongoResultStore {
    /// Establish a connection to MongoDB and ensure the uniqueness indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let database = open_database(&config).await?;
        ensure_indexes(&database).await?;

        Ok(Self {
            inner: Arc::new(MongoInner {
                database: RwLock::new(database),
                config,
            }),
        })
    }

    async fn database(&self) -> Database {
        self.inner.database.read().await.clone()
    }

    async fn sessions(&self) -> Collection<MongoSessionDocument> {
        self.database()
            .await
            .collection::<MongoSessionDocument>(SESSION_COLLECTION_NAME)
    }

    async fn participants(&self) -> Collection<MongoParticipantDocument> {
        self.database()
            .await
            .collection::<MongoParticipantDocument>(PARTICIPANT_COLLECTION_NAME)
    }

    /// Insert the session row, then its participants one by one. A failed participant
    /// insert removes everything written for the session so a retry starts clean.
    async fn record_session(
        &self,
        session: SessionRecordEntity,
        participants: Vec<ParticipantRecordEntity>,
    ) -> MongoResult<()> {
        let code = session.access_code.clone();
        let document: MongoSessionDocument = session.into();
        self.sessions()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::RecordSession {
                code: code.clone(),
                source,
            })?;

        let collection = self.participants().await;
        for participant in participants {
            let user_id = participant.user_id.clone();
            let document: MongoParticipantDocument = participant.into();
            if let Err(source) = collection.insert_one(&document).await {
                if let Err(cleanup) = self.delete_session(&code).await {
                    warn!(code = %code, error = %cleanup, "failed to roll back partial session record");
                }
                return Err(MongoDaoError::RecordParticipant {
                    code,
                    user_id,
                    source,
                });
            }
        }

        Ok(())
    }

    async fn find_session(&self, code: String) -> MongoResult<Option<SessionRecordEntity>> {
        let document = self
            .sessions()
            .await
            .find_one(doc! { "access_code": code.as_str() })
            .await
            .map_err(|source| MongoDaoError::LoadSession { code, source })?;
        Ok(document.map(Into::into))
    }

    async fn find_participants(&self, code: String) -> MongoResult<Vec<ParticipantRecordEntity>> {
        let documents: Vec<MongoParticipantDocument> = self
            .participants()
            .await
            .find(doc! { "access_code": code.as_str() })
            .await
            .map_err(|source| MongoDaoError::LoadSession {
                code: code.clone(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadSession { code, source })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn list_history(
        &self,
        owner: HistoryOwner,
        mode: Option<HistoryMode>,
    ) -> MongoResult<Vec<HistoryItemEntity>> {
        let owner_filter = match &owner {
            HistoryOwner::User(user_id) => doc! { "user_id": user_id.as_str() },
            HistoryOwner::Cookie(cookie_id) => doc! { "cookie_id": cookie_id.as_str() },
        };
        let participants: Vec<ParticipantRecordEntity> = self
            .participants()
            .await
            .find(owner_filter)
            .await
            .map_err(|source| MongoDaoError::ListHistory { source })?
            .try_collect::<Vec<MongoParticipantDocument>>()
            .await
            .map_err(|source| MongoDaoError::ListHistory { source })?
            .into_iter()
            .map(Into::into)
            .collect();

        if participants.is_empty() {
            return Ok(Vec::new());
        }

        let codes: Vec<&str> = participants
            .iter()
            .map(|participant| participant.access_code.as_str())
            .collect();
        let mut session_filter = doc! { "access_code": { "$in": codes } };
        if let Some(mode) = mode {
            let modes: Vec<&str> = mode.play_modes().iter().map(|m| m.as_str()).collect();
            session_filter.insert("play_mode", doc! { "$in": modes });
        }

        let sessions: HashMap<String, SessionRecordEntity> = self
            .sessions()
            .await
            .find(session_filter)
            .await
            .map_err(|source| MongoDaoError::ListHistory { source })?
            .try_collect::<Vec<MongoSessionDocument>>()
            .await
            .map_err(|source| MongoDaoError::ListHistory { source })?
            .into_iter()
            .map(|document| {
                let entity: SessionRecordEntity = document.into();
                (entity.access_code.clone(), entity)
            })
            .collect();

        let mut items: Vec<HistoryItemEntity> = participants
            .into_iter()
            .filter_map(|participant| {
                let session = sessions.get(&participant.access_code)?.clone();
                Some(HistoryItemEntity {
                    session,
                    participant,
                })
            })
            .collect();
        items.sort_by(|a, b| b.session.completed_at.cmp(&a.session.completed_at));
        Ok(items)
    }

    async fn delete_session(&self, code: &str) -> MongoResult<bool> {
        self.participants()
            .await
            .delete_many(doc! { "access_code": code })
            .await
            .map_err(|source| MongoDaoError::DeleteSession {
                code: code.to_owned(),
                source,
            })?;
        let result = self
            .sessions()
            .await
            .delete_one(doc! { "access_code": code })
            .await
            .map_err(|source| MongoDaoError::DeleteSession {
                code: code.to_owned(),
                source,
            })?;
        Ok(result.deleted_count > 0)
    }
}

impl ResultStore for MongoResultStore {
    fn record_session(
        &self,
        session: SessionRecordEntity,
        participants: Vec<ParticipantRecordEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .record_session(session, participants)
                .await
                .map_err(Into::into)
        })
    }

    fn find_session(
        &self,
        access_code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionRecordEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session(access_code).await.map_err(Into::into) })
    }

    fn find_participants(
        &self,
        access_code: String,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantRecordEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_participants(access_code).await.map_err(Into::into) })
    }

    fn list_history(
        &self,
        owner: HistoryOwner,
        mode: Option<HistoryMode>,
    ) -> BoxFuture<'static, StorageResult<Vec<HistoryItemEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_history(owner, mode).await.map_err(Into::into) })
    }

    fn delete_session(&self, access_code: String) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.delete_session(&access_code).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
