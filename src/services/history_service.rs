use crate::{
    dao::models::{HistoryMode, HistoryOwner},
    dto::history::HistoryItem,
    error::ServiceError,
    state::durable::DurableSlot,
};

/// Resolve the history owner: an authenticated user id wins over a guest cookie.
pub fn owner_from(
    user_id: Option<String>,
    cookie_id: Option<String>,
) -> Result<HistoryOwner, ServiceError> {
    match (user_id, cookie_id) {
        (Some(user_id), _) => Ok(HistoryOwner::User(user_id)),
        (None, Some(cookie_id)) => Ok(HistoryOwner::Cookie(cookie_id)),
        (None, None) => Err(ServiceError::InvalidInput(
            "either userId or cookieId is required".into(),
        )),
    }
}

/// Completed sessions of `owner`, newest first.
pub async fn list_completed_sessions(
    durable: &DurableSlot,
    owner: HistoryOwner,
    mode: Option<HistoryMode>,
) -> Result<Vec<HistoryItem>, ServiceError> {
    let store = durable.require().await?;
    let items = store.list_history(owner, mode).await?;
    Ok(items.into_iter().map(HistoryItem::from).collect())
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::{Duration, SystemTime},
    };

    use uuid::Uuid;

    use super::*;
    use crate::{
        dao::{
            models::{ParticipantRecordEntity, SessionRecordEntity},
            result_store::MemoryResultStore,
        },
        state::session::PlayMode,
    };

    async fn record(durable: &DurableSlot, code: &str, mode: PlayMode, at: u64, score: i64) {
        let completed_at = SystemTime::UNIX_EPOCH + Duration::from_secs(at);
        let store = durable.require().await.unwrap();
        store
            .record_session(
                SessionRecordEntity {
                    id: Uuid::new_v4(),
                    access_code: code.into(),
                    play_mode: mode,
                    controller_id: "teacher".into(),
                    question_count: 4,
                    created_at: SystemTime::UNIX_EPOCH,
                    completed_at,
                },
                vec![ParticipantRecordEntity {
                    id: Uuid::new_v4(),
                    access_code: code.into(),
                    user_id: "u1".into(),
                    cookie_id: None,
                    display_name: "U1".into(),
                    live_score: score,
                    deferred_score: score * 2,
                    attempt_count: 2,
                    joined_at: SystemTime::UNIX_EPOCH,
                    completed_at,
                }],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn history_uses_the_mode_specific_score() {
        let durable = DurableSlot::new();
        durable.install(Arc::new(MemoryResultStore::new())).await;
        record(&durable, "LIVE01", PlayMode::Tournament, 10, 300).await;
        record(&durable, "DEFER1", PlayMode::Deferred, 20, 300).await;
        record(&durable, "QUIZ01", PlayMode::Quiz, 30, 100).await;

        let tournaments = list_completed_sessions(
            &durable,
            HistoryOwner::User("u1".into()),
            Some(HistoryMode::Tournament),
        )
        .await
        .unwrap();
        let seen: Vec<_> = tournaments
            .iter()
            .map(|item| (item.access_code.as_str(), item.score))
            .collect();
        assert_eq!(seen, vec![("DEFER1", 600), ("LIVE01", 300)]);
    }

    #[tokio::test]
    async fn history_needs_an_owner_and_a_store() {
        assert!(matches!(
            owner_from(None, None),
            Err(ServiceError::InvalidInput(_))
        ));
        assert_eq!(
            owner_from(Some("u".into()), Some("c".into())).unwrap(),
            HistoryOwner::User("u".into())
        );

        let durable = DurableSlot::new();
        let result =
            list_completed_sessions(&durable, HistoryOwner::Cookie("c".into()), None).await;
        assert!(matches!(result, Err(ServiceError::Degraded)));
    }
}
