use tracing::warn;

use crate::{dto::health::HealthResponse, state::AppState};

/// Probe both backends, logging connectivity issues.
pub async fn health_status(state: &AppState) -> HealthResponse {
    let durable_store = match state.durable().get().await {
        Some(store) => match store.health_check().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "result store health check failed");
                false
            }
        },
        None => {
            warn!("result store unavailable (degraded mode)");
            false
        }
    };

    let cache = match state.cache().health_check().await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "ephemeral store health check failed");
            false
        }
    };

    HealthResponse::from_checks(durable_store, cache)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig, dao::cache::MemoryStore, dao::result_store::MemoryResultStore,
        state::question::QuestionBank,
    };

    #[tokio::test]
    async fn degraded_until_a_result_store_is_installed() {
        let state = AppState::new(
            Arc::new(AppConfig::default()),
            Arc::new(MemoryStore::new()),
            Arc::new(QuestionBank::default()),
        );
        let health = health_status(&state).await;
        assert_eq!(health.status, "degraded");
        assert!(health.cache);

        state
            .durable()
            .install(Arc::new(MemoryResultStore::new()))
            .await;
        assert_eq!(health_status(&state).await.status, "ok");
    }
}
