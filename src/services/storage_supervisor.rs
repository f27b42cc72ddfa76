use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{result_store::ResultStore, storage::StorageError},
    state::durable::DurableSlot,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Reconnect to the durable result store and keep the slot in degraded mode while it is unavailable.
///
/// Live play keeps running in degraded mode; only completion and history need the store.
pub async fn run<F, Fut>(durable: Arc<DurableSlot>, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn ResultStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                durable.install(store.clone()).await;
                info!("result store connection established; leaving degraded mode");
                delay = INITIAL_DELAY;

                loop {
                    match store.health_check().await {
                        Ok(()) => {
                            if durable.is_degraded() {
                                info!("result store healthy again; leaving degraded mode");
                                durable.update_degraded(false);
                            }
                            sleep(HEALTH_POLL_INTERVAL).await;
                        }
                        Err(_) => {
                            let mut attempt = 0;
                            let mut reconnect_delay = INITIAL_DELAY;
                            let mut reconnected = false;

                            while attempt < MAX_RECONNECT_ATTEMPTS {
                                match store.try_reconnect().await {
                                    Ok(()) => {
                                        info!(
                                            "result store reconnection succeeded after health check failure"
                                        );
                                        reconnected = true;
                                        break;
                                    }
                                    Err(reconnect_err) => {
                                        if attempt == 0 {
                                            warn!(
                                                attempt, error = %reconnect_err,
                                                "result store reconnect first attempt failed; entering degraded mode"
                                            );
                                            durable.update_degraded(true);
                                        } else {
                                            warn!(attempt, error = %reconnect_err, "result store reconnect attempt failed");
                                        };
                                        attempt += 1;
                                        sleep(reconnect_delay).await;
                                        reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
                                    }
                                }
                            }

                            if reconnected {
                                durable.update_degraded(false);
                                sleep(HEALTH_POLL_INTERVAL).await;
                                continue;
                            } else {
                                warn!(
                                    "exhausted result store reconnect attempts; dropping the connection"
                                );
                                durable.clear().await;
                                break;
                            }
                        }
                    }
                }

                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "result store connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::dao::result_store::MemoryResultStore;

    #[tokio::test(start_paused = true)]
    async fn installs_the_store_once_a_connection_succeeds() {
        let durable = Arc::new(DurableSlot::new());
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let supervisor = tokio::spawn(run(durable.clone(), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(StorageError::integrity("refused"))
                } else {
                    Ok(Arc::new(MemoryResultStore::new()) as Arc<dyn ResultStore>)
                }
            }
        }));

        let mut watcher = durable.watcher();
        watcher.wait_for(|degraded| !degraded).await.unwrap();
        assert!(durable.get().await.is_some());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        supervisor.abort();
    }
}
