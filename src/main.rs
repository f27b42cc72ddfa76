//! Live quiz backend entrypoint wiring REST, WebSocket, SSE, the ephemeral store and the result store.

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_quiz_back::{
    config::AppConfig,
    dao::{
        cache::{EphemeralStore, MemoryStore},
        result_store::MemoryResultStore,
    },
    routes,
    state::{AppState, SharedState, question::QuestionBank},
};

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::load());
    let questions = Arc::new(QuestionBank::load(config.questions_path.as_deref()));
    let cache = connect_cache().await?;

    let app_state = AppState::new(config, cache, questions);
    start_result_store(&app_state).await;

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Redis when `REDIS_URL` is set, otherwise the in-process store.
async fn connect_cache() -> anyhow::Result<Arc<dyn EphemeralStore>> {
    #[cfg(feature = "redis-cache")]
    {
        if let Ok(url) = env::var("REDIS_URL") {
            let store = live_quiz_back::dao::cache::redis_store::RedisStore::connect(&url)
                .await
                .context("connecting to Redis")?;
            info!("using Redis as the ephemeral store");
            return Ok(Arc::new(store));
        }
    }

    warn!("REDIS_URL not set; live state is kept in process memory");
    let store = MemoryStore::new();
    store.spawn_sweeper(SWEEP_INTERVAL);
    Ok(Arc::new(store))
}

/// Supervise MongoDB when `MONGO_URI` is set, otherwise record results in memory.
async fn start_result_store(state: &SharedState) {
    #[cfg(feature = "mongo-store")]
    {
        if let Ok(uri) = env::var("MONGO_URI") {
            use live_quiz_back::{
                dao::{
                    result_store::{
                        ResultStore,
                        mongodb::{MongoConfig, MongoResultStore},
                    },
                    storage::StorageError,
                },
                services::storage_supervisor,
            };

            let db_name = env::var("MONGO_DB").ok();
            let connect = move || {
                let uri = uri.clone();
                let db_name = db_name.clone();
                async move {
                    let config = MongoConfig::from_uri(&uri, db_name.as_deref()).await?;
                    let store = MongoResultStore::connect(config).await?;
                    Ok::<_, StorageError>(Arc::new(store) as Arc<dyn ResultStore>)
                }
            };
            tokio::spawn(storage_supervisor::run(state.durable_handle(), connect));
            return;
        }
    }

    warn!("MONGO_URI not set; completed sessions are kept in process memory");
    state
        .durable()
        .install(Arc::new(MemoryResultStore::new()))
        .await;
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
