/// Slot holding the durable result store.
pub mod durable;
/// Practice run model.
pub mod practice;
/// Questions and the read-only question bank.
pub mod question;
/// Live session model.
pub mod session;
/// Projector broadcast hubs.
pub mod sse;
/// Session lifecycle.
pub mod state_machine;
/// Running side effects inside a lifecycle transition.
pub mod transitions;

use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::{
    config::AppConfig,
    dao::cache::EphemeralStore,
    services::{
        leaderboard_service::LeaderboardService, practice_service::PracticeSessionManager,
        presence_service::PresenceTracker, session_service::SessionStateManager,
    },
    state::{durable::DurableSlot, question::QuestionBank, session::Audience, sse::ProjectorHubs},
};

pub use self::sse::SseHub;
pub use self::state_machine::{AbortError, ApplyError, Plan, PlanError, PlanId};

/// Handle on [`AppState`] shared by every route.
pub type SharedState = Arc<AppState>;

const PROJECTOR_HUB_CAPACITY: usize = 16;

#[derive(Clone)]
/// Handle used to push messages to an identified WebSocket client.
pub struct ClientConnection {
    /// Registry key.
    pub connection_id: String,
    /// Identified user.
    pub user_id: String,
    /// Role granted at identification.
    pub role: Audience,
    /// Session the connection is bound to.
    pub session_code: String,
    /// Outbound frames, drained by the connection's writer task.
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Central application state: stores, the live-session services and connected clients.
pub struct AppState {
    config: Arc<AppConfig>,
    questions: Arc<QuestionBank>,
    cache: Arc<dyn EphemeralStore>,
    durable: Arc<DurableSlot>,
    sessions: Arc<SessionStateManager>,
    presence: PresenceTracker,
    leaderboard: LeaderboardService,
    practice: PracticeSessionManager,
    projectors: ProjectorHubs,
    clients: DashMap<String, ClientConnection>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a result store is installed.
    pub fn new(
        config: Arc<AppConfig>,
        cache: Arc<dyn EphemeralStore>,
        questions: Arc<QuestionBank>,
    ) -> SharedState {
        let durable = Arc::new(DurableSlot::new());
        let sessions = Arc::new(SessionStateManager::new(
            cache.clone(),
            durable.clone(),
            config.clone(),
            questions.clone(),
        ));
        Arc::new(Self {
            presence: PresenceTracker::new(cache.clone(), sessions.clone(), config.snapshot_ttl),
            leaderboard: LeaderboardService::new(sessions.clone()),
            practice: PracticeSessionManager::new(
                cache.clone(),
                durable.clone(),
                config.clone(),
                questions.clone(),
            ),
            projectors: ProjectorHubs::new(PROJECTOR_HUB_CAPACITY),
            clients: DashMap::new(),
            config,
            questions,
            cache,
            durable,
            sessions,
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    /// Read-only question bank.
    pub fn questions(&self) -> &QuestionBank {
        &self.questions
    }

    /// Ephemeral store shared by every service.
    pub fn cache(&self) -> &Arc<dyn EphemeralStore> {
        &self.cache
    }

    /// Slot of the durable result store, empty while degraded.
    pub fn durable(&self) -> &DurableSlot {
        &self.durable
    }

    /// Owned handle on the durable slot, for the background supervisor.
    pub fn durable_handle(&self) -> Arc<DurableSlot> {
        self.durable.clone()
    }

    /// Owner of the live sessions.
    pub fn sessions(&self) -> &SessionStateManager {
        &self.sessions
    }

    /// Connection tracking.
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Ranking views.
    pub fn leaderboard(&self) -> &LeaderboardService {
        &self.leaderboard
    }

    /// Practice runs.
    pub fn practice(&self) -> &PracticeSessionManager {
        &self.practice
    }

    /// Per-session broadcast hubs behind the projector SSE feed.
    pub fn projectors(&self) -> &ProjectorHubs {
        &self.projectors
    }

    /// Registry of identified WebSocket clients keyed by connection id.
    pub fn clients(&self) -> &DashMap<String, ClientConnection> {
        &self.clients
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        self.durable.is_degraded()
    }
}
