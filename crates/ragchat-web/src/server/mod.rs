//! Web server — Axum router + shared state.

pub mod api;
pub mod ws;

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use tokio::sync::{broadcast, Mutex, RwLock};
use tower_http::cors::CorsLayer;

use ragchat_core::config::Config;
use ragchat_core::conversation::Session;
use ragchat_core::events::ChatEvent;

/// Session id used when a request doesn't name one.
pub const DEFAULT_SESSION: &str = "default";

/// A session plus its event sender, so subscribers never wait on a running turn.
pub struct SessionHandle {
    pub session: Mutex<Session>,
    pub events: broadcast::Sender<ChatEvent>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Arc<Self> {
        let events = session.event_sender();
        Arc::new(Self {
            session: Mutex::new(session),
            events,
        })
    }
}

/// Shared application state — all sessions keyed by id.
pub struct AppState {
    pub sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    /// Template for new sessions
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let mut sessions = HashMap::new();
        sessions.insert(
            DEFAULT_SESSION.to_string(),
            SessionHandle::new(Session::from_config(&config)),
        );
        Self {
            sessions: RwLock::new(sessions),
            config,
        }
    }

    /// Resolve a session by id, or the default one.
    pub async fn session(&self, id: Option<&str>) -> Option<Arc<SessionHandle>> {
        let sessions = self.sessions.read().await;
        sessions.get(id.unwrap_or(DEFAULT_SESSION)).cloned()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::very_permissive();

    Router::new()
        .merge(api::routes())
        .merge(ws::routes())
        .layer(cors)
        .with_state(state)
}
