//! REST API endpoints.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use ragchat_core::config::{BotConfig, Config, InvocationConfig, RagConfig};
use ragchat_core::conversation::{ChatError, Session};
use ragchat_core::providers;

use super::{AppState, SessionHandle};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route("/api/message", post(post_message))
        .route("/api/messages", get(get_messages))
        .route("/api/status", get(get_status))
        .route("/api/config", post(post_config))
        .route("/api/rag", post(post_rag).delete(delete_rag))
        .route("/api/reset", post(post_reset))
        .route("/api/models", get(get_models))
}

#[derive(Deserialize)]
struct SessionQuery {
    session: Option<String>,
}

#[derive(Deserialize)]
struct LimitQuery {
    session: Option<String>,
    limit: Option<usize>,
}

fn no_session() -> Json<Value> {
    Json(json!({"ok": false, "error": "no session found"}))
}

fn busy() -> Json<Value> {
    Json(json!({"ok": false, "busy": true, "error": "session is answering a question"}))
}

// --- Sessions ---

async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Value> {
    let sessions = state.sessions.read().await;
    let mut list = Vec::new();
    for (id, handle) in sessions.iter() {
        // A session mid-turn holds its lock; report it busy instead of waiting
        match handle.session.try_lock() {
            Ok(session) => list.push(json!({"id": id, "busy": false, "status": session.status()})),
            Err(_) => list.push(json!({"id": id, "busy": true})),
        }
    }
    Json(json!(list))
}

async fn create_session(State(state): State<Arc<AppState>>) -> Json<Value> {
    let id = uuid::Uuid::new_v4().to_string();
    let handle = SessionHandle::new(Session::from_config(&state.config));
    state.sessions.write().await.insert(id.clone(), handle);
    info!("Created session {}", id);
    Json(json!({"ok": true, "id": id}))
}

// --- Chat ---

#[derive(Deserialize)]
struct MessageBody {
    text: Option<String>,
}

async fn post_message(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SessionQuery>,
    Json(body): Json<MessageBody>,
) -> Json<Value> {
    let text = match body.text.as_deref().map(|s| s.trim()) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => return Json(json!({"ok": false, "error": "empty message"})),
    };

    let Some(handle) = state.session(q.session.as_deref()).await else {
        return no_session();
    };

    let mut session = handle.session.lock().await;
    match session.ask(&text).await {
        Ok(answer) => Json(json!({
            "ok": true,
            "answer": answer.text,
            "source": answer.source,
        })),
        Err(e @ ChatError::BotNotConfigured) => {
            warn!("Message received before a bot was configured");
            Json(json!({"ok": false, "error": e.to_string()}))
        }
        Err(e) => Json(json!({"ok": false, "error": e.to_string()})),
    }
}

async fn get_messages(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LimitQuery>,
) -> Json<Value> {
    let limit = q.limit.unwrap_or(100);
    match state.session(q.session.as_deref()).await {
        // Don't queue behind a running turn
        Some(handle) => match handle.session.try_lock() {
            Ok(session) => Json(json!(session.conversation.recent(limit))),
            Err(_) => busy(),
        },
        None => Json(json!([])),
    }
}

async fn get_status(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SessionQuery>,
) -> Json<Value> {
    match state.session(q.session.as_deref()).await {
        Some(handle) => match handle.session.try_lock() {
            Ok(session) => Json(json!({
                "ok": true,
                "busy": false,
                "status": session.status(),
                "timeout_secs": session.controller().timeout().as_secs(),
                "rag": session.rag_config(),
            })),
            Err(_) => busy(),
        },
        None => no_session(),
    }
}

// --- Configuration ---

/// Body of `POST /api/config`. Sections left out keep the server's values.
#[derive(Deserialize)]
struct ConfigUpdate {
    #[serde(default)]
    bot: BotConfig,
    rag: Option<RagConfig>,
    invocation: Option<InvocationConfig>,
}

impl ConfigUpdate {
    /// Fill the gaps from the server config, which already has env overrides applied.
    fn resolve(self, server: &Config) -> Config {
        let mut bot = self.bot;
        bot.inherit_token(&server.bot);
        Config {
            bot,
            rag: self.rag.unwrap_or_else(|| server.rag.clone()),
            invocation: self.invocation.unwrap_or_else(|| server.invocation.clone()),
        }
    }
}

async fn post_config(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SessionQuery>,
    Json(update): Json<ConfigUpdate>,
) -> Json<Value> {
    let Some(handle) = state.session(q.session.as_deref()).await else {
        return no_session();
    };

    let config = update.resolve(&state.config);
    let mut session = handle.session.lock().await;
    match session.configure(&config) {
        Ok(()) => Json(json!({
            "ok": true,
            "host": config.bot.host,
            "model": config.bot.model_name(),
            "rag_enabled": session.status().rag_enabled,
        })),
        Err(e) => Json(json!({"ok": false, "error": format!("{:#}", e)})),
    }
}

// --- Retrieval ---

async fn post_rag(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SessionQuery>,
    Json(rag): Json<RagConfig>,
) -> Json<Value> {
    let Some(handle) = state.session(q.session.as_deref()).await else {
        return no_session();
    };

    let mut session = handle.session.lock().await;
    match session.configure_rag(&rag) {
        Ok(()) => Json(json!({"ok": true, "rag_enabled": session.status().rag_enabled})),
        Err(e) => Json(json!({"ok": false, "error": format!("{:#}", e)})),
    }
}

async fn delete_rag(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SessionQuery>,
) -> Json<Value> {
    match state.session(q.session.as_deref()).await {
        Some(handle) => {
            handle.session.lock().await.clear_retriever();
            Json(json!({"ok": true, "rag_enabled": false}))
        }
        None => no_session(),
    }
}

async fn post_reset(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SessionQuery>,
) -> Json<Value> {
    match state.session(q.session.as_deref()).await {
        Some(handle) => {
            handle.session.lock().await.reset();
            Json(json!({"ok": true}))
        }
        None => no_session(),
    }
}

// --- Ollama models ---

#[derive(Deserialize)]
struct ModelsQuery {
    url: Option<String>,
}

async fn get_models(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ModelsQuery>,
) -> Json<Value> {
    let url = q.url.unwrap_or_else(|| state.config.bot.ollama_url.clone());
    match providers::list_ollama_models(&url).await {
        Ok(models) => Json(json!({"ok": true, "models": models})),
        Err(e) => Json(json!({"ok": false, "error": format!("{:#}", e)})),
    }
}
