//! Axum app: shared state, router, and server entry.
//!
//! The router exposes the OpenAI-compatible chat surface, the conversations
//! API, the uniform filesystem API, and the multiplexed events WebSocket.
//! Everything stateful arrives through [`AppState`]; nothing here owns
//! process-wide services.

pub mod chat;
pub mod conversations;
pub mod error;
pub mod events;
pub mod fsapi;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::sync::broadcast;

use choraleia::Orchestrator;
use choraleia_store::Store;
use config::LlmModelConfig;
use remote_fs::FsRegistry;

pub use events::EventEnvelope;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub orchestrator: Arc<Orchestrator>,
    pub fs_registry: FsRegistry,
    pub models: Arc<Vec<LlmModelConfig>>,
    /// Fan-out bus for the events WebSocket.
    pub events: broadcast::Sender<EventEnvelope>,
}

impl AppState {
    pub fn new(
        store: Arc<Store>,
        orchestrator: Arc<Orchestrator>,
        fs_registry: FsRegistry,
        models: Vec<LlmModelConfig>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        AppState {
            store,
            orchestrator,
            fs_registry,
            models: Arc::new(models),
            events,
        }
    }

    /// Bridges runtime container events onto the WebSocket bus.
    pub fn bridge_runtime_events(&self) {
        let mut rx = self.orchestrator.runtime().subscribe();
        let bus = self.events.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let envelope = EventEnvelope::now(
                    "container",
                    serde_json::to_value(&event).unwrap_or_default(),
                );
                let _ = bus.send(envelope);
            }
        });
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/chat/completions", post(chat::completions))
        .route("/api/v1/chat/cancel", post(chat::cancel))
        .route("/api/v1/chat/status/:conversation_id", get(chat::status))
        .route(
            "/api/v1/conversations",
            get(conversations::list).post(conversations::create),
        )
        .route(
            "/api/v1/conversations/:id",
            axum::routing::patch(conversations::update).delete(conversations::delete),
        )
        .route(
            "/api/v1/conversations/:id/messages",
            get(conversations::messages),
        )
        .route(
            "/api/v1/conversations/:id/generateTitle",
            get(conversations::generate_title),
        )
        .route(
            "/api/v1/workspaces/:id/runtime",
            get(conversations::workspace_runtime),
        )
        .route("/api/fs/ls", get(fsapi::ls))
        .route("/api/fs/stat", get(fsapi::stat))
        .route("/api/fs/read", get(fsapi::read))
        .route("/api/fs/pwd", get(fsapi::pwd))
        .route("/api/fs/upload", post(fsapi::upload))
        .route("/api/fs/write", post(fsapi::write))
        .route("/api/fs/mkdir", post(fsapi::mkdir))
        .route("/api/fs/touch", post(fsapi::touch))
        .route("/api/fs/rm", post(fsapi::rm))
        .route("/api/fs/rename", post(fsapi::rename))
        .route("/api/fs/copy", post(fsapi::copy))
        .route("/api/events/ws", get(events::ws))
        // Uploads stream whole files through the body.
        .layer(axum::extract::DefaultBodyLimit::max(64 * 1024 * 1024))
        .with_state(state)
}

/// Binds and serves until the process ends. Bind failure is a startup
/// error, reported to the caller for exit code 1.
pub async fn run(state: AppState, bind_addr: &str) -> Result<(), std::io::Error> {
    state.bridge_runtime_events();
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "choraleia listening");
    axum::serve(listener, router(state)).await
}
