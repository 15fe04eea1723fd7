//! HTTP surface of the relay: one websocket endpoint plus a health probe.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use materna_backend::Backend;
use materna_config::RelayConfig;
use materna_relay::{ConnectionRegistry, RelayDispatcher};
use tower_http::cors::CorsLayer;

pub mod telemetry;
pub mod ws;

pub struct AppState<B> {
    pub dispatcher: Arc<RelayDispatcher<B>>,
    pub send_queue_depth: usize,
}

impl<B> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            send_queue_depth: self.send_queue_depth,
        }
    }
}

pub fn build_router<B: Backend>(backend: B, relay: &RelayConfig) -> Router {
    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Arc::new(RelayDispatcher::new(
        backend,
        registry,
        Duration::from_secs(relay.persist_timeout_seconds),
    ));
    let state = AppState {
        dispatcher,
        send_queue_depth: relay.send_queue_depth,
    };

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::websocket_handler::<B>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
