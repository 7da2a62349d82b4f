use std::sync::Arc;

use axum::http::Method;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::rooms::Registry;
use crate::ws::ws_handler;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    active_rooms: usize,
}

async fn health_check(
    axum::extract::State(registry): axum::extract::State<Arc<Registry>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        active_rooms: registry.room_count(),
    })
}

pub fn build_router(registry: Arc<Registry>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(health_check))
        .route("/", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

pub async fn serve(registry: Arc<Registry>, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(registry);

    info!(addr = %addr, "starting signaling server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
