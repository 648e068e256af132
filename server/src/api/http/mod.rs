//! HTTP API handlers

mod bash;
mod health;
mod terminal;
pub mod workspace;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Success envelope, `{"code": 0, "data": ...}`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: u32,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self { code: 0, data })
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Command execution
        .route("/bash/exec", post(bash::exec_command))
        .route("/bash/exec/stream", post(bash::exec_command_stream))
        // Interactive terminal
        .route("/terminal/ws", get(terminal::terminal_websocket));

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
