//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! The collaboration hub exposes one websocket endpoint per design
//! project plus a health probe. Project CRUD, auth, and asset serving
//! live in other services; browsers still hit this process cross-origin,
//! hence the permissive CORS layer.

pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws/design-projects/{project_id}", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
