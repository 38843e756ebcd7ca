// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod health;
pub mod verification;
pub mod ws;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/verification/events", post(verification::webhook))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state)
        .nest("/v1", v1_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
