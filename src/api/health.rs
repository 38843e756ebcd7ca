// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;

/// Health check response with individual component status.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Whether the service process is running.
    pub service: String,
    /// Currently connected transport sessions.
    pub sessions: usize,
}

/// Simple health check response for liveness probes.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Health check endpoint handler.
///
/// Session state is in-memory only, so the process being up is the whole
/// story; there are no storage dependencies to probe.
pub async fn health(State(state): State<AppState>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        status: "ok".to_string(),
        checks: HealthChecks {
            service: "ok".to_string(),
            sessions: state.registry.session_count(),
        },
    })
}

/// Liveness probe handler. Always returns 200 if the process is running.
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness probe handler, for Kubernetes readiness probes.
pub async fn readiness(state: State<AppState>) -> Json<ReadyResponse> {
    health(state).await
}
