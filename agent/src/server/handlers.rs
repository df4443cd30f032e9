//! HTTP request handlers

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use trainer_api::models::ApplicationState;

use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub host_id: String,
    pub apps: usize,
    pub last_checkin_at: Option<DateTime<Utc>>,
}

/// Health check handler
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "hostd".to_string(),
        version: version_info().version,
        host_id: state.adapter.host_id().to_string(),
        apps: state.store.len(),
        last_checkin_at: state.adapter.last_checkin(),
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Every application state
pub async fn apps_handler(State(state): State<Arc<ServerState>>) -> Json<Vec<ApplicationState>> {
    Json(state.store.list_all())
}

/// A single application state
pub async fn app_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<Json<ApplicationState>, StatusCode> {
    state
        .store
        .get(&name)
        .map(Json)
        .map_err(|_| StatusCode::NOT_FOUND)
}

/// Applied change ids
pub async fn changes_handler(State(state): State<Arc<ServerState>>) -> Json<HashMap<String, bool>> {
    Json(state.changes.snapshot())
}
