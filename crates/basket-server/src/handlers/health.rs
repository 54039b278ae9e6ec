//! Health check handler

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;
use basket_core::{AIBackend, BlobStore};

#[derive(Debug, Serialize)]
pub struct AiHealth {
    pub configured: bool,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub database: bool,
    pub storage: String,
    pub ai: AiHealth,
}

/// GET /api/health - Liveness plus dependency status
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    let database = state.db.conn().is_ok();

    let ai = match state.pipeline.as_ref().map(|p| p.ai()) {
        Some(client) => AiHealth {
            configured: true,
            available: client.health_check().await,
            model: Some(client.model().to_string()),
            host: Some(client.host().to_string()),
        },
        None => AiHealth {
            configured: false,
            available: false,
            model: None,
            host: None,
        },
    };

    Json(HealthStatus {
        status: if database { "ok" } else { "degraded" },
        database,
        storage: state.blobs.name().to_string(),
        ai,
    })
}
