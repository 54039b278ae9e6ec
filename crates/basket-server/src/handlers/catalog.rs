//! Category and translation cache handlers (read-only)

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::{AppError, AppState, MAX_PAGE_LIMIT};
use basket_core::{Category, TranslationEntry};

#[derive(Debug, Deserialize)]
pub struct TranslationQuery {
    pub limit: Option<i64>,
}

/// GET /api/categories - The category set offered to the extraction model
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Category>>, AppError> {
    Ok(Json(state.db.list_categories()?))
}

/// GET /api/translations - Cached item name translations, newest first
pub async fn list_translations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TranslationQuery>,
) -> Result<Json<Vec<TranslationEntry>>, AppError> {
    let limit = query.limit.unwrap_or(100).clamp(1, MAX_PAGE_LIMIT);
    Ok(Json(state.db.list_translations(limit)?))
}
