//! Receipt handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::{
    get_user_email, AppError, AppState, IngestResponse, MAX_PAGE_LIMIT, MAX_UPLOAD_SIZE,
};
use basket_core::{IngestError, ProcessedReceipt, Receipt, ReceiptWithItems};

type IngestResult = (StatusCode, Json<IngestResponse<ProcessedReceipt>>);

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

/// Request body for the external processing trigger
#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub receipt_id: i64,
    pub image_url: String,
}

/// Map a pipeline outcome onto the response envelope
fn ingest_response(result: Result<ProcessedReceipt, IngestError>) -> IngestResult {
    match result {
        Ok(processed) => (
            StatusCode::OK,
            Json(IngestResponse {
                success: true,
                receipt_id: Some(processed.id()),
                data: Some(processed),
                error: None,
                error_kind: None,
                retryable: None,
            }),
        ),
        Err(err) => {
            // Full cause is already logged by the pipeline; clients get a summary
            let (status, message) = match &err {
                IngestError::NotFound(_) => (StatusCode::NOT_FOUND, "Receipt not found"),
                IngestError::MissingImage(_) => {
                    (StatusCode::CONFLICT, "Receipt has no stored image to process")
                }
                IngestError::MalformedExtraction { .. } => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "Could not read structured data from the receipt image",
                ),
                IngestError::Upload { .. } => {
                    (StatusCode::BAD_GATEWAY, "Failed to store receipt image")
                }
                IngestError::SignUrl { .. } => {
                    (StatusCode::BAD_GATEWAY, "Failed to sign receipt image URL")
                }
                IngestError::Extraction { .. } => {
                    (StatusCode::BAD_GATEWAY, "Receipt extraction failed")
                }
                IngestError::Placeholder(_) | IngestError::Commit { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "Failed to save receipt")
                }
                IngestError::Database { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read receipt data")
                }
            };
            (
                status,
                Json(IngestResponse {
                    success: false,
                    receipt_id: err.receipt_id(),
                    data: None,
                    error: Some(message.to_string()),
                    error_kind: Some(err.kind()),
                    retryable: Some(err.is_retryable()),
                }),
            )
        }
    }
}

/// GET /api/receipts - List the caller's receipts, newest purchase first
pub async fn list_receipts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
    request: Request,
) -> Result<Json<Vec<Receipt>>, AppError> {
    let owner = get_user_email(request.headers());
    let limit = query.limit.unwrap_or(100).clamp(1, MAX_PAGE_LIMIT);
    Ok(Json(state.db.list_receipts(&owner, limit)?))
}

/// GET /api/receipts/partial - Receipts whose header was written but items were not
pub async fn list_partial_receipts(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<Vec<Receipt>>, AppError> {
    let owner = get_user_email(request.headers());
    Ok(Json(state.db.list_partial_receipts(Some(&owner))?))
}

/// GET /api/receipts/:id - Receipt header with its items
pub async fn get_receipt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    request: Request,
) -> Result<Json<ReceiptWithItems>, AppError> {
    let owner = get_user_email(request.headers());
    let receipt = state
        .db
        .get_receipt_with_items(id, &owner)?
        .ok_or_else(|| AppError::not_found("Receipt not found"))?;
    Ok(Json(receipt))
}

/// POST /api/receipts - Upload a receipt image (raw body) and run the full pipeline
pub async fn ingest_receipt(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<IngestResult, AppError> {
    let owner = get_user_email(request.headers());
    let pipeline = state.pipeline()?;

    let bytes = axum::body::to_bytes(request.into_body(), MAX_UPLOAD_SIZE)
        .await
        .map_err(|_| AppError::bad_request("Invalid request body or file too large (max 10MB)"))?;

    if bytes.is_empty() {
        return Err(AppError::bad_request("No image data provided"));
    }

    Ok(ingest_response(pipeline.ingest(&bytes, &owner).await))
}

/// POST /api/receipts/process - Process an existing receipt from an image URL
pub async fn process_receipt(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<ProcessRequest>,
) -> Result<IngestResult, AppError> {
    let owner = get_user_email(&headers);
    let pipeline = state.pipeline()?;

    let image_url = body.image_url.trim();
    if !(image_url.starts_with("http://") || image_url.starts_with("https://")) {
        return Err(AppError::bad_request("image_url must be an http(s) URL"));
    }

    Ok(ingest_response(
        pipeline
            .process_with_url(body.receipt_id, &owner, image_url)
            .await,
    ))
}

/// POST /api/receipts/:id/reprocess - Re-run extraction from the stored image
pub async fn reprocess_receipt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    request: Request,
) -> Result<IngestResult, AppError> {
    let owner = get_user_email(request.headers());
    let pipeline = state.pipeline()?;
    Ok(ingest_response(pipeline.process(id, &owner).await))
}
