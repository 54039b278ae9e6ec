//! Signed receipt image downloads

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::warn;

use crate::{AppError, AppState};
use basket_core::storage::content_type_for;
use basket_core::{BlobStore, Error, SignedUrlParams};

/// GET /files/*path?expires=&signature= - Serve a blob behind a valid signature
///
/// No session auth: the signature is the credential, so the extraction model
/// can fetch the image directly.
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(params): Query<SignedUrlParams>,
) -> Result<Response, AppError> {
    if let Err(e) = state
        .blobs
        .verify_signature(&path, &params, Utc::now().timestamp())
    {
        warn!(path = %path, error = %e, "Rejected signed URL");
        return Err(AppError::forbidden("Invalid or expired signature"));
    }

    let bytes = match state.blobs.read(&path).await {
        Ok(bytes) => bytes,
        Err(Error::NotFound(_)) => return Err(AppError::not_found("File not found")),
        Err(e) => return Err(e.into()),
    };

    let ext = path.rsplit('.').next().unwrap_or_default();
    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(ext)),
            (header::CACHE_CONTROL, "private, no-store"),
        ],
        bytes,
    )
        .into_response())
}
