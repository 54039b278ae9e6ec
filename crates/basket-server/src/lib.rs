//! Basket Web Server
//!
//! Axum-based REST API for the receipt ingestion pipeline.
//!
//! Security features:
//! - Cloudflare Access header or API key authentication (use --no-auth for local dev)
//! - Receipts are scoped to the authenticated user
//! - Receipt images served only through short-lived signed URLs
//! - Restrictive CORS policy
//! - Sanitized error responses

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use basket_core::{
    AIBackend, AIClient, Database, IngestionPipeline, LocalBlobStore, PipelineConfig,
};

mod handlers;

/// Maximum receipt image size (10 MB)
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Maximum pagination limit
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// Cloudflare Access header for authenticated user email
const CF_ACCESS_USER_HEADER: &str = "cf-access-authenticated-user-email";

/// Authorization header for API key auth
const AUTHORIZATION_HEADER: &str = "authorization";

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Whether authentication is required (secure by default)
    pub require_auth: bool,
    /// Allowed CORS origins (empty = same-origin only)
    pub allowed_origins: Vec<String>,
    /// API keys for internal service authentication, sent as "Bearer <key>"
    pub api_keys: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            allowed_origins: vec![],
            api_keys: vec![],
        }
    }
}

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub config: ServerConfig,
    /// Receipt image store; also verifies signed download URLs
    pub blobs: Arc<LocalBlobStore>,
    /// None when no AI backend is configured
    pub pipeline: Option<IngestionPipeline>,
}

impl AppState {
    /// The ingestion pipeline, or 503 when AI is not configured
    pub fn pipeline(&self) -> Result<&IngestionPipeline, AppError> {
        self.pipeline
            .as_ref()
            .ok_or_else(|| AppError::unavailable("AI backend not configured"))
    }
}

/// Authentication middleware - validates Cloudflare Access headers or API keys
///
/// The `CF-Access-Authenticated-User-Email` header is trusted as-is. This is
/// safe behind Cloudflare Tunnel (which strips and rewrites CF headers), but
/// can be spoofed if the server is exposed directly to the internet.
///
/// API keys are compared in constant time.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.require_auth {
        return next.run(request).await;
    }

    let cf_user = request
        .headers()
        .get(CF_ACCESS_USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty());

    if let Some(email) = cf_user {
        info!(user = %email, path = %request.uri().path(), "Authenticated via Cloudflare Access header");
        return next.run(request).await;
    }

    let api_key_valid = request
        .headers()
        .get(AUTHORIZATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(|key| validate_api_key(key, &state.config.api_keys))
        .unwrap_or(false);

    if api_key_valid {
        info!(user = "api-key", path = %request.uri().path(), "Authenticated via API key");
        return next.run(request).await;
    }

    warn!(path = %request.uri().path(), "Unauthorized request - no valid auth");
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": "Authentication required"
        })),
    )
        .into_response()
}

/// Validate an API key against the configured keys using constant-time comparison
fn validate_api_key(provided: &str, valid_keys: &[String]) -> bool {
    use subtle::ConstantTimeEq;

    let provided_bytes = provided.as_bytes();

    for key in valid_keys {
        let key_bytes = key.as_bytes();
        // Only compare if lengths match (constant-time for same-length keys)
        if provided_bytes.len() == key_bytes.len() && bool::from(provided_bytes.ct_eq(key_bytes)) {
            return true;
        }
    }
    false
}

/// Parse a comma-separated list of API keys, ignoring blanks
pub fn parse_api_keys(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Identify the owner of a request
///
/// Returns the CF Access email, "api-key" for API key auth, or "local-dev"
/// when unauthenticated.
pub fn get_user_email(headers: &axum::http::HeaderMap) -> String {
    if let Some(email) = headers
        .get(CF_ACCESS_USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
    {
        return email.to_string();
    }

    if headers
        .get(AUTHORIZATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .is_some()
    {
        return "api-key".to_string();
    }

    "local-dev".to_string()
}

/// Create the application router
///
/// `ai` is optional: without it the read endpoints still work and the
/// ingestion endpoints answer 503.
pub fn create_router(
    db: Database,
    blobs: Arc<LocalBlobStore>,
    ai: Option<AIClient>,
    pipeline_config: PipelineConfig,
    config: ServerConfig,
) -> Router {
    match &ai {
        Some(client) => info!(
            "AI backend configured: {} (model: {})",
            client.host(),
            client.model()
        ),
        None => info!(
            "AI backend not configured (set OPENAI_COMPATIBLE_HOST or OLLAMA_HOST to enable ingestion)"
        ),
    }

    let pipeline =
        ai.map(|ai| IngestionPipeline::new(db.clone(), blobs.clone(), ai, pipeline_config));

    let state = Arc::new(AppState {
        db,
        config: config.clone(),
        blobs,
        pipeline,
    });

    let api_routes = Router::new()
        // Receipts
        .route(
            "/receipts",
            get(handlers::list_receipts).post(handlers::ingest_receipt),
        )
        .route("/receipts/partial", get(handlers::list_partial_receipts))
        .route("/receipts/process", post(handlers::process_receipt))
        .route("/receipts/:id", get(handlers::get_receipt))
        .route("/receipts/:id/reprocess", post(handlers::reprocess_receipt))
        // Reference data
        .route("/categories", get(handlers::list_categories))
        .route("/translations", get(handlers::list_translations))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Health and signed downloads carry their own authorization
    let public_routes = Router::new()
        .route("/api/health", get(handlers::health))
        .route("/files/*path", get(handlers::download_file));

    let cors_methods = [Method::GET, Method::POST, Method::OPTIONS];
    let cors_headers = [header::CONTENT_TYPE, header::AUTHORIZATION];
    let cors = if config.allowed_origins.is_empty() {
        CorsLayer::new()
            .allow_methods(cors_methods)
            .allow_headers(cors_headers)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(cors_methods)
            .allow_headers(cors_headers)
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(public_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
}

/// Start the server with custom configuration
pub async fn serve_with_config(
    db: Database,
    blobs: Arc<LocalBlobStore>,
    pipeline_config: PipelineConfig,
    host: &str,
    port: u16,
    config: ServerConfig,
) -> anyhow::Result<()> {
    if !config.require_auth {
        warn!("Authentication disabled - do not expose to network!");
    }

    let ai = AIClient::from_env();
    check_ai_connection(ai.as_ref()).await;

    match db.list_partial_receipts(None) {
        Ok(partial) if !partial.is_empty() => {
            warn!(
                count = partial.len(),
                "Receipts with a header but no items found; reprocess them to recover"
            );
        }
        Ok(_) => {}
        Err(e) => warn!("Failed to check for partially committed receipts: {}", e),
    }

    let app = create_router(db, blobs, ai, pipeline_config, config);
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Check and log AI backend connection status
async fn check_ai_connection(ai: Option<&AIClient>) {
    match ai {
        Some(client) => {
            if client.health_check().await {
                info!("AI backend connected: {} (model: {})", client.host(), client.model());
            } else {
                warn!(
                    "AI backend configured but not responding: {} (model: {})",
                    client.host(),
                    client.model()
                );
            }
        }
        None => {
            info!("AI backend not configured; ingestion endpoints disabled");
        }
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    internal: Option<anyhow::Error>,
}

impl AppError {
    pub fn bad_request(msg: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn not_found(msg: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn forbidden(msg: &str) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn unavailable(msg: &str) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: msg.to_string(),
            internal: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(err) = &self.internal {
            error!(error = %err, "Internal error");
        }

        let body = Json(serde_json::json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "An internal error occurred".to_string(),
            internal: Some(err.into()),
        }
    }
}

/// Envelope returned by the ingestion endpoints
#[derive(Debug, Serialize)]
pub struct IngestResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

#[cfg(test)]
mod tests;
