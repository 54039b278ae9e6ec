//! Server API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use basket_core::{BlobStore, CurrencyCode, MockBackend};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

struct TestApp {
    router: Router,
    db: Database,
    blobs: Arc<LocalBlobStore>,
    _dir: TempDir,
}

fn corner_market_receipt() -> String {
    let date = (chrono::Utc::now().date_naive() - chrono::Duration::days(3))
        .format("%Y-%m-%d")
        .to_string();
    serde_json::json!({
        "store_name": "Corner Market",
        "purchase_date": date,
        "total_amount": 2.49,
        "currency_code": null,
        "currency_evidence": "$",
        "items": [{"name": "GTRD FRST BOISS", "unit_price": 2.49, "quantity": 1, "category_id": 7}]
    })
    .to_string()
}

fn default_mock() -> MockBackend {
    MockBackend::new()
        .with_extraction_response(corner_market_receipt())
        .with_translation(
            "GTRD FRST BOISS",
            "Gatorade Frost Glacier Freeze",
            "Gatorade Frost Glacier",
            Some(7),
        )
}

fn setup_app(ai: Option<MockBackend>, config: ServerConfig) -> TestApp {
    let db = Database::in_memory().unwrap();
    db.seed_default_categories().unwrap();
    let dir = TempDir::new().unwrap();
    let blobs = Arc::new(
        LocalBlobStore::new(dir.path().join("blobs"), "http://localhost:3000", "test-secret").unwrap(),
    );
    let router = create_router(
        db.clone(),
        blobs.clone(),
        ai.map(AIClient::Mock),
        PipelineConfig::default(),
        config,
    );
    TestApp {
        router,
        db,
        blobs,
        _dir: dir,
    }
}

fn setup_test_app() -> TestApp {
    let config = ServerConfig {
        require_auth: false,
        ..Default::default()
    };
    setup_app(Some(default_mock()), config)
}

async fn get_body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_image(uri: &str, bytes: &'static [u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "image/jpeg")
        .body(Body::from(bytes))
        .unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

// ========== Health & Reference Data ==========

#[tokio::test]
async fn test_health() {
    let app = setup_test_app();

    let response = app.router.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["storage"], "local");
    assert_eq!(json["ai"]["configured"], true);
    assert_eq!(json["ai"]["model"], "mock");
}

#[tokio::test]
async fn test_list_categories() {
    let app = setup_test_app();

    let response = app.router.oneshot(get("/api/categories")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    let categories = json.as_array().unwrap();
    assert!(categories.iter().any(|c| c["name"] == "Beverages"));
}

// ========== Ingestion ==========

#[tokio::test]
async fn test_ingest_receipt() {
    let app = setup_test_app();

    let response = app
        .router
        .clone()
        .oneshot(post_image("/api/receipts", JPEG))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["success"], true);
    let id = json["receipt_id"].as_i64().unwrap();
    assert_eq!(json["data"]["store_name"], "Corner Market");
    assert_eq!(json["data"]["currency_code"], "USD");
    assert_eq!(json["data"]["items"][0]["readable_name"], "Gatorade Frost Glacier");
    assert_eq!(json["data"]["degraded"], false);

    let response = app
        .router
        .oneshot(get(&format!("/api/receipts/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["status"], "processed");
    assert_eq!(json["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_ingest_empty_body_rejected() {
    let app = setup_test_app();

    let response = app
        .router
        .oneshot(post_image("/api/receipts", b""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ingest_without_ai_is_unavailable() {
    let app = setup_app(
        None,
        ServerConfig {
            require_auth: false,
            ..Default::default()
        },
    );

    let response = app
        .router
        .oneshot(post_image("/api/receipts", JPEG))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_malformed_extraction_response() {
    let config = ServerConfig {
        require_auth: false,
        ..Default::default()
    };
    let app = setup_app(
        Some(MockBackend::new().with_extraction_response("The image is too blurry.")),
        config,
    );

    let response = app
        .router
        .oneshot(post_image("/api/receipts", JPEG))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let json = get_body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error_kind"], "malformed_extraction");
    assert_eq!(json["retryable"], false);
    // Placeholder is kept
    let id = json["receipt_id"].as_i64().unwrap();
    assert!(app.db.get_receipt(id).unwrap().is_some());
}

#[tokio::test]
async fn test_process_trigger() {
    let app = setup_test_app();
    let id = app
        .db
        .create_placeholder_receipt("local-dev", chrono::Utc::now().date_naive(), CurrencyCode::Eur)
        .unwrap();

    let response = app
        .router
        .oneshot(post_json(
            "/api/receipts/process",
            serde_json::json!({"receipt_id": id, "image_url": "https://cdn.example.com/r.jpg"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["receipt_id"], id);
    assert_eq!(json["data"]["total_amount"], 2.49);
}

#[tokio::test]
async fn test_process_unknown_receipt() {
    let app = setup_test_app();

    let response = app
        .router
        .oneshot(post_json(
            "/api/receipts/process",
            serde_json::json!({"receipt_id": 999, "image_url": "https://cdn.example.com/r.jpg"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = get_body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error_kind"], "not_found");
}

#[tokio::test]
async fn test_process_rejects_non_http_url() {
    let app = setup_test_app();

    let response = app
        .router
        .oneshot(post_json(
            "/api/receipts/process",
            serde_json::json!({"receipt_id": 1, "image_url": "file:///etc/passwd"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reprocess_receipt_without_image() {
    let app = setup_test_app();
    let id = app
        .db
        .create_placeholder_receipt("local-dev", chrono::Utc::now().date_naive(), CurrencyCode::Eur)
        .unwrap();

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/receipts/{}/reprocess", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_list_receipts_and_translations() {
    let app = setup_test_app();

    for _ in 0..2 {
        let response = app
            .router
            .clone()
            .oneshot(post_image("/api/receipts", JPEG))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.router.clone().oneshot(get("/api/receipts")).await.unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 2);

    let response = app.router.clone().oneshot(get("/api/translations")).await.unwrap();
    let json = get_body_json(response).await;
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["readable_name"], "Gatorade Frost Glacier");

    let response = app.router.oneshot(get("/api/receipts/partial")).await.unwrap();
    let json = get_body_json(response).await;
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_get_unknown_receipt() {
    let app = setup_test_app();

    let response = app.router.oneshot(get("/api/receipts/12345")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ========== Signed Files ==========

#[tokio::test]
async fn test_signed_download() {
    let app = setup_test_app();
    app.blobs.upload("local-dev/1.jpg", JPEG, "image/jpeg").await.unwrap();

    let url = app.blobs.sign_url("local-dev/1.jpg", 60).await.unwrap();
    let path_and_query = url.trim_start_matches("http://localhost:3000");

    let response = app.router.clone().oneshot(get(path_and_query)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/jpeg");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], JPEG);

    let tampered = path_and_query.replace("local-dev/1.jpg", "local-dev/2.jpg");
    let response = app.router.clone().oneshot(get(&tampered)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .router
        .oneshot(get("/files/local-dev/1.jpg?expires=1&signature=00"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// ========== Auth ==========

fn auth_config() -> ServerConfig {
    ServerConfig {
        require_auth: true,
        api_keys: vec!["service-key".to_string()],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_auth_required() {
    let app = setup_app(Some(default_mock()), auth_config());

    let response = app.router.clone().oneshot(get("/api/receipts")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/receipts")
                .header("authorization", "Bearer wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/receipts")
                .header("authorization", "Bearer service-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Health stays public
    let response = app.router.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_receipts_scoped_to_user() {
    let app = setup_app(Some(default_mock()), auth_config());

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/receipts")
                .header("cf-access-authenticated-user-email", "alice@example.com")
                .body(Body::from(JPEG))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let id = get_body_json(response).await["receipt_id"].as_i64().unwrap();

    let as_user = |email: &str| {
        Request::builder()
            .uri(format!("/api/receipts/{}", id))
            .header("cf-access-authenticated-user-email", email)
            .body(Body::empty())
            .unwrap()
    };

    let response = app.router.clone().oneshot(as_user("alice@example.com")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.router.oneshot(as_user("bob@example.com")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[test]
fn test_validate_api_key() {
    let keys = vec!["abc123".to_string(), "other".to_string()];
    assert!(validate_api_key("abc123", &keys));
    assert!(validate_api_key("other", &keys));
    assert!(!validate_api_key("abc124", &keys));
    assert!(!validate_api_key("abc", &keys));
    assert!(!validate_api_key("abc123", &[]));
}

#[test]
fn test_parse_api_keys() {
    assert_eq!(parse_api_keys(" a, ,b ,"), vec!["a".to_string(), "b".to_string()]);
    assert!(parse_api_keys("").is_empty());
}

#[test]
fn test_get_user_email() {
    let mut headers = axum::http::HeaderMap::new();
    assert_eq!(get_user_email(&headers), "local-dev");

    headers.insert("authorization", "Bearer key".parse().unwrap());
    assert_eq!(get_user_email(&headers), "api-key");

    headers.insert("cf-access-authenticated-user-email", "alice@example.com".parse().unwrap());
    assert_eq!(get_user_email(&headers), "alice@example.com");
}
