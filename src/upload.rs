use axum::http::{header, HeaderMap};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::models::ImagePayload;
use crate::services::ingest::decode_base64_image;

/// JSON body sent by the scanner app.
#[derive(Debug, Deserialize, Serialize)]
pub struct ImageUpload {
    /// Base64 image, optionally with a `data:image/...;base64,` prefix.
    pub image: String,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
}

fn is_raw_image(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            let ct = ct.trim().to_lowercase();
            ct.starts_with("image/") || ct.starts_with("application/octet-stream")
        })
        .unwrap_or(false)
}

fn dimension_header(headers: &HeaderMap, name: &str) -> Option<u32> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Extract the image from a request body: raw image bytes (size from the
/// `X-Image-*` headers) or the JSON upload format.
pub fn payload_from_request(headers: &HeaderMap, body: &[u8]) -> Result<ImagePayload, PipelineError> {
    if is_raw_image(headers) {
        if body.is_empty() {
            return Err(PipelineError::InvalidInput("image payload is empty".to_string()));
        }
        log::info!("🖼️ Raw image body: {} bytes", body.len());
        return Ok(ImagePayload::new(
            body.to_vec(),
            dimension_header(headers, "x-image-width"),
            dimension_header(headers, "x-image-height"),
        ));
    }

    let upload: ImageUpload = serde_json::from_slice(body)
        .map_err(|e| PipelineError::decode("request body is not a valid image upload", e))?;

    match (upload.width, upload.height) {
        (Some(width), Some(height)) => log::info!("📐 Received dimensions from JSON: {}x{}", width, height),
        _ => log::debug!("📐 No dimensions in upload"),
    }

    let bytes = decode_base64_image(&upload.image)?;
    Ok(ImagePayload::new(bytes, upload.width, upload.height))
}

pub mod server {
    use super::*;
    use axum::{
        body::Bytes,
        extract::{rejection::BytesRejection, DefaultBodyLimit, State},
        http::{HeaderValue, StatusCode},
        response::{IntoResponse, Response},
        routing::get,
        Json, Router,
    };
    use std::sync::Arc;
    use tower::ServiceBuilder;
    use tower_http::set_header::SetResponseHeaderLayer;

    use crate::models::ErrorResponse;
    use crate::services::TransientSlot;

    const INGESTION_STAGE: &str = "ingestion";

    pub struct AppState {
        pub slot: TransientSlot,
    }

    pub fn create_scan_router(slot: TransientSlot, max_body_bytes: usize) -> Router {
        let state = Arc::new(AppState { slot });

        let cors = ServiceBuilder::new()
            .layer(SetResponseHeaderLayer::overriding(
                header::ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static("*"),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("POST, OPTIONS"),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static("Content-Type, X-Image-Height, X-Image-Width"),
            ));

        Router::new()
            .route(
                "/",
                get(root_handler).post(scan_handler).options(preflight_handler),
            )
            .route("/health", get(health_check))
            .layer(DefaultBodyLimit::max(max_body_bytes))
            .layer(cors)
            .with_state(state)
    }

    fn error_reply(status: StatusCode, body: ErrorResponse) -> Response {
        (status, Json(body)).into_response()
    }

    async fn scan_handler(
        State(state): State<Arc<AppState>>,
        headers: HeaderMap,
        body: Result<Bytes, BytesRejection>,
    ) -> Response {
        let body = match body {
            Ok(body) => body,
            Err(rejection) => {
                let e = PipelineError::InvalidInput(rejection.body_text());
                log::error!("❌ Could not read request body: {}", e);
                return error_reply(rejection.status(), e.to_response(INGESTION_STAGE));
            }
        };

        log::info!("📸 Received POST request ({} bytes)", body.len());

        let payload = match payload_from_request(&headers, &body) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("❌ Image decode error: {}", e);
                return error_reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_response(INGESTION_STAGE));
            }
        };

        match state.slot.scan(&payload.bytes, payload.declared).await {
            Ok(Ok(record)) => {
                log::info!("✅ Sending nutrition data for {}", record.food_item.name);
                (StatusCode::OK, Json(record)).into_response()
            }
            Ok(Err(response)) => error_reply(StatusCode::INTERNAL_SERVER_ERROR, response),
            Err(e @ PipelineError::SlotBusy) => {
                log::warn!("⚠️ Rejected image: {}", e);
                error_reply(StatusCode::SERVICE_UNAVAILABLE, e.to_response(INGESTION_STAGE))
            }
            Err(e) => {
                log::error!("❌ Could not queue image: {}", e);
                error_reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_response(INGESTION_STAGE))
            }
        }
    }

    async fn preflight_handler() -> impl IntoResponse {
        (StatusCode::OK, Json(serde_json::json!({})))
    }

    async fn root_handler() -> &'static str {
        "Food Scan Nutrition Server - POST an image to / for a nutrition estimate"
    }

    async fn health_check() -> &'static str {
        "OK"
    }
}

#[cfg(test)]
mod tests {
    use super::server::create_scan_router;
    use super::*;
    use crate::config::SlotPolicy;
    use crate::handlers::scan::tests::{StubClassifier, StubEnricher, APPLE_PIE};
    use crate::handlers::ScanHandler;
    use crate::models::{ErrorResponse, NutritionRecord};
    use crate::services::ingest::tests::encoded_image;
    use crate::services::TransientSlot;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use base64::{engine::general_purpose, Engine};
    use image::ImageFormat;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        slot: TransientSlot,
        enricher: Arc<StubEnricher>,
        spool: std::path::PathBuf,
        _dir: tempfile::TempDir,
    }

    fn app(enricher: StubEnricher, policy: SlotPolicy) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let spool = dir.path().join("received_image.jpg");
        let (slot, jobs) = TransientSlot::new(spool.clone(), policy);

        let enricher = Arc::new(enricher);
        let classifier = StubClassifier::returning(&[("apple_pie", 0.87), ("waffles", 0.06)]);
        let handler = Arc::new(ScanHandler::new(Arc::new(classifier), enricher.clone(), None));
        tokio::spawn(handler.run(jobs));

        TestApp {
            router: create_scan_router(slot.clone(), 10 * 1024 * 1024),
            slot,
            enricher,
            spool,
            _dir: dir,
        }
    }

    fn json_upload(image_field: &str) -> Request<Body> {
        let body = serde_json::json!({ "image": image_field, "height": 48, "width": 64 });
        Request::builder()
            .method("POST")
            .uri("/")
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn jpeg_data_uri() -> String {
        let jpeg = encoded_image(64, 48, ImageFormat::Jpeg);
        let encoded = general_purpose::STANDARD.encode(jpeg);
        format!("data:image/jpeg;base64,{}", encoded.trim_end_matches('='))
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_valid_photo_returns_nutrition_record() {
        let app = app(StubEnricher::answering(APPLE_PIE), SlotPolicy::Wait);

        let response = app.router.clone().oneshot(json_upload(&jpeg_data_uri())).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "application/json");
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert_eq!(body_string(response).await, APPLE_PIE);

        app.slot.wait_idle().await;
        assert!(!app.spool.exists());
    }

    #[tokio::test]
    async fn test_corrupt_image_returns_error_body() {
        let app = app(StubEnricher::answering(APPLE_PIE), SlotPolicy::Wait);
        let garbage = general_purpose::STANDARD.encode(b"\x00\x01 corrupted camera frame");

        let response = app.router.clone().oneshot(json_upload(&garbage)).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()["content-type"], "application/json");
        let error: ErrorResponse = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(error.status, "error");
        assert!(error.message.contains("failed to load image"));
        assert!(error.traceback.contains("DecodeError"));
        assert_eq!(app.enricher.calls.load(Ordering::SeqCst), 0);

        app.slot.wait_idle().await;
        assert!(!app.spool.exists());
    }

    #[tokio::test]
    async fn test_fenced_enrichment_answer_is_parsed() {
        let fenced = format!("```json\n{}\n```", APPLE_PIE);
        let app = app(StubEnricher::answering(&fenced), SlotPolicy::Wait);

        let response = app.router.clone().oneshot(json_upload(&jpeg_data_uri())).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, APPLE_PIE);
    }

    #[tokio::test]
    async fn test_malformed_enrichment_answer_falls_back() {
        let app = app(StubEnricher::answering("Apple pie is tasty!"), SlotPolicy::Wait);

        let response = app.router.clone().oneshot(json_upload(&jpeg_data_uri())).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let record: NutritionRecord = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(record, NutritionRecord::placeholder("apple_pie"));
    }

    #[tokio::test]
    async fn test_raw_image_body() {
        let app = app(StubEnricher::answering(APPLE_PIE), SlotPolicy::Wait);
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header("Content-Type", "image/png")
            .header("X-Image-Width", "30")
            .header("X-Image-Height", "20")
            .body(Body::from(encoded_image(30, 20, ImageFormat::Png)))
            .unwrap();

        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invalid_json_body() {
        let app = app(StubEnricher::answering(APPLE_PIE), SlotPolicy::Wait);
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header("Content-Type", "application/json")
            .body(Body::from(r#"{"height": 10}"#))
            .unwrap();

        let response = app.router.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let error: ErrorResponse = serde_json::from_str(&body_string(response).await).unwrap();
        assert!(error.traceback.starts_with("stage: ingestion\nDecodeError"));
    }

    #[tokio::test]
    async fn test_oversized_body_returns_error_body() {
        let mut app = app(StubEnricher::answering(APPLE_PIE), SlotPolicy::Wait);
        app.router = create_scan_router(app.slot.clone(), 1024);
        let padding = "A".repeat(4096);

        let response = app.router.clone().oneshot(json_upload(&padding)).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response.headers()["content-type"], "application/json");
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        let error: ErrorResponse = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(error.status, "error");
        assert!(error.traceback.starts_with("stage: ingestion\nDecodeError"));
        assert_eq!(app.enricher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_preflight_has_cors_headers() {
        let app = app(StubEnricher::answering(APPLE_PIE), SlotPolicy::Wait);
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/")
            .body(Body::empty())
            .unwrap();

        let response = app.router.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers["access-control-allow-methods"], "POST, OPTIONS");
        assert_eq!(
            headers["access-control-allow-headers"],
            "Content-Type, X-Image-Height, X-Image-Width"
        );
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = app(StubEnricher::answering(APPLE_PIE), SlotPolicy::Wait);
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "OK");
    }

    #[tokio::test]
    async fn test_back_to_back_uploads_with_reject_policy() {
        let enricher = StubEnricher::answering(APPLE_PIE).with_delay(Duration::from_millis(300));
        let app = app(enricher, SlotPolicy::Reject);

        let (first, second) = tokio::join!(
            app.router.clone().oneshot(json_upload(&jpeg_data_uri())),
            app.router.clone().oneshot(json_upload(&jpeg_data_uri())),
        );
        let mut statuses = vec![first.unwrap().status(), second.unwrap().status()];
        statuses.sort();

        assert_eq!(statuses, vec![StatusCode::OK, StatusCode::SERVICE_UNAVAILABLE]);
        assert_eq!(app.enricher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_back_to_back_uploads_with_wait_policy() {
        let enricher = StubEnricher::answering(APPLE_PIE).with_delay(Duration::from_millis(100));
        let app = app(enricher, SlotPolicy::Wait);

        let (first, second) = tokio::join!(
            app.router.clone().oneshot(json_upload(&jpeg_data_uri())),
            app.router.clone().oneshot(json_upload(&jpeg_data_uri())),
        );
        let first = first.unwrap();
        let second = second.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(body_string(first).await, APPLE_PIE);
        assert_eq!(body_string(second).await, APPLE_PIE);
        assert_eq!(app.enricher.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_payload_from_json_keeps_dimensions() {
        let body = serde_json::json!({ "image": jpeg_data_uri(), "height": 48, "width": 64 }).to_string();
        let payload = payload_from_request(&HeaderMap::new(), body.as_bytes()).unwrap();

        assert_eq!(payload.declared.unwrap().to_string(), "64x48");
        assert!(!payload.bytes.is_empty());
    }

    #[test]
    fn test_empty_raw_body_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/octet-stream".parse().unwrap());

        let err = payload_from_request(&headers, &[]).unwrap_err();
        assert_eq!(err.kind(), "DecodeError");
    }
}
