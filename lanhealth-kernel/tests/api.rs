//! Tests d'intégration de l'API : routeur complet, middleware d'auth compris.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use time::{Duration, OffsetDateTime};
use tower::ServiceExt;

use lanhealth_kernel::config::KernelConfig;
use lanhealth_kernel::http::{build_router, AppState};
use lanhealth_kernel::state::ReportStore;

const KEY: &str = "test-key";

fn test_app() -> (Router, ReportStore) {
    let cfg = KernelConfig {
        api_key: KEY.into(),
        stale_seconds: 300,
        ..KernelConfig::default()
    };
    let store = ReportStore::new();
    (build_router(AppState::new(store.clone(), cfg)), store)
}

fn request(method: Method, uri: &str, key: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    builder.body(body).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn as_record(v: Value) -> serde_json::Map<String, Value> {
    match v {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

#[tokio::test]
async fn root_requires_key() {
    let (app, _) = test_app();

    let (status, body) = send(&app, request(Method::GET, "/", Some(KEY), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "API is running"}));

    let (status, body) = send(&app, request(Method::GET, "/", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Invalid API key");

    let (status, _) = send(&app, request(Method::GET, "/", Some("TEST-KEY"), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bad_key_wins_over_validation() {
    let (app, store) = test_app();
    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/device/report",
            Some("wrong"),
            Some(json!({"device_id": "rpi-1", "cpu": 150})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(store.is_empty());

    for uri in ["/device/health?device_id=rpi-1", "/devices/health", "/nope"] {
        let (status, _) = send(&app, request(Method::GET, uri, None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
    }
}

#[tokio::test]
async fn report_then_read_back() {
    let (app, _) = test_app();

    let (status, ack) = send(
        &app,
        request(
            Method::POST,
            "/device/report",
            Some(KEY),
            Some(json!({"device_id": "rpi-1", "cpu": 42.5, "ram": 60})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, json!({"ok": true, "stored_for": "rpi-1"}));

    let (status, body) = send(
        &app,
        request(Method::GET, "/device/health?device_id=rpi-1", Some(KEY), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"device_id": "rpi-1", "cpu": 42.5, "ram": 60, "status": "UNKNOWN"})
    );
}

#[tokio::test]
async fn string_numbers_from_automation_tools_are_accepted() {
    let (app, _) = test_app();

    let (status, ack) = send(
        &app,
        request(
            Method::POST,
            "/device/report",
            Some(KEY),
            Some(json!({"device_id": "make-7", "cpu": "42", "ram": "60", "health_score": 90.0})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["stored_for"], "make-7");

    let (status, body) = send(
        &app,
        request(Method::GET, "/device/health?device_id=make-7", Some(KEY), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "device_id": "make-7",
            "cpu": 42.0,
            "ram": 60.0,
            "health_score": 90,
            "status": "UNKNOWN"
        })
    );
}

#[tokio::test]
async fn second_report_replaces_first() {
    let (app, _) = test_app();
    for payload in [
        json!({"device_id": "nas", "cpu": 5, "extra": {"disk": "ok"}}),
        json!({"device_id": "nas", "status": "OK", "health_score": 90}),
    ] {
        let (status, _) = send(
            &app,
            request(Method::POST, "/device/report", Some(KEY), Some(payload)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, body) = send(
        &app,
        request(Method::GET, "/device/health?device_id=nas", Some(KEY), None),
    )
    .await;
    assert_eq!(
        body,
        json!({"device_id": "nas", "status": "OK", "health_score": 90})
    );
}

#[tokio::test]
async fn invalid_reports_are_422_and_not_stored() {
    let (app, store) = test_app();
    for payload in [
        json!({"device_id": "x", "cpu": 150}),
        json!({"device_id": ""}),
        json!({"cpu": 1}),
        json!({"device_id": "x", "health_score": "high"}),
    ] {
        let (status, body) = send(
            &app,
            request(Method::POST, "/device/report", Some(KEY), Some(payload.clone())),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{payload}");
        assert!(body["detail"].is_string());
    }

    let req = Request::builder()
        .method(Method::POST)
        .uri("/device/report")
        .header("x-api-key", KEY)
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    assert!(store.is_empty());
}

#[tokio::test]
async fn unknown_device_is_404() {
    let (app, _) = test_app();
    send(
        &app,
        request(
            Method::POST,
            "/device/report",
            Some(KEY),
            Some(json!({"device_id": "rpi-1"})),
        ),
    )
    .await;

    let (status, body) = send(
        &app,
        request(Method::GET, "/device/health?device_id=rpi-2", Some(KEY), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "No data yet for this device_id");
}

#[tokio::test]
async fn missing_device_id_param_is_422() {
    let (app, _) = test_app();
    let (status, _) = send(&app, request(Method::GET, "/device/health", Some(KEY), None)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn stale_entry_is_503_with_age() {
    let (app, store) = test_app();
    let received_at = OffsetDateTime::now_utc() - Duration::seconds(400);
    store.upsert_at(
        "rpi-1".into(),
        as_record(json!({"device_id": "rpi-1", "status": "OK", "health_score": 90})),
        received_at,
    );

    let (status, body) = send(
        &app,
        request(Method::GET, "/device/health?device_id=rpi-1", Some(KEY), None),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.starts_with("Device data is stale ("), "{detail}");
    let age: i64 = detail
        .trim_start_matches("Device data is stale (")
        .trim_end_matches("s old)")
        .parse()
        .unwrap();
    assert!((400..405).contains(&age), "{detail}");
}

#[tokio::test]
async fn entry_just_inside_window_is_served() {
    let (app, store) = test_app();
    store.upsert_at(
        "edge".into(),
        as_record(json!({"device_id": "edge", "status": "OK"})),
        OffsetDateTime::now_utc() - Duration::seconds(295),
    );

    let (status, body) = send(
        &app,
        request(Method::GET, "/device/health?device_id=edge", Some(KEY), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
}

#[tokio::test]
async fn all_devices_includes_stale_entries() {
    let (app, store) = test_app();
    store.upsert_at(
        "old".into(),
        as_record(json!({"device_id": "old", "status": "OK"})),
        OffsetDateTime::now_utc() - Duration::hours(1),
    );
    send(
        &app,
        request(
            Method::POST,
            "/device/report",
            Some(KEY),
            Some(json!({"device_id": "fresh", "temperature": 48.2})),
        ),
    )
    .await;

    let (status, body) = send(&app, request(Method::GET, "/devices/health", Some(KEY), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "old": {"device_id": "old", "status": "OK"},
            "fresh": {"device_id": "fresh", "temperature": 48.2, "status": "UNKNOWN"}
        })
    );
}

#[tokio::test]
async fn custom_header_name_is_honoured() {
    let cfg = KernelConfig {
        api_key_header: axum::http::HeaderName::from_static("x-device-key"),
        api_key: KEY.into(),
        ..KernelConfig::default()
    };
    let app = build_router(AppState::new(ReportStore::new(), cfg));

    let (status, _) = send(&app, request(Method::GET, "/", Some(KEY), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/")
        .header("x-device-key", KEY)
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
}
