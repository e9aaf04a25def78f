//! HTTP surface tests: sentinel-to-status mapping, the record round-trip,
//! and the API-key check.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use object_store::memory::InMemory;
use skiff_broker::{BatcherKind, Broker, BrokerConfig};
use skiff_core::{batch, RecordBatch};
use skiff_server::{router, AppState};
use skiff_storage::{Cache, MemoryCacheStorage, ObjectStorage};
use tower::ServiceExt;

async fn test_router(auto_create_topics: bool, api_key: Option<&str>) -> Router {
    let storage = Arc::new(ObjectStorage::new(Arc::new(InMemory::new())));
    let cache = Arc::new(Cache::new(Arc::new(MemoryCacheStorage::new())).await.unwrap());
    let broker = Arc::new(Broker::new(
        storage,
        cache,
        BrokerConfig {
            auto_create_topics,
            batcher: BatcherKind::Null,
            ..BrokerConfig::default()
        },
    ));

    router(AppState {
        broker,
        api_key: api_key.map(str::to_string),
    })
}

async fn body_bytes(response: axum::response::Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_record_roundtrip() {
    let app = test_router(true, None).await;

    let response = app
        .clone()
        .oneshot(
            Request::post("/topic/orders/record")
                .body(Body::from("first order"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_bytes(response).await;
    let offset: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(offset["offset"], 0);

    let response = app
        .oneshot(
            Request::get("/topic/orders/record/0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, Bytes::from_static(b"first order"));
}

#[tokio::test]
async fn test_add_and_get_records_batch_format() {
    let app = test_router(true, None).await;

    let records = vec![
        Bytes::from_static(b"one"),
        Bytes::from_static(b"two"),
        Bytes::from_static(b"three"),
    ];
    let encoded = batch::encode(&records).unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::post("/topic/orders/records")
                .body(Body::from(encoded))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_bytes(response).await;
    let offsets: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(offsets["offsets"], serde_json::json!([0, 1, 2]));

    let response = app
        .oneshot(
            Request::get("/topic/orders/records?offset=1&max_records=2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let parsed = RecordBatch::parse(body_bytes(response).await).unwrap();
    assert_eq!(parsed.records().unwrap(), records[1..3].to_vec());
}

#[tokio::test]
async fn test_get_record_out_of_bounds_is_404() {
    let app = test_router(true, None).await;

    let response = app
        .clone()
        .oneshot(
            Request::post("/topic/orders/record")
                .body(Body::from("only record"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::get("/topic/orders/record/5")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_topic_is_404_without_auto_create() {
    let app = test_router(false, None).await;

    let response = app
        .oneshot(
            Request::get("/topic/nowhere/record/0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_offset_is_400() {
    let app = test_router(true, None).await;

    let response = app
        .oneshot(
            Request::get("/topic/orders/record/not-a-number")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_topic_conflict_is_409() {
    let app = test_router(false, None).await;

    let response = app
        .clone()
        .oneshot(Request::post("/topic/orders").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(Request::post("/topic/orders").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_metadata() {
    let app = test_router(true, None).await;

    app.clone()
        .oneshot(
            Request::post("/topic/orders/record")
                .body(Body::from("r"))
                .unwrap(),
        )
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::get("/topic/orders/metadata")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_bytes(response).await;
    let metadata: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(metadata["next_offset"], 1);
    assert!(metadata["latest_commit_at_ms"].as_u64().unwrap() > 0);
}

// -------------------------------------------------------------------
// API key
// -------------------------------------------------------------------

#[tokio::test]
async fn test_missing_api_key_is_401() {
    let app = test_router(true, Some("s3cret")).await;

    let response = app
        .oneshot(
            Request::post("/topic/orders/record")
                .body(Body::from("nope"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_api_key_is_401() {
    let app = test_router(true, Some("s3cret")).await;

    let response = app
        .oneshot(
            Request::post("/topic/orders/record")
                .header(header::AUTHORIZATION, "Bearer wrong")
                .body(Body::from("nope"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_correct_api_key_is_accepted() {
    let app = test_router(true, Some("s3cret")).await;

    let response = app
        .oneshot(
            Request::post("/topic/orders/record")
                .header(header::AUTHORIZATION, "Bearer s3cret")
                .body(Body::from("authorized"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
