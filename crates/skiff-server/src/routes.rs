use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use skiff_broker::Broker;
use skiff_core::{batch, Error, RecordBatch};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub api_key: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/topic/:name", post(create_topic))
        .route("/topic/:name/metadata", get(metadata))
        .route("/topic/:name/record", post(add_record))
        .route("/topic/:name/record/:offset", get(get_record))
        .route("/topic/:name/records", post(add_records).get(get_records))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_api_key,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Map a broker error onto its transport-level failure.
pub(crate) fn error_response(err: Error) -> Response {
    let status = match &err {
        Error::TopicNotFound { .. } | Error::OutOfBounds { .. } => StatusCode::NOT_FOUND,
        Error::TopicAlreadyExists { .. } => StatusCode::CONFLICT,
        Error::EmptyBatch | Error::InvalidMagic | Error::UnsupportedVersion(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::Unauthorized => StatusCode::UNAUTHORIZED,
        Error::Canceled => StatusCode::REQUEST_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    // Cancellation is the caller's own deadline at work, not a failure.
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "request failed");
    }

    (status, err.to_string()).into_response()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OffsetResponse {
    pub offset: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OffsetsResponse {
    pub offsets: Vec<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetadataResponse {
    pub next_offset: u64,
    pub latest_commit_at_ms: u64,
}

async fn create_topic(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.broker.create_topic(&name).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => error_response(err),
    }
}

async fn add_record(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    match state.broker.add_record(&name, body).await {
        Ok(offset) => Json(OffsetResponse { offset }).into_response(),
        Err(err) => error_response(err),
    }
}

/// The request body is a record-batch file; its records are appended in
/// order and one offset per record comes back.
async fn add_records(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    let records = match RecordBatch::parse(body).and_then(|parsed| parsed.records()) {
        Ok(records) => records,
        Err(err) => return error_response(err),
    };

    match state.broker.add_records(&name, records).await {
        Ok(offsets) => Json(OffsetsResponse { offsets }).into_response(),
        Err(err) => error_response(err),
    }
}

async fn get_record(
    State(state): State<AppState>,
    Path((name, offset)): Path<(String, u64)>,
) -> Response {
    match state.broker.get_record(&name, offset).await {
        Ok(record) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            record,
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct GetRecordsParams {
    #[serde(default)]
    offset: u64,
    #[serde(default)]
    max_records: usize,
    #[serde(default)]
    soft_max_bytes: usize,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// Responds with a record-batch file holding the requested records, blocking
/// until `offset` is committed or the timeout fires.
async fn get_records(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<GetRecordsParams>,
) -> Response {
    let ctx = CancellationToken::new();
    let timer = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(params.timeout_ms)).await;
            ctx.cancel();
        })
    };

    let result = state
        .broker
        .get_records(
            &ctx,
            &name,
            params.offset,
            params.max_records,
            params.soft_max_bytes,
        )
        .await;
    timer.abort();

    let records = match result {
        Ok(records) => records,
        Err(err) => return error_response(err),
    };

    // The broker never returns an empty set: a successful read always
    // carries at least one record, so the batch encodes unconditionally.
    match batch::encode(&records) {
        Ok(body) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            body,
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

async fn metadata(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.broker.metadata(&name).await {
        Ok(metadata) => {
            let latest_commit_at_ms = metadata
                .latest_commit_at
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64;
            Json(MetadataResponse {
                next_offset: metadata.next_offset,
                latest_commit_at_ms,
            })
            .into_response()
        }
        Err(err) => error_response(err),
    }
}
