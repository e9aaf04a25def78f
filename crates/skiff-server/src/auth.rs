use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use skiff_core::Error;

use crate::routes::{error_response, AppState};

/// Reject requests that do not carry `Authorization: Bearer <api-key>` when
/// the server was started with an API key.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = &state.api_key {
        let presented = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        if presented != Some(expected.as_str()) {
            return error_response(Error::Unauthorized);
        }
    }

    next.run(request).await
}
