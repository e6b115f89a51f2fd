//! Optional static bearer auth on the OpenAI surface.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::RelayError;

/// When `security.apiKey` is configured, every `/v1/*` request must carry
/// exactly `Authorization: Bearer <key>`. Health and stats stay open; they
/// feed the monitoring page.
pub async fn auth_middleware(
    State(api_key): State<Arc<Option<String>>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if !path.starts_with("/v1/") {
        return next.run(request).await;
    }
    let Some(expected) = api_key.as_deref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    match presented {
        Some(value) if value == format!("Bearer {expected}") => next.run(request).await,
        _ => {
            tracing::warn!("Rejected {path}: missing or invalid API key");
            RelayError::Authentication("missing or invalid API key".into()).into_response()
        },
    }
}
