//! Unified error type for the relay, mapped to HTTP at the ingress boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Terminal failure of a relay operation.
///
/// The retry loop matches on these variants to decide whether another
/// credential is worth trying; the ingress maps them to an HTTP status and
/// the OpenAI-style `{"error": {...}}` body.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Malformed ingress request body.
    #[error("{0}")]
    Validation(String),

    /// Missing or invalid bearer key, or the upstream rejected the
    /// credential outright (401/403).
    #[error("{0}")]
    Authentication(String),

    /// Every usable credential is cooling down, or the retry budget was
    /// spent on 429 responses.
    #[error("{message}")]
    RateLimited {
        message: String,
        /// Seconds the caller should wait, surfaced as `Retry-After`.
        retry_after_secs: Option<u64>,
    },

    /// No credential can take the request right now (empty pool, all at the
    /// per-credential concurrency cap, or all disabled).
    #[error("{0}")]
    NoCredentials(String),

    /// The admission queue is saturated.
    #[error("request queue is full ({waiting} waiting)")]
    QueueFull { waiting: usize },

    /// The admission-level timeout elapsed before a response was produced.
    #[error("request timed out in the admission queue")]
    Timeout,

    /// Upstream returned a non-retryable, non-auth HTTP error.
    #[error("upstream error {status}: {body}")]
    Api { status: u16, body: String },

    /// Transport-level failure talking to the upstream or token endpoint.
    #[error("network error: {0}")]
    Network(String),

    /// The upstream stream broke after the response had started.
    #[error("stream error: {0}")]
    Stream(String),
}

pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    /// HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::Authentication(_) => StatusCode::UNAUTHORIZED,
            RelayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RelayError::NoCredentials(_) | RelayError::QueueFull { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            },
            RelayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            RelayError::Api { .. } | RelayError::Network(_) | RelayError::Stream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }

    /// Stable `type` string used in the error body.
    pub fn error_type(&self) -> &'static str {
        match self {
            RelayError::Validation(_) => "validation",
            RelayError::Authentication(_) => "authentication_error",
            RelayError::RateLimited { .. } => "rate_limit_error",
            RelayError::NoCredentials(_) => "service_unavailable",
            RelayError::QueueFull { .. } => "queue_full",
            RelayError::Timeout => "timeout",
            RelayError::Api { .. } => "api_error",
            RelayError::Network(_) => "network_error",
            RelayError::Stream(_) => "stream_error",
        }
    }

    /// `Retry-After` value in seconds, when one applies.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            RelayError::RateLimited { retry_after_secs, .. } => *retry_after_secs,
            _ => None,
        }
    }

    /// OpenAI-style error body.
    pub fn to_body(&self) -> serde_json::Value {
        json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
                "code": self.status_code().as_u16(),
            }
        })
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = axum::Json(self.to_body());
        match self.retry_after_secs() {
            Some(secs) => (status, [("Retry-After", secs.to_string())], body).into_response(),
            None => (status, body).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RelayError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::QueueFull { waiting: 3 }.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(RelayError::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            RelayError::Stream("eof".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_body_shape() {
        let err = RelayError::RateLimited {
            message: "all credentials cooling".into(),
            retry_after_secs: Some(10),
        };
        let body = err.to_body();
        assert_eq!(body["error"]["type"], "rate_limit_error");
        assert_eq!(body["error"]["code"], 429);
        assert_eq!(err.retry_after_secs(), Some(10));
    }
}
