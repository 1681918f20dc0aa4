use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// The closed error taxonomy from the proxy's error handling design: every
/// external call and every validation step resolves to one of these kinds,
/// which in turn maps deterministically to an HTTP status and a wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownErrorKind {
    InvalidRequest,
    PaymentInvalid,
    PaymentNotFound,
    JobAlreadyCompleted,
    JobExpired,
    BlobTooLarge,
    BlobEmpty,
    SignatureInvalid,
    JobLocked,
    BlobExecutionFailed,
    ContractError,
    RateLimitExceeded,
    CircuitOpen,
    NetworkError,
    InternalError,
}

impl KnownErrorKind {
    pub fn status(self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::PaymentInvalid => 400,
            Self::PaymentNotFound => 400,
            Self::JobAlreadyCompleted => 404,
            Self::JobExpired => 400,
            Self::BlobTooLarge => 400,
            Self::BlobEmpty => 400,
            Self::SignatureInvalid => 400,
            Self::JobLocked => 425,
            Self::BlobExecutionFailed => 503,
            Self::ContractError => 502,
            Self::RateLimitExceeded => 429,
            Self::CircuitOpen => 503,
            Self::NetworkError => 500,
            Self::InternalError => 500,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::PaymentInvalid => "PAYMENT_INVALID",
            Self::PaymentNotFound => "PAYMENT_NOT_FOUND",
            Self::JobAlreadyCompleted => "JOB_ALREADY_COMPLETED",
            Self::JobExpired => "JOB_EXPIRED",
            Self::BlobTooLarge => "BLOB_TOO_LARGE",
            Self::BlobEmpty => "BLOB_EMPTY",
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::JobLocked => "JOB_LOCKED",
            Self::BlobExecutionFailed => "BLOB_EXECUTION_FAILED",
            Self::ContractError => "CONTRACT_ERROR",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::NetworkError => "NETWORK_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Transient failures that are recovered locally (in-process retry for
    /// reads, queue-based retry for writes); everything else is a
    /// business-rule failure surfaced immediately.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::NetworkError | Self::ContractError | Self::CircuitOpen)
    }
}

impl fmt::Display for KnownErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The error type threaded through the write handler. Unknown/unexpected
/// failures are mapped to `InternalError` with the original message
/// redacted from the wire response but kept in `detail` for logs.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProxyError {
    pub kind: KnownErrorKind,
    pub message: String,
    pub details: Option<Value>,
}

impl ProxyError {
    pub fn new(kind: KnownErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        tracing::error!(error = %err, "internal error");
        Self::new(KnownErrorKind::InternalError, "internal error")
    }
}

impl From<anyhow::Error> for ProxyError {
    fn from(err: anyhow::Error) -> Self {
        ProxyError::internal(err)
    }
}

/// The wire shape for any non-2xx response: `{ error, message, details }`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse<'a> {
    pub error: &'a str,
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: &'a Option<Value>,
}

impl ProxyError {
    pub fn to_response(&self) -> ErrorResponse<'_> {
        ErrorResponse {
            error: self.kind.code(),
            message: &self.message,
            details: &self.details,
        }
    }
}

/// The single place that turns a `ProxyError` into the wire `{error,
/// message, details}` body; no handler hand-rolls an error response.
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.kind.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(self.to_response_owned());
        (status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponseOwned {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ProxyError {
    pub fn to_response_owned(&self) -> ErrorResponseOwned {
        ErrorResponseOwned {
            error: self.kind.code(),
            message: self.message.clone(),
            details: self.details.clone(),
        }
    }
}
