//! API error types.
//!
//! Every failure is rendered to the single caller as a plain-text body
//! with a stable machine code in the `x-larder-error` header. None of
//! them are fatal to the process.

use crate::cache::CacheError;
use crate::origin::OriginError;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

/// Header carrying [`ApiError::code`].
pub const ERROR_CODE_HEADER: &str = "x-larder-error";

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("path is busy: {0}")]
    Busy(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("origin unavailable: {0}")]
    OriginUnavailable(String),

    #[error("origin rejected request: {0}")]
    OriginRejected(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] larder_storage::StorageError),

    #[error("signature error: {0}")]
    Signature(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Busy(_) => "busy",
            Self::Unauthorized(_) => "unauthorized",
            Self::MethodNotAllowed(_) => "method_not_allowed",
            Self::OriginUnavailable(_) => "origin_unavailable",
            Self::OriginRejected(_) => "origin_rejected",
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "storage_error",
            Self::Signature(_) => "signature_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Busy(_) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::FORBIDDEN,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::OriginUnavailable(_) | Self::OriginRejected(_) => StatusCode::BAD_GATEWAY,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Storage(e) => match e {
                larder_storage::StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Signature(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<OriginError> for ApiError {
    fn from(e: OriginError) -> Self {
        match e {
            OriginError::Unavailable(_) => Self::OriginUnavailable(e.to_string()),
            OriginError::Rejected(_) => Self::OriginRejected(e.to_string()),
            OriginError::Signing(_) => Self::Signature(e.to_string()),
            OriginError::InvalidUrl(_) | OriginError::Client(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Busy(path) => Self::Busy(path),
            CacheError::Storage(e) => Self::Storage(e),
        }
    }
}

impl From<larder_signer::SignerError> for ApiError {
    fn from(e: larder_signer::SignerError) -> Self {
        Self::Signature(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(code = self.code(), error = %self, "Request failed");
        }
        (
            status,
            [
                (
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                ),
                (
                    header::HeaderName::from_static(ERROR_CODE_HEADER),
                    HeaderValue::from_static(self.code()),
                ),
            ],
            format!("{self}\n"),
        )
            .into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_and_unauthorized_are_distinguishable() {
        let busy = ApiError::Busy("/a".to_string()).into_response();
        let denied = ApiError::Unauthorized("10.0.0.1".to_string()).into_response();

        assert_eq!(busy.status(), StatusCode::CONFLICT);
        assert_eq!(busy.headers()[ERROR_CODE_HEADER], "busy");
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
        assert_eq!(denied.headers()[ERROR_CODE_HEADER], "unauthorized");
    }

    #[test]
    fn storage_not_found_maps_to_404() {
        let err = ApiError::from(CacheError::Storage(
            larder_storage::StorageError::NotFound("2f61".to_string()),
        ));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "storage_error");
    }

    #[test]
    fn origin_rejection_is_a_gateway_error() {
        let err = ApiError::from(OriginError::Rejected(StatusCode::FORBIDDEN));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.code(), "origin_rejected");
    }
}
