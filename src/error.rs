// =============================================================================
// Domain error type — typed kinds mapped to HTTP status codes at the boundary
// =============================================================================
//
// The risk, execution, coordination, and feedback cores return these instead
// of driving control flow through panics or ad-hoc strings. The HTTP layer
// converts each kind to the corresponding status code and a structured
// `{error, kind, detail}` body.
// =============================================================================

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Typed application error. One variant per error kind in the API contract.
#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// Input shape or invariant violation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or invalid credentials.
    #[error("auth error: {0}")]
    Auth(String),

    /// Risk rejection, mode gate, or LIVE confirmation policy.
    #[error("policy error: {0}")]
    Policy(String),

    /// Entity missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Phase transition not allowed, duplicate client order id, etc.
    #[error("conflict: {0}")]
    Conflict(String),

    /// LIVE mode confirmation missing.
    #[error("precondition required: {0}")]
    PreconditionRequired(String),

    /// Database, cache, or adapter unreachable.
    #[error("dependency error: {0}")]
    Dependency(String),

    /// Deadline exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Machine-readable kind string for the response body.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Auth(_) => "AuthError",
            Self::Policy(_) => "PolicyError",
            Self::NotFound(_) => "NotFoundError",
            Self::Conflict(_) => "ConflictError",
            Self::PreconditionRequired(_) => "PreconditionRequiredError",
            Self::Dependency(_) => "DependencyError",
            Self::Timeout(_) => "TimeoutError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// HTTP status code for this kind.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Policy(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PreconditionRequired(_) => StatusCode::PRECONDITION_REQUIRED,
            Self::Dependency(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The human-readable detail string.
    pub fn detail(&self) -> &str {
        match self {
            Self::Validation(s)
            | Self::Auth(s)
            | Self::Policy(s)
            | Self::NotFound(s)
            | Self::Conflict(s)
            | Self::PreconditionRequired(s)
            | Self::Dependency(s)
            | Self::Timeout(s)
            | Self::Internal(s) => s,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "detail": self.detail(),
        });
        (self.status(), Json(body)).into_response()
    }
}

/// Convenience alias for fallible domain operations.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_contract_status_codes() {
        assert_eq!(AppError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Auth("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Policy("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::PreconditionRequired("x".into()).status(),
            StatusCode::PRECONDITION_REQUIRED
        );
        assert_eq!(
            AppError::Dependency("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(AppError::Validation("x".into()).kind(), "ValidationError");
        assert_eq!(AppError::Policy("x".into()).kind(), "PolicyError");
        assert_eq!(AppError::Timeout("x".into()).kind(), "TimeoutError");
    }
}
