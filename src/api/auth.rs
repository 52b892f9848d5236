// =============================================================================
// Bearer Token Authentication — Axum extractor
// =============================================================================
//
// Validates `Authorization: Bearer <token>` against the MERIDIAN_API_TOKEN
// environment variable. Comparison is constant time. Full user identity and
// token issuance live in an external auth service; this engine only checks
// the operator credential.
// =============================================================================

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

/// Compare two byte slices in constant time. Every byte of both slices is
/// examined even when a mismatch is found early.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Axum extractor that yields the validated raw token string.
///
/// If the token is missing or invalid the request is rejected with 401
/// before the handler body executes.
pub struct AuthBearer(pub String);

/// Rejection returned when authentication fails.
pub struct AuthRejection {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
            "kind": "AuthError",
        });
        (self.status, axum::Json(body)).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthBearer
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Read on every request so token rotation needs no restart.
        let expected = std::env::var("MERIDIAN_API_TOKEN").unwrap_or_default();

        if expected.is_empty() {
            warn!("MERIDIAN_API_TOKEN is not set - all authenticated requests will be rejected");
            return Err(AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                message: "Server authentication not configured",
            });
        }

        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        let token = match auth_header {
            Some(value) if value.starts_with("Bearer ") => &value[7..],
            _ => {
                warn!("missing or malformed Authorization header");
                return Err(AuthRejection {
                    status: StatusCode::UNAUTHORIZED,
                    message: "Missing or invalid authorization token",
                });
            }
        };

        if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
            warn!("invalid API token presented");
            return Err(AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                message: "Invalid authorization token",
            });
        }

        Ok(AuthBearer(token.to_string()))
    }
}

/// Validate a secondary credential (e.g. the LIVE-trading password) against
/// an environment variable in constant time.
pub fn verify_env_secret(env_var: &str, candidate: &str) -> bool {
    let expected = std::env::var(env_var).unwrap_or_default();
    if expected.is_empty() || candidate.is_empty() {
        return false;
    }
    constant_time_eq(candidate.as_bytes(), expected.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_identical() {
        assert!(constant_time_eq(b"hello", b"hello"));
    }

    #[test]
    fn constant_time_eq_different() {
        assert!(!constant_time_eq(b"hello", b"world"));
    }

    #[test]
    fn constant_time_eq_different_lengths() {
        assert!(!constant_time_eq(b"short", b"longer_string"));
    }

    #[test]
    fn constant_time_eq_empty() {
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn env_secret_rejects_when_unset_or_empty() {
        assert!(!verify_env_secret("MERIDIAN_TEST_SECRET_UNSET", "anything"));
        std::env::set_var("MERIDIAN_TEST_SECRET_SET", "s3cret");
        assert!(!verify_env_secret("MERIDIAN_TEST_SECRET_SET", ""));
        assert!(verify_env_secret("MERIDIAN_TEST_SECRET_SET", "s3cret"));
        std::env::remove_var("MERIDIAN_TEST_SECRET_SET");
    }
}
