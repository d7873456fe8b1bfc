use crate::{errors::ServiceError, AppState};
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use validator::Validate;

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input
        .validate()
        .map_err(|e| ServiceError::ValidationError(format!("Validation failed: {}", e)))
}

/// Bearer token from the `Authorization` header, if present
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Compares two secrets without short-circuiting on the first differing byte.
fn tokens_match(expected: &str, presented: &str) -> bool {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    mac.update(b"admin-token");
    let expected_tag = mac.finalize().into_bytes();

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(presented.as_bytes()) else {
        return false;
    };
    mac.update(b"admin-token");
    mac.verify_slice(&expected_tag).is_ok()
}

/// Route layer for operator endpoints.
///
/// Requires `Authorization: Bearer <admin_api_token>`. With no token
/// configured the endpoints are closed.
pub async fn require_admin_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let configured = state
        .config
        .admin_api_token
        .as_deref()
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ServiceError::Unauthorized("operator access is not configured".into()))?;

    let presented = bearer_token(request.headers())
        .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".into()))?;

    if !tokens_match(configured, presented) {
        return Err(ServiceError::Unauthorized("invalid bearer token".into()));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_bearer_tokens() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert_eq!(bearer_token(&headers), Some("s3cret"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn token_comparison() {
        assert!(tokens_match("s3cret", "s3cret"));
        assert!(!tokens_match("s3cret", "s3cre"));
        assert!(!tokens_match("s3cret", "other!"));
    }
}
