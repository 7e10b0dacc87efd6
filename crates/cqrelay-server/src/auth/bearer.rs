//! Bearer token checks shared by the upgrade handler and the upstream dial.

use cqrelay_core::{RelayError, RelayResult};
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderMap;

/// Require `Authorization: Bearer <expected>` when a token is configured.
pub fn check_bearer(headers: &HeaderMap, expected: Option<&str>) -> RelayResult<()> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| RelayError::Auth("missing authorization header".into()))?;

    match presented.strip_prefix("Bearer ") {
        Some(token) if token == expected => Ok(()),
        _ => Err(RelayError::Auth("invalid access token".into())),
    }
}

/// `Bearer <token>` header value.
pub fn bearer_value(token: &str) -> String {
    format!("Bearer {token}")
}
