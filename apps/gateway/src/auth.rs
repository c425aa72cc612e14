//! Shared-secret authentication for edge tunnel connections
//!
//! Edges present the secret as a bearer token in the `Authorization` header of the
//! upgrade request. The comparison runs in constant time.

use http::HeaderMap;
use http::header::AUTHORIZATION;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

/// Extract the token from the Authorization header
/// Accepts both `Bearer <token>` and a bare token value
pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    Some(value.strip_prefix("Bearer ").unwrap_or(value).trim())
}

/// Check the caller-supplied token against the configured shared secret
pub fn is_authorized(headers: &HeaderMap, secret: &str) -> bool {
    let Some(token) = extract_token(headers) else {
        warn!("Tunnel upgrade without Authorization header");
        return false;
    };

    let matches: bool = token.as_bytes().ct_eq(secret.as_bytes()).into();
    if matches {
        debug!("Tunnel token accepted");
    } else {
        warn!("Tunnel token rejected");
    }
    matches
}
