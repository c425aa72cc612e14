//! Error to HTTP response mapping
//!
//! The single place where a failed conversion becomes a client-visible response.
//! Business errors with a code in `100..=599` keep their status and message; anything
//! else is logged in full and rendered as a generic 500. Every synthesized response
//! carries the `x-proxy-error: 1` marker.

use async_proxy_common::{TunnelError, constants::PROXY_ERROR_HEADER};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{Response, StatusCode};
use http_body_util::Full;
use tracing::{error, warn};

/// Generic body for errors whose details stay in the logs
pub const INTERNAL_ERROR_BODY: &str = "Internal server error";

/// Sanitize error messages for client responses
///
/// Logs the full error internally but returns a generic message to the client.
pub fn sanitize_error(e: &TunnelError) -> String {
    error!("Internal error (code {}): {}", e.code(), e);
    INTERNAL_ERROR_BODY.to_string()
}

/// Status and body a client sees for this error
pub fn status_and_message(e: &TunnelError) -> (StatusCode, String) {
    if let TunnelError::Business { code, message } = e {
        if let Some(status) = u16::try_from(*code)
            .ok()
            .filter(|c| (100..=599).contains(c))
            .and_then(|c| StatusCode::from_u16(c).ok())
        {
            warn!("Request failed with {}: {}", status, message);
            return (status, message.clone());
        }
    }
    (StatusCode::INTERNAL_SERVER_ERROR, sanitize_error(e))
}

/// Build the proxy-originated error response for this error
pub fn error_to_response(e: &TunnelError) -> Response<Full<Bytes>> {
    let (status, message) = status_and_message(e);

    let mut response = Response::new(Full::new(Bytes::from(message)));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        HeaderName::from_static(PROXY_ERROR_HEADER),
        HeaderValue::from_static("1"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_of(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_business_error_keeps_status_and_message() {
        let response = error_to_response(&TunnelError::business(404, "No such page"));

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get("x-proxy-error").unwrap(), "1");
        assert_eq!(body_of(response).await, "No such page");
    }

    #[tokio::test]
    async fn test_out_of_range_business_code_is_sanitized() {
        let response = error_to_response(&TunnelError::business(1000, "secret detail"));

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers().get("x-proxy-error").unwrap(), "1");
        assert_eq!(body_of(response).await, INTERNAL_ERROR_BODY);

        let (status, _) = status_and_message(&TunnelError::business(99, "too low"));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let (status, _) = status_and_message(&TunnelError::business(-1, "negative"));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_non_business_errors_are_sanitized() {
        let response = error_to_response(&TunnelError::NoEdge);

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_of(response).await;
        assert_eq!(body, INTERNAL_ERROR_BODY);
        assert!(!body.contains("edge"));
    }

    #[test]
    fn test_boundary_codes() {
        let (status, message) = status_and_message(&TunnelError::business(599, "edge"));
        assert_eq!(status.as_u16(), 599);
        assert_eq!(message, "edge");

        let (status, _) = status_and_message(&TunnelError::business(100, "continue"));
        assert_eq!(status, StatusCode::CONTINUE);
    }
}
