use serde::{Deserialize, Serialize};

use super::HeaderMultimap;
use crate::constants::{TIMEOUT_ERROR_MESSAGE, TIMEOUT_STATUS_CODE};

/// The result of one proxied request, sent back from the edge through the tunnel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    /// Whether the edge obtained a complete response from the origin
    pub success: bool,

    /// Failure description when `success` is false
    #[serde(default)]
    pub error_message: String,

    /// HTTP status code, -1 for the synthetic timeout envelope
    pub status_code: i32,

    /// Response headers as a map of header name to list of values
    #[serde(default)]
    pub headers: HeaderMultimap,

    /// Raw response body, base64 on the wire
    #[serde(default, with = "crate::utils::base64_body")]
    pub body: Vec<u8>,

    /// Must match the request_id from the corresponding RequestEnvelope
    pub request_id: String,

    /// Responding edge
    #[serde(default)]
    pub edge_id: String,
}

impl ResponseEnvelope {
    /// Create a successful response envelope
    pub fn ok(request_id: impl Into<String>, status_code: i32) -> Self {
        Self {
            success: true,
            error_message: String::new(),
            status_code,
            headers: HeaderMultimap::new(),
            body: Vec::new(),
            request_id: request_id.into(),
            edge_id: String::new(),
        }
    }

    /// Create a failed response envelope carrying an error message
    pub fn failure(
        request_id: impl Into<String>,
        edge_id: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            error_message: error_message.into(),
            status_code: 0,
            headers: HeaderMultimap::new(),
            body: Vec::new(),
            request_id: request_id.into(),
            edge_id: edge_id.into(),
        }
    }

    /// The synthetic envelope delivered when no response arrives in time
    pub fn timeout(request_id: impl Into<String>, edge_id: impl Into<String>) -> Self {
        Self {
            status_code: TIMEOUT_STATUS_CODE,
            ..Self::failure(request_id, edge_id, TIMEOUT_ERROR_MESSAGE)
        }
    }

    /// Check if this is the synthetic timeout envelope
    pub fn is_timeout(&self) -> bool {
        !self.success && self.status_code == TIMEOUT_STATUS_CODE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_envelope() {
        let resp = ResponseEnvelope::timeout("req-1", "edge-1");
        assert!(!resp.success);
        assert_eq!(resp.status_code, -1);
        assert_eq!(resp.error_message, "Request Timeout");
        assert_eq!(resp.request_id, "req-1");
        assert_eq!(resp.edge_id, "edge-1");
        assert!(resp.is_timeout());
    }

    #[test]
    fn test_failure_is_not_timeout() {
        let resp = ResponseEnvelope::failure("req-1", "edge-1", "connection refused");
        assert!(!resp.success);
        assert!(!resp.is_timeout());
    }

    #[test]
    fn test_response_envelope_field_names() {
        let mut resp = ResponseEnvelope::ok("req-2", 404);
        resp.body = b"not found".to_vec();

        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""success":true"#));
        assert!(json.contains(r#""statusCode":404"#));
        assert!(json.contains(r#""errorMessage":"""#));
        assert!(json.contains(r#""requestId":"req-2""#));
    }

    #[test]
    fn test_response_envelope_roundtrip_empty() {
        let resp = ResponseEnvelope::ok("req-3", 204);

        let json = serde_json::to_string(&resp).unwrap();
        let parsed: ResponseEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, resp);
        assert!(parsed.body.is_empty());
        assert!(parsed.headers.is_empty());
    }

    #[test]
    fn test_response_envelope_minimal_json() {
        let json = r#"{"success":false,"statusCode":0,"requestId":"req-4"}"#;
        let parsed: ResponseEnvelope = serde_json::from_str(json).unwrap();
        assert!(!parsed.success);
        assert_eq!(parsed.error_message, "");
        assert_eq!(parsed.edge_id, "");
    }
}
