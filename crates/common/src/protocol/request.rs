use serde::{Deserialize, Serialize};

use super::HeaderMultimap;

/// A proxied HTTP request shipped from the gateway to one edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    /// Absolute target URL
    /// Example: "https://example.com/api/v1/users?limit=10"
    pub full_url: String,

    /// HTTP method (GET, POST, PUT, DELETE, etc.)
    pub method: String,

    /// HTTP headers as a map of header name to list of values
    #[serde(default)]
    pub headers: HeaderMultimap,

    /// Raw request body, base64 on the wire
    #[serde(default, with = "crate::utils::base64_body")]
    pub body: Vec<u8>,

    /// Unique identifier to correlate request and response
    pub request_id: String,

    /// Seconds the gateway waits before giving up on this request
    pub timeout: f64,

    /// Edge this request was assigned to
    #[serde(default)]
    pub edge_id: String,
}

impl RequestEnvelope {
    /// Create a new request envelope without headers or body
    pub fn new(
        method: impl Into<String>,
        full_url: impl Into<String>,
        request_id: impl Into<String>,
        timeout: f64,
    ) -> Self {
        Self {
            full_url: full_url.into(),
            method: method.into(),
            headers: HeaderMultimap::new(),
            body: Vec::new(),
            request_id: request_id.into(),
            timeout,
            edge_id: String::new(),
        }
    }

    /// Check if the request has a body
    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_envelope_creation() {
        let req = RequestEnvelope::new("GET", "http://example.com/", "req-1", 5.0);

        assert_eq!(req.method, "GET");
        assert_eq!(req.full_url, "http://example.com/");
        assert_eq!(req.request_id, "req-1");
        assert_eq!(req.timeout, 5.0);
        assert!(req.headers.is_empty());
        assert!(!req.has_body());
    }

    #[test]
    fn test_request_envelope_field_names() {
        let mut req = RequestEnvelope::new("POST", "http://example.com/data", "req-2", 30.0);
        req.body = b"{\"test\":\"value\"}".to_vec();
        req.edge_id = "edge-1".to_string();

        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""fullUrl":"http://example.com/data""#));
        assert!(json.contains(r#""requestId":"req-2""#));
        assert!(json.contains(r#""edgeId":"edge-1""#));
        assert!(json.contains(r#""body":"eyJ0ZXN0IjoidmFsdWUifQ==""#));
        assert!(json.contains(r#""timeout":30.0"#));
    }

    #[test]
    fn test_request_envelope_roundtrip_with_multiple_header_values() {
        let mut req = RequestEnvelope::new("GET", "https://example.com/", "req-3", 1.5);
        req.headers.insert(
            "cookie".to_string(),
            vec!["session=abc".to_string(), "token=xyz".to_string()],
        );
        req.body = vec![0x00, 0xFF, 0x10];

        let json = serde_json::to_string(&req).unwrap();
        let parsed: RequestEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, req);
        assert_eq!(parsed.headers.get("cookie").unwrap().len(), 2);
    }

    #[test]
    fn test_request_envelope_defaults() {
        let json = r#"{
            "fullUrl": "http://example.com/",
            "method": "GET",
            "requestId": "req-4",
            "timeout": 30
        }"#;

        let parsed: RequestEnvelope = serde_json::from_str(json).unwrap();
        assert!(parsed.body.is_empty());
        assert!(parsed.headers.is_empty());
        assert_eq!(parsed.edge_id, "");
    }
}
