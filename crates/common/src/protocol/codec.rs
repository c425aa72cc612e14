//! Envelope codec for tunnel binary frames

use serde::{Serialize, de::DeserializeOwned};

use crate::error::Result;

/// Serialize an envelope into a binary frame payload
pub fn encode<T: Serialize>(envelope: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Deserialize an envelope from a binary frame payload
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TunnelError;
    use crate::protocol::{RequestEnvelope, ResponseEnvelope};

    #[test]
    fn test_request_roundtrip() {
        let mut req = RequestEnvelope::new("PUT", "http://example.com/items/1", "req-1", 30.0);
        req.headers
            .insert("content-type".to_string(), vec!["text/plain".to_string()]);
        req.body = b"hello".to_vec();
        req.edge_id = "edge-1".to_string();

        let payload = encode(&req).unwrap();
        let decoded: RequestEnvelope = decode(&payload).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_response_roundtrip_with_empty_body_and_headers() {
        let resp = ResponseEnvelope::ok("req-2", 200);

        let payload = encode(&resp).unwrap();
        let decoded: ResponseEnvelope = decode(&payload).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn test_decode_garbage_fails_with_serialization_error() {
        let result = decode::<ResponseEnvelope>(b"\x00\x01not json");
        assert!(matches!(
            result,
            Err(TunnelError::SerializeOrDeserializeFailed(_))
        ));
    }

    #[test]
    fn test_decode_wrong_shape_fails() {
        let req = RequestEnvelope::new("GET", "http://example.com/", "req-3", 1.0);
        let payload = encode(&req).unwrap();
        assert!(decode::<ResponseEnvelope>(&payload).is_err());
    }
}
