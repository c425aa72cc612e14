use base64::{Engine as _, engine::general_purpose::STANDARD};

/// Encode bytes to Base64 string
pub fn encode_body(body: &[u8]) -> String {
    STANDARD.encode(body)
}

/// Decode Base64 string to bytes
pub fn decode_body(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(encoded)
}

/// Serde adapter carrying raw body bytes as a Base64 string
///
/// Use with `#[serde(with = "crate::utils::base64_body")]`.
pub mod base64_body {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_body(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        super::decode_body(&encoded).map_err(D::Error::custom)
    }
}
