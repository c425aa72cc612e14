//! Validation of identifiers read back from connection metadata and tunnel frames

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::TunnelError;

/// Regex for validating identifiers (hyphenated lowercase UUID)
static UUID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap()
});

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid edge ID format: {0}")]
    InvalidEdgeId(String),

    #[error("Invalid request ID format: {0}")]
    InvalidRequestId(String),
}

impl From<ValidationError> for TunnelError {
    fn from(e: ValidationError) -> Self {
        match e {
            ValidationError::InvalidEdgeId(id) => TunnelError::InvalidEdgeId(id),
            ValidationError::InvalidRequestId(id) => {
                TunnelError::Internal(format!("invalid request id: {}", id))
            }
        }
    }
}

/// Validate edge ID format
///
/// # Examples
///
/// ```
/// use async_proxy_common::validation::validate_edge_id;
///
/// assert!(validate_edge_id("01890a5d-ac96-774b-bcce-b302099a8057").is_ok());
/// assert!(validate_edge_id("").is_err());
/// ```
pub fn validate_edge_id(id: &str) -> Result<(), ValidationError> {
    if !UUID_REGEX.is_match(id) {
        return Err(ValidationError::InvalidEdgeId(
            id.chars().take(50).collect::<String>(), // Limit error message
        ));
    }
    Ok(())
}

/// Validate request ID format
pub fn validate_request_id(id: &str) -> Result<(), ValidationError> {
    if !UUID_REGEX.is_match(id) {
        return Err(ValidationError::InvalidRequestId(
            id.chars().take(50).collect::<String>(),
        ));
    }
    Ok(())
}
