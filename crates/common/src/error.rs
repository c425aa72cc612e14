use thiserror::Error;

/// Error taxonomy shared by the gateway and the edges
///
/// Every variant carries a stable numeric code. Business errors carry their own code,
/// which maps onto an HTTP status when it falls inside `100..=599`.
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("No edge connected")]
    NoEdge,

    #[error("Failed to send message to edge {edge_id}: {reason}")]
    EdgeSendFailed { edge_id: String, reason: String },

    #[error("Serialize or deserialize failed: {0}")]
    SerializeOrDeserializeFailed(#[from] serde_json::Error),

    #[error("No edge id defined for connection")]
    NoEdgeIdDefined,

    #[error("Invalid edge id: {0}")]
    InvalidEdgeId(String),

    #[error("Invalid response message type: {0}")]
    InvalidResponseMessageType(String),

    #[error("Pending callback dropped before completion")]
    CallbackDropped,

    #[error("{message}")]
    Business { code: i32, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TunnelError {
    /// Build a business error with a caller-chosen code
    pub fn business(code: i32, message: impl Into<String>) -> Self {
        Self::Business {
            code,
            message: message.into(),
        }
    }

    /// Stable numeric code of this error kind
    pub fn code(&self) -> i32 {
        match self {
            Self::NoEdge => 1000,
            Self::EdgeSendFailed { .. } => 1001,
            Self::SerializeOrDeserializeFailed(_) => 1002,
            Self::NoEdgeIdDefined => 1003,
            Self::InvalidEdgeId(_) => 1004,
            Self::InvalidResponseMessageType(_) => 1005,
            Self::CallbackDropped => 1006,
            Self::Business { code, .. } => *code,
            Self::Internal(_) => 500,
        }
    }
}

/// Type alias for Results using TunnelError
pub type Result<T> = std::result::Result<T, TunnelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TunnelError::NoEdge;
        assert_eq!(err.to_string(), "No edge connected");

        let err = TunnelError::business(400, "No host specified");
        assert_eq!(err.to_string(), "No host specified");

        let err = TunnelError::EdgeSendFailed {
            edge_id: "e1".to_string(),
            reason: "channel closed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to send message to edge e1: channel closed"
        );
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(TunnelError::NoEdge.code(), 1000);
        assert_eq!(
            TunnelError::EdgeSendFailed {
                edge_id: String::new(),
                reason: String::new()
            }
            .code(),
            1001
        );
        assert_eq!(TunnelError::NoEdgeIdDefined.code(), 1003);
        assert_eq!(TunnelError::InvalidEdgeId("x".into()).code(), 1004);
        assert_eq!(
            TunnelError::InvalidResponseMessageType("text".into()).code(),
            1005
        );
        assert_eq!(TunnelError::business(404, "missing").code(), 404);
    }

    #[test]
    fn test_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json");
        assert!(json_err.is_err());

        let tunnel_err: TunnelError = json_err.unwrap_err().into();
        assert!(matches!(
            tunnel_err,
            TunnelError::SerializeOrDeserializeFailed(_)
        ));
        assert_eq!(tunnel_err.code(), 1002);
    }
}
