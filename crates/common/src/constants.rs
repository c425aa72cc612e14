/// Default time a dispatched request waits for its edge before the timeout envelope fires
pub const DISPATCH_TIMEOUT_SECS: u64 = 30;

/// Hard deadline for one ingress connection, regardless of processing state
pub const INGRESS_DEADLINE_SECS: u64 = 60;

/// Heartbeat interval for edge tunnel pings
pub const HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// Upper bound for one outbound call made by an edge
pub const EDGE_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Maximum buffered request body accepted at ingress (16 MiB)
pub const MAX_BODY_SIZE_BYTES: usize = 16 * 1024 * 1024;

/// Maximum tunnel frame and message size (64 MiB, base64 plus envelope overhead)
pub const MAX_TUNNEL_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

/// Minimum delay for exponential backoff reconnection (1 second)
pub const RECONNECT_MIN_DELAY_MS: u64 = 1000;

/// Maximum delay for exponential backoff reconnection (60 seconds)
pub const RECONNECT_MAX_DELAY_MS: u64 = 60000;

/// Multiplier for exponential backoff reconnection
pub const RECONNECT_MULTIPLIER: f64 = 2.0;

/// Path of the tunnel upgrade endpoint
pub const TUNNEL_PATH: &str = "/connect";

/// Marker header carried by every response synthesized by the proxy itself
pub const PROXY_ERROR_HEADER: &str = "x-proxy-error";

/// First byte of a TLS record carrying a handshake message (ClientHello)
pub const TLS_HANDSHAKE_RECORD: u8 = 22;

/// Error message of the synthetic envelope produced when a dispatch times out
pub const TIMEOUT_ERROR_MESSAGE: &str = "Request Timeout";

/// Status code of the synthetic timeout envelope
pub const TIMEOUT_STATUS_CODE: i32 = -1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_values() {
        const _: () = assert!(DISPATCH_TIMEOUT_SECS < INGRESS_DEADLINE_SECS);
        const _: () = assert!(HEARTBEAT_INTERVAL_SECS < DISPATCH_TIMEOUT_SECS);
        const _: () = assert!(RECONNECT_MIN_DELAY_MS < RECONNECT_MAX_DELAY_MS);
        const _: () = assert!(RECONNECT_MULTIPLIER > 1.0);
        const _: () = assert!(MAX_BODY_SIZE_BYTES * 2 < MAX_TUNNEL_MESSAGE_BYTES);

        assert_eq!(MAX_BODY_SIZE_BYTES, 16 * 1024 * 1024);
        assert!(TUNNEL_PATH.starts_with('/'));
    }
}
