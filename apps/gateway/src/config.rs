use async_proxy_common::constants::{DISPATCH_TIMEOUT_SECS, INGRESS_DEADLINE_SECS};
use std::time::Duration;

/// Runtime configuration of the gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// HTTP-proxy listener address (e.g., "127.0.0.1:8080")
    pub http_listen: String,

    /// SOCKS5 listener address
    pub socks5_listen: String,

    /// Edge tunnel listener address
    pub tunnel_listen: String,

    /// Shared secret edges present as a bearer token
    pub tunnel_token: String,

    /// How long a dispatched request waits for its edge
    pub dispatch_timeout: Duration,

    /// Hard deadline for one ingress connection
    pub ingress_deadline: Duration,
}

impl GatewayConfig {
    /// Configuration with default timeouts and loopback listeners
    pub fn new(tunnel_token: impl Into<String>) -> Self {
        Self {
            http_listen: "127.0.0.1:8080".to_string(),
            socks5_listen: "127.0.0.1:1080".to_string(),
            tunnel_listen: "0.0.0.0:9000".to_string(),
            tunnel_token: tunnel_token.into(),
            dispatch_timeout: Duration::from_secs(DISPATCH_TIMEOUT_SECS),
            ingress_deadline: Duration::from_secs(INGRESS_DEADLINE_SECS),
        }
    }
}
