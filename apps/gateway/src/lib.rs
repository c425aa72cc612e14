//! Gateway: proxy front doors and the edge tunnel endpoint
//!
//! Client requests arrive on the HTTP-proxy or SOCKS5 listener, are normalized by the
//! conversion layer in [`handlers::forwarding`] and dispatched through the
//! [`registry::EdgeRegistry`] to one of the edges connected on the tunnel listener.

use std::sync::Arc;

pub mod auth;
pub mod certificate;
pub mod config;
pub mod error_handling;
pub mod handlers;
pub mod ingress;
pub mod registry;

pub use certificate::{CertError, CertificateAuthority};
pub use config::GatewayConfig;
pub use registry::{EdgeConnection, EdgeRegistry};

/// State shared by every listener, built once at startup
pub struct SharedState {
    pub registry: Arc<EdgeRegistry>,
    pub ca: Arc<CertificateAuthority>,
    pub config: GatewayConfig,
}

impl SharedState {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            registry: Arc::new(EdgeRegistry::new()),
            ca: Arc::new(CertificateAuthority::new()),
            config,
        }
    }
}
