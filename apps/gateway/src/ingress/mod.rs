//! Client-facing proxy listeners
//!
//! Both front doors end up in the same place: a (possibly TLS-terminated) stream served
//! by hyper, each request converted by [`crate::handlers::forwarding`].

pub mod http_proxy;
pub mod intercept;
pub mod prebuffered;
pub mod socks5;

use async_proxy_common::TunnelError;
use std::io;
use thiserror::Error;

use crate::CertError;

/// Failures local to one ingress connection
///
/// None of these reach the registry or other connections; they are logged and the
/// connection is dropped.
#[derive(Error, Debug)]
pub enum IngressError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS handshake failed: {0}")]
    Tls(io::Error),

    #[error("HTTP serving failed: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("SOCKS5 negotiation failed: {0}")]
    Socks5(String),

    #[error(transparent)]
    Certificate(#[from] CertError),

    #[error(transparent)]
    Dispatch(#[from] TunnelError),
}
