//! TLS interception and HTTP serving
//!
//! Terminates client TLS with the fake identity, picks HTTP/2 or HTTP/1.1 from the
//! negotiated ALPN protocol, and serves the decrypted stream with hyper.

use hyper::body::Incoming;
use hyper::server::conn::{http1, http2};
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use super::IngressError;
use crate::SharedState;
use crate::handlers::forwarding::{Origin, handle_forwarding};

/// Where an intercepted session was headed, as far as the ingress knows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptTarget {
    /// HTTP-proxy `CONNECT host:port`
    Connect { host: String },
    /// SOCKS5 CONNECT destination
    Socks { host: String, port: u16 },
}

impl InterceptTarget {
    /// Origin for URL reconstruction given the negotiated server name
    ///
    /// Only SOCKS5 sessions name their origin by SNI; a CONNECT target already came
    /// with a host.
    pub fn origin(&self, server_name: Option<&str>) -> Origin {
        match self {
            Self::Connect { host } => Origin {
                tls: true,
                server_name: None,
                fallback_host: Some(host.clone()),
                port_override: None,
            },
            Self::Socks { host, port } => Origin {
                tls: true,
                server_name: server_name.map(str::to_string),
                fallback_host: Some(host.clone()),
                port_override: Some(*port),
            },
        }
    }
}

/// Terminate TLS on `stream` and serve the requests inside it
pub async fn serve_tls<S>(
    stream: S,
    state: Arc<SharedState>,
    target: InterceptTarget,
) -> Result<(), IngressError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let acceptor = TlsAcceptor::from(state.ca.server_config()?);
    let tls_stream = acceptor.accept(stream).await.map_err(IngressError::Tls)?;

    let (origin, negotiated_h2) = {
        let (_, conn) = tls_stream.get_ref();
        let negotiated_h2 = conn.alpn_protocol() == Some(&b"h2"[..]);
        (target.origin(conn.server_name()), negotiated_h2)
    };

    debug!(
        "TLS intercepted for {:?}, serving {}",
        origin.server_name.as_ref().or(origin.fallback_host.as_ref()),
        if negotiated_h2 { "h2" } else { "http/1.1" }
    );

    if negotiated_h2 {
        serve_http2(tls_stream, state, origin).await
    } else {
        serve_http1(tls_stream, state, origin).await
    }
}

/// Serve exactly one HTTP/1.1 request from `stream`
pub async fn serve_http1<S>(
    stream: S,
    state: Arc<SharedState>,
    origin: Origin,
) -> Result<(), IngressError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<Incoming>| {
        handle_forwarding(Arc::clone(&state), req, origin.clone())
    });

    http1::Builder::new()
        .keep_alive(false)
        .serve_connection(TokioIo::new(stream), service)
        .await?;
    Ok(())
}

/// Serve HTTP/2 streams until the client closes the connection
pub async fn serve_http2<S>(
    stream: S,
    state: Arc<SharedState>,
    origin: Origin,
) -> Result<(), IngressError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<Incoming>| {
        handle_forwarding(Arc::clone(&state), req, origin.clone())
    });

    http2::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(stream), service)
        .await?;
    Ok(())
}
