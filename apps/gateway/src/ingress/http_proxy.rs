//! HTTP-proxy front door
//!
//! Absolute-form and origin-form requests are served as plain HTTP/1.1; `CONNECT` is
//! acknowledged and the tunnel inside it intercepted as TLS.

use std::{io, sync::Arc};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{Instrument, debug, info, info_span, warn};

use super::{
    IngressError,
    intercept::{InterceptTarget, serve_http1, serve_tls},
    prebuffered::Prebuffered,
};
use crate::{SharedState, handlers::forwarding::Origin};

/// Largest request head read while sniffing the method
const MAX_HEAD_BYTES: usize = 64 * 1024;

const MAX_HEADERS: usize = 64;

const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";

/// Request line of the first request on a connection, plus the length of its head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub len: usize,
}

impl RequestHead {
    /// Parse a complete request head, `None` when more bytes are needed
    pub fn parse(buf: &[u8]) -> Result<Option<Self>, IngressError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        let status = req
            .parse(buf)
            .map_err(|e| IngressError::MalformedRequest(e.to_string()))?;

        let httparse::Status::Complete(len) = status else {
            return Ok(None);
        };

        let method = req
            .method
            .ok_or_else(|| IngressError::MalformedRequest("missing method".to_string()))?;
        let target = req
            .path
            .ok_or_else(|| IngressError::MalformedRequest("missing request target".to_string()))?;

        Ok(Some(Self {
            method: method.to_string(),
            target: target.to_string(),
            len,
        }))
    }

    /// Buffer until a full head is available, leaving it in `reader`
    pub async fn peek<S: AsyncRead + Unpin>(
        reader: &mut Prebuffered<S>,
    ) -> Result<Self, IngressError> {
        loop {
            if let Some(head) = Self::parse(reader.buffer())? {
                return Ok(head);
            }
            if reader.is_full() {
                return Err(IngressError::MalformedRequest(
                    "request head too large".to_string(),
                ));
            }
            if reader.buffer_more().await? == 0 {
                return Err(IngressError::MalformedRequest(
                    "connection closed before request head".to_string(),
                ));
            }
        }
    }

    pub fn is_connect(&self) -> bool {
        self.method == "CONNECT"
    }
}

/// Serve one client connection of the HTTP-proxy listener
pub async fn handle_connection<S>(stream: S, state: Arc<SharedState>) -> Result<(), IngressError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut reader = Prebuffered::new(stream, MAX_HEAD_BYTES);
    let head = RequestHead::peek(&mut reader).await?;

    if head.is_connect() {
        debug!("CONNECT {}", head.target);
        reader.discard(head.len);
        reader.write_all(CONNECT_ESTABLISHED).await?;
        reader.flush().await?;

        serve_tls(reader, state, InterceptTarget::Connect { host: head.target }).await
    } else {
        debug!("{} {}", head.method, head.target);
        serve_http1(reader, state, Origin::plain()).await
    }
}

/// Accept HTTP-proxy clients until the listener fails
pub async fn run(listener: TcpListener, state: Arc<SharedState>) -> io::Result<()> {
    info!("HTTP proxy listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("HTTP proxy accept failed: {}", e);
                continue;
            }
        };

        let state = Arc::clone(&state);
        tokio::spawn(
            async move {
                let deadline = state.config.ingress_deadline;
                match tokio::time::timeout(deadline, handle_connection(stream, state)).await {
                    Ok(Ok(())) => debug!("Connection finished"),
                    Ok(Err(e)) => debug!("Connection aborted: {}", e),
                    Err(_) => warn!("Connection exceeded {:?} deadline, closing", deadline),
                }
            }
            .instrument(info_span!("http_proxy", %peer)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connect_head() {
        let buf = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n";
        let head = RequestHead::parse(buf).unwrap().unwrap();
        assert!(head.is_connect());
        assert_eq!(head.target, "example.com:443");
        assert_eq!(head.len, buf.len());
    }

    #[test]
    fn test_parse_absolute_form_head() {
        let buf = b"GET http://example.com/a?b=1 HTTP/1.1\r\nHost: example.com\r\n\r\nbody";
        let head = RequestHead::parse(buf).unwrap().unwrap();
        assert!(!head.is_connect());
        assert_eq!(head.method, "GET");
        assert_eq!(head.target, "http://example.com/a?b=1");
        assert_eq!(head.len, buf.len() - 4);
    }

    #[test]
    fn test_partial_head_needs_more() {
        assert!(RequestHead::parse(b"GET / HTTP/1.1\r\nHost: exa").unwrap().is_none());
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = RequestHead::parse(b"\x16\x03\x01\x02\x00\x01\r\n\r\n").unwrap_err();
        assert!(matches!(err, IngressError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn test_peek_reports_early_close() {
        let mut reader = Prebuffered::new(&b"GET / HTTP/1.1\r\n"[..], MAX_HEAD_BYTES);
        let err = RequestHead::peek(&mut reader).await.unwrap_err();
        assert!(matches!(err, IngressError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn test_malformed_client_gets_no_response() {
        let state = Arc::new(SharedState::new(crate::GatewayConfig::new("token")));
        let (mut client, server) = tokio::io::duplex(1024);

        client.write_all(b"NOT A REQUEST\r\n\r\n").await.unwrap();
        let result = handle_connection(server, state).await;
        assert!(matches!(result, Err(IngressError::MalformedRequest(_))));

        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut out)
            .await
            .unwrap();
        assert!(out.is_empty());
    }
}
