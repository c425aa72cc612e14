//! Tunnel endpoint
//!
//! Accepts edge websocket upgrades on `/connect`, checks the shared secret, and runs
//! the tunnel until either side closes it.

use async_proxy_common::constants::{MAX_TUNNEL_MESSAGE_BYTES, TUNNEL_PATH};
use futures_util::{Sink, SinkExt, StreamExt};
use std::{io, net::SocketAddr, sync::Arc};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::{
    Error as WsError, Message as WsMessage,
    handshake::server::{ErrorResponse, Request, Response},
    http::{HeaderValue, StatusCode, header::WWW_AUTHENTICATE},
    protocol::WebSocketConfig,
};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    SharedState, auth,
    handlers::{disconnect::handle_disconnect, response::handle_response},
    registry::EdgeConnection,
};

/// Outgoing frames buffered per tunnel before senders wait
const OUTGOING_BUFFER: usize = 100;

/// Frame and message limits for edge tunnels
pub fn tunnel_ws_config() -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(MAX_TUNNEL_MESSAGE_BYTES))
        .max_frame_size(Some(MAX_TUNNEL_MESSAGE_BYTES))
}

/// Accept edge tunnels until the listener fails
pub async fn run(listener: TcpListener, state: Arc<SharedState>) -> io::Result<()> {
    info!("Tunnel endpoint listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Tunnel accept failed: {}", e);
                continue;
            }
        };

        let state = Arc::clone(&state);
        tokio::spawn(
            async move {
                if let Err(e) = handle_connect(stream, peer, state).await {
                    debug!("Tunnel handshake failed: {}", e);
                }
            }
            .instrument(info_span!("tunnel", %peer)),
        );
    }
}

fn error_response(status: StatusCode, body: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(body.to_string()));
    *response.status_mut() = status;
    response
}

/// Handshake callback: only `/connect` with a valid token is upgraded
fn check_upgrade(
    request: &Request,
    response: Response,
    secret: &str,
) -> Result<Response, ErrorResponse> {
    if request.uri().path() != TUNNEL_PATH {
        warn!("Tunnel upgrade on unknown path {}", request.uri().path());
        return Err(error_response(StatusCode::NOT_FOUND, "Not found"));
    }

    if !auth::is_authorized(request.headers(), secret) {
        let mut rejected = error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
        rejected.headers_mut().insert(
            WWW_AUTHENTICATE,
            HeaderValue::from_static("Bearer realm=\"edge-tunnel\""),
        );
        return Err(rejected);
    }

    Ok(response)
}

/// Run one edge tunnel from upgrade to teardown
pub async fn handle_connect<S>(
    stream: S,
    peer: SocketAddr,
    state: Arc<SharedState>,
) -> Result<(), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let secret = state.config.tunnel_token.clone();
    let ws_stream = accept_hdr_async_with_config(
        stream,
        |request: &Request, response: Response| check_upgrade(request, response, &secret),
        Some(tunnel_ws_config()),
    )
    .await?;

    let (write, read) = ws_stream.split();
    let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_BUFFER);
    let write_handle = tokio::spawn(spawn_write_task(write, outgoing_rx));

    let connection = EdgeConnection::new(peer, outgoing_tx);
    let edge_id = state.registry.register(connection.clone());
    info!(
        "✅ Edge tunnel established: {} ({} edges connected)",
        edge_id,
        state.registry.count()
    );

    handle_response(read, &connection, &state.registry).await;

    handle_disconnect(&connection, &state.registry);
    write_handle.abort();
    Ok(())
}

/// Write task drains queued frames into the websocket
async fn spawn_write_task<W>(mut write: W, mut outgoing_rx: mpsc::Receiver<WsMessage>)
where
    W: Sink<WsMessage, Error = WsError> + Unpin,
{
    while let Some(message) = outgoing_rx.recv().await {
        if let Err(e) = write.send(message).await {
            error!("Failed to write tunnel frame: {}", e);
            break;
        }
    }

    debug!("Write task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;

    fn upgrade_request(path: &str, token: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_valid_upgrade_passes_through() {
        let request = upgrade_request("/connect", Some("secret"));
        let response = check_upgrade(&request, Response::new(()), "secret").unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_unknown_path_is_404() {
        let request = upgrade_request("/other", Some("secret"));
        let rejected = check_upgrade(&request, Response::new(()), "secret").unwrap_err();
        assert_eq!(rejected.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_bad_token_is_401_with_challenge() {
        for token in [None, Some("wrong")] {
            let request = upgrade_request("/connect", token);
            let rejected = check_upgrade(&request, Response::new(()), "secret").unwrap_err();
            assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);
            let headers: &HeaderMap = rejected.headers();
            assert!(headers.contains_key(WWW_AUTHENTICATE));
        }
    }

    #[test]
    fn test_tunnel_limits() {
        let config = tunnel_ws_config();
        assert_eq!(config.max_message_size, Some(MAX_TUNNEL_MESSAGE_BYTES));
        assert_eq!(config.max_frame_size, Some(MAX_TUNNEL_MESSAGE_BYTES));
    }
}
