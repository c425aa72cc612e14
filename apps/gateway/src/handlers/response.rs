//! Tunnel read loop
//!
//! Consumes frames an edge sends over its tunnel: binary frames carry response
//! envelopes, everything else is logged and dropped. Pings are answered by tungstenite
//! on the next read or write.

use futures_util::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, info, warn};

use crate::registry::{EdgeConnection, EdgeRegistry};

/// Read frames until the tunnel closes or fails
pub async fn handle_response<S>(mut read: S, connection: &EdgeConnection, registry: &EdgeRegistry)
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    while let Some(message) = read.next().await {
        match message {
            Ok(WsMessage::Ping(_)) => {
                debug!("Received ping from {}", connection.remote_addr());
            }
            Ok(WsMessage::Pong(_)) => {
                debug!("Received pong from {}", connection.remote_addr());
            }
            Ok(WsMessage::Close(frame)) => {
                info!("Edge closed tunnel: {:?}", frame);
                break;
            }
            Ok(message) => match registry.on_response(connection, &message) {
                Ok(envelope) => debug!(
                    "Response {} from edge {} (status {})",
                    envelope.request_id, envelope.edge_id, envelope.status_code
                ),
                Err(e) => warn!("Dropping frame from {}: {}", connection.remote_addr(), e),
            },
            Err(e) => {
                warn!("Tunnel read error from {}: {}", connection.remote_addr(), e);
                break;
            }
        }
    }

    debug!("Read loop exiting for {}", connection.id());
}
