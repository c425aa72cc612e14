//! Tunnel teardown

use tracing::{info, warn};

use crate::registry::{EdgeConnection, EdgeRegistry};

/// Remove a closed tunnel's edge from the registry
///
/// In-flight requests routed to the edge are not failed here; each resolves through its
/// own timeout.
pub fn handle_disconnect(connection: &EdgeConnection, registry: &EdgeRegistry) {
    match registry.unregister(connection) {
        Ok(()) => info!(
            "Edge tunnel closed: {} ({} edges remain)",
            connection.remote_addr(),
            registry.count()
        ),
        Err(e) => warn!(
            "Failed to unregister tunnel {} from {}: {}",
            connection.id(),
            connection.remote_addr(),
            e
        ),
    }
}
