use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Read-only view of one connected edge, as reported by the registry snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeInfo {
    /// Time-sortable identifier assigned when the tunnel was accepted
    pub edge_id: String,

    /// Remote address of the tunnel connection
    pub remote_addr: SocketAddr,

    /// When the tunnel completed its handshake
    pub connected_at: DateTime<Utc>,

    /// Last time a request was dispatched to this edge (Unix epoch if never)
    pub last_used_at: DateTime<Utc>,
}

impl EdgeInfo {
    /// Check if a request was ever dispatched to this edge
    pub fn has_been_used(&self) -> bool {
        self.last_used_at > DateTime::<Utc>::UNIX_EPOCH
    }
}
