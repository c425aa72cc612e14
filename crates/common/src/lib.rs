//! Shared types for the async proxy system
//!
//! This crate provides the wire envelopes, codec, error taxonomy and utilities used by
//! both the gateway (proxy front doors and tunnel endpoint) and the edge (outbound executor).

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod utils;
pub mod validation;

// Re-export commonly used types for convenience
pub use error::{Result, TunnelError};
pub use models::EdgeInfo;
pub use protocol::{RequestEnvelope, ResponseEnvelope, decode, encode};
pub use utils::{
    decode_body, encode_body, generate_edge_id, generate_request_id, headers_to_map,
    map_to_headers, strip_hop_by_hop,
};
