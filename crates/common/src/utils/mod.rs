mod encoding;
mod headers;
mod id;

pub use encoding::{base64_body, decode_body, encode_body};
pub use headers::{HOP_BY_HOP_HEADERS, headers_to_map, map_to_headers, strip_hop_by_hop};
pub use id::{generate_edge_id, generate_request_id};
