mod codec;
mod request;
mod response;

pub use codec::{decode, encode};
pub use request::RequestEnvelope;
pub use response::ResponseEnvelope;

/// Header multimap carried by both envelopes
pub type HeaderMultimap = std::collections::HashMap<String, Vec<String>>;
