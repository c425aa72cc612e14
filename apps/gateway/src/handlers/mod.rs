//! Handler modules
//!
//! The tunnel side of the gateway (edge upgrade, frame reading, teardown) and the
//! conversion of client requests into dispatches.

pub mod connect;
pub mod disconnect;
pub mod forwarding;
pub mod response;


pub use connect::handle_connect;
pub use disconnect::handle_disconnect;
pub use forwarding::{Origin, handle_forwarding};
pub use response::handle_response;
