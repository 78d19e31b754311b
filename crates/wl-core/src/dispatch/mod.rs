//! Inbound event routing and the outbound request path.

pub mod dispatcher;
pub mod request;

pub use dispatcher::Dispatcher;
pub use request::{send_request, WireSink};
