//! Delivery seams: HTTP reports, the teardown-surviving beacon and the
//! realtime frame transport.

pub mod beacon;
pub mod http;
pub mod traits;
pub mod websocket;

#[cfg(test)]
pub(crate) mod memory;

pub use beacon::HttpBeacon;
pub use http::HttpReporter;
pub use traits::{ActionReporter, Beacon, FrameTransport, TransportConnector};
pub use websocket::{WebSocketConnector, WebSocketTransport};
