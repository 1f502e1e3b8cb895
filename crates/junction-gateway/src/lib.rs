//! Junction Gateway - WebSocket transport for the router
//!
//! Accepts WebSocket connections speaking `wamp.2.json`, decodes frames with
//! the core codec and runs one router session per connection.

mod connection;
mod gateway;
mod transport;

pub use connection::{ConnectionError, ConnectionHandle, ConnectionPool};
pub use gateway::{Gateway, GatewayConfig, GatewayError};
pub use transport::WsTransport;
