//! Transport interface
//!
//! A transport carries encoded messages to one peer. The router never owns
//! a transport; sessions keep a weak reference and the connection task that
//! created it keeps it alive.

use async_trait::async_trait;
use junction_core::Message;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Queue a message for the peer. `false` means the peer is gone or the
    /// message could not be queued; the router then closes the transport and
    /// detaches the session.
    async fn send(&self, message: Message) -> bool;

    /// Close the underlying connection
    async fn close(&self, reason: &str);

    /// Peer description for logs and session details
    fn peer(&self) -> String {
        "unknown".to_string()
    }
}
