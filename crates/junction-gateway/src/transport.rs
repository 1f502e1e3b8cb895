//! Router transport over a WebSocket connection

use async_trait::async_trait;
use junction_core::Message;
use junction_router::Transport;
use tracing::debug;

use crate::connection::ConnectionHandle;

/// Queues router messages on a connection's outbound queue
#[derive(Debug, Clone)]
pub struct WsTransport {
    handle: ConnectionHandle,
}

impl WsTransport {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, message: Message) -> bool {
        match self.handle.send(message).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Dropping message for {}: {}", self.handle.addr(), e);
                false
            }
        }
    }

    async fn close(&self, reason: &str) {
        debug!("Closing {}: {}", self.handle.addr(), reason);
        self.handle.close();
    }

    fn peer(&self) -> String {
        self.handle.addr().to_string()
    }
}
