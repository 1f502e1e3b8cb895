//! WebSocket connection management
//!
//! Handles the connection pool and the outbound side of each connection.

use dashmap::DashMap;
use junction_core::Message;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to a WebSocket connection for queueing outbound messages
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: String,
    addr: SocketAddr,
    /// Bounded queue drained by the connection's writer loop
    sender: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(
        id: String,
        addr: SocketAddr,
        sender: mpsc::Sender<Message>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            addr,
            sender,
            cancel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queue a message, waiting for room when the queue is full. Fails once
    /// the connection is closing.
    pub async fn send(&self, message: Message) -> Result<(), ConnectionError> {
        if self.cancel.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        tokio::select! {
            sent = self.sender.send(message) => sent.map_err(|_| ConnectionError::Closed),
            _ = self.cancel.cancelled() => Err(ConnectionError::Closed),
        }
    }

    /// Ask the writer loop to flush and close the socket
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Manages all WebSocket connections
#[derive(Debug)]
pub struct ConnectionPool {
    connections: DashMap<String, ConnectionHandle>,
    /// Slots taken, counted apart from the map so a check and a claim are one step
    reserved: AtomicUsize,
    max_connections: usize,
}

impl ConnectionPool {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: DashMap::new(),
            reserved: AtomicUsize::new(0),
            max_connections,
        }
    }

    pub fn count(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    /// Claim a slot for the connection. `false` when the pool is full.
    pub fn try_add(&self, handle: ConnectionHandle) -> bool {
        let claimed = self
            .reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |taken| {
                (taken < self.max_connections).then_some(taken + 1)
            });
        if claimed.is_err() {
            return false;
        }
        self.connections.insert(handle.id.clone(), handle);
        true
    }

    /// Release a connection's slot
    pub fn remove(&self, connection_id: &str) -> Option<ConnectionHandle> {
        let removed = self.connections.remove(connection_id).map(|(_, handle)| handle);
        if removed.is_some() {
            self.reserved.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    /// Close every connection
    pub fn close_all(&self) {
        for handle in self.connections.iter() {
            debug!("Closing connection {}", handle.id);
            handle.close();
        }
    }
}

/// Connection errors
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: &str, capacity: usize) -> (ConnectionHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        (
            ConnectionHandle::new(id.to_string(), addr, tx, CancellationToken::new()),
            rx,
        )
    }

    #[test]
    fn test_pool_capacity() {
        let pool = ConnectionPool::new(2);
        let (a, _ra) = handle("a", 1);
        let (b, _rb) = handle("b", 1);
        let (c, _rc) = handle("c", 1);
        assert!(pool.try_add(a));
        assert!(pool.try_add(b));
        assert_eq!(pool.count(), 2);
        assert!(!pool.try_add(c.clone()));

        assert!(pool.remove("a").is_some());
        assert!(pool.remove("a").is_none());
        assert_eq!(pool.count(), 1);
        assert!(pool.try_add(c));
    }

    #[tokio::test]
    async fn test_concurrent_adds_respect_capacity() {
        let pool = std::sync::Arc::new(ConnectionPool::new(5));
        let attempts = (0..50).map(|i| {
            let pool = std::sync::Arc::clone(&pool);
            tokio::spawn(async move {
                let (conn, _rx) = handle(&format!("c{}", i), 1);
                pool.try_add(conn)
            })
        });

        let mut admitted = 0;
        for attempt in futures_util::future::join_all(attempts).await {
            if tokio_test::assert_ok!(attempt) {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
        assert_eq!(pool.count(), 5);
    }

    #[tokio::test]
    async fn test_send_fails_after_close() {
        let (conn, mut rx) = handle("a", 4);
        conn.send(Message::goodbye("wamp.close.normal")).await.unwrap();
        assert!(rx.recv().await.is_some());

        conn.close();
        assert!(matches!(
            conn.send(Message::goodbye("wamp.close.normal")).await,
            Err(ConnectionError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_full_queue_unblocks_on_close() {
        let (conn, _rx) = handle("a", 1);
        conn.send(Message::goodbye("wamp.close.normal")).await.unwrap();

        let blocked = conn.clone();
        let pending = tokio::spawn(async move {
            blocked.send(Message::goodbye("wamp.close.normal")).await
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        conn.close();
        assert!(matches!(pending.await.unwrap(), Err(ConnectionError::Closed)));
    }
}
