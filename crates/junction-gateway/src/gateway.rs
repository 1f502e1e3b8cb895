//! Gateway main structure
//!
//! The WebSocket server that accepts connections and hands each one to its
//! own router session.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use junction_core::codec::{self, SUBPROTOCOL};
use junction_router::{Inbound, Router, SessionInbox, Transport};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message as WsMessage, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::connection::{ConnectionHandle, ConnectionPool};
use crate::transport::WsTransport;

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind address (e.g., "127.0.0.1:8080")
    pub bind: String,
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Capacity of each connection's outbound queue
    pub outbound_queue_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            max_connections: 1000,
            outbound_queue_size: 256,
        }
    }
}

/// The WebSocket server
#[derive(Debug, Clone)]
pub struct Gateway {
    config: GatewayConfig,
    router: Router,
    connection_pool: Arc<ConnectionPool>,
    shutdown: CancellationToken,
}

/// Accept only peers offering `wamp.2.json` and echo it back
#[allow(clippy::result_large_err)]
fn negotiate_subprotocol(request: &Request, mut response: Response) -> Result<Response, ErrorResponse> {
    let offered = request
        .headers()
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|protocol| protocol.trim() == SUBPROTOCOL);

    if !offered {
        let mut rejection = ErrorResponse::new(Some(format!(
            "subprotocol {} required",
            SUBPROTOCOL
        )));
        *rejection.status_mut() = StatusCode::BAD_REQUEST;
        return Err(rejection);
    }

    response
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
    Ok(response)
}

impl Gateway {
    pub fn new(config: GatewayConfig, router: Router) -> Self {
        let connection_pool = Arc::new(ConnectionPool::new(config.max_connections));
        Self {
            config,
            router,
            connection_pool,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn connection_pool(&self) -> &ConnectionPool {
        &self.connection_pool
    }

    /// Stop accepting connections; `serve` then shuts the router down
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Bind the configured address and serve until shut down
    pub async fn run(&self) -> Result<(), GatewayError> {
        let addr: SocketAddr = self.config.bind.parse()?;
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        info!("Gateway listening on ws://{}", listener.local_addr()?);

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted?,
            };
            debug!("New connection from {}", peer_addr);

            let (tx, rx) = mpsc::channel::<junction_core::Message>(self.config.outbound_queue_size);
            let handle = ConnectionHandle::new(
                Uuid::new_v4().to_string(),
                peer_addr,
                tx,
                CancellationToken::new(),
            );
            if !self.connection_pool.try_add(handle.clone()) {
                warn!("Connection pool full, rejecting {}", peer_addr);
                tokio::spawn(async move {
                    if let Err(e) = Self::reject_connection(stream).await {
                        debug!("Failed to reject {}: {}", peer_addr, e);
                    }
                });
                continue;
            }

            let gateway = self.clone();
            tokio::spawn(async move {
                if let Err(e) = gateway.handle_connection(stream, &handle, rx).await {
                    error!("Connection error for {}: {}", peer_addr, e);
                }
                handle.close();
                gateway.connection_pool.remove(handle.id());
            });
        }

        info!("Gateway shutting down");
        self.router.shutdown().await;
        self.connection_pool.close_all();
        Ok(())
    }

    /// Complete the handshake and close right away with "try again later"
    async fn reject_connection(stream: TcpStream) -> Result<(), GatewayError> {
        let mut ws_stream = accept_hdr_async(stream, negotiate_subprotocol).await?;
        ws_stream
            .send(WsMessage::Close(Some(CloseFrame {
                code: CloseCode::Again,
                reason: Cow::Borrowed("server at capacity"),
            })))
            .await?;
        Ok(())
    }

    /// Handle a WebSocket connection whose pool slot is already taken
    async fn handle_connection(
        &self,
        stream: TcpStream,
        handle: &ConnectionHandle,
        rx: mpsc::Receiver<junction_core::Message>,
    ) -> Result<(), GatewayError> {
        let addr = handle.addr();
        let ws_stream = accept_hdr_async(stream, negotiate_subprotocol).await?;
        let (sink, source) = ws_stream.split();

        let transport: Arc<dyn Transport> = Arc::new(WsTransport::new(handle.clone()));
        let inbox = self.router.spawn_session(Arc::clone(&transport));
        let reader = tokio::spawn(read_loop(source, inbox, handle.cancel_token(), addr));

        let result = write_loop(sink, rx, handle.cancel_token(), addr).await;

        handle.close();
        let _ = reader.await;
        info!("Connection {} disconnected", addr);
        result
    }
}

/// Forward decoded frames to the session task until the peer goes away
async fn read_loop(mut source: WsSource, inbox: SessionInbox, cancel: CancellationToken, addr: SocketAddr) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = source.next() => frame,
        };

        let inbound = match frame {
            Some(Ok(WsMessage::Text(text))) => match codec::from_json(&text) {
                Ok(message) => Inbound::Message(message),
                Err(e) => {
                    warn!("Invalid frame from {}: {}", addr, e);
                    Inbound::Invalid(e.to_string())
                }
            },
            Some(Ok(WsMessage::Binary(_))) => {
                Inbound::Invalid(format!("binary frame on a {} connection", SUBPROTOCOL))
            }
            Some(Ok(WsMessage::Close(_))) | None => {
                info!("Connection {} closed", addr);
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!("WebSocket error on {}: {}", addr, e);
                break;
            }
        };

        if inbox.send(inbound).await.is_err() {
            break;
        }
    }

    let _ = inbox.send(Inbound::Closed).await;
    cancel.cancel();
}

/// Drain the outbound queue into the socket. On close, flush what is
/// already queued (an ABORT or GOODBYE usually) before the close frame.
async fn write_loop(
    mut sink: WsSink,
    mut rx: mpsc::Receiver<junction_core::Message>,
    cancel: CancellationToken,
    addr: SocketAddr,
) -> Result<(), GatewayError> {
    loop {
        let message = tokio::select! {
            biased;
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };
        send_frame(&mut sink, &message, addr).await?;
    }

    while let Ok(message) = rx.try_recv() {
        send_frame(&mut sink, &message, addr).await?;
    }
    let _ = sink.send(WsMessage::Close(None)).await;
    Ok(())
}

async fn send_frame(
    sink: &mut WsSink,
    message: &junction_core::Message,
    addr: SocketAddr,
) -> Result<(), GatewayError> {
    match codec::to_json(message) {
        Ok(text) => sink.send(WsMessage::Text(text)).await.map_err(|e| {
            debug!("Failed to send to {}: {}", addr, e);
            GatewayError::from(e)
        }),
        Err(e) => {
            error!("Failed to encode {}: {}", message.kind(), e);
            Ok(())
        }
    }
}

impl std::fmt::Display for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Gateway({})", self.config.bind)
    }
}

/// Gateway-related errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
}
