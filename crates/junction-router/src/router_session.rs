//! Per-connection session state machine
//!
//! A `RouterSession` consumes decoded messages of one connection in order
//! and drives the realm. Transports feed it through a bounded channel; the
//! session task owns all protocol state, so no locks are involved here.
//!
//! ```text
//! CONNECTING --HELLO ok--> ESTABLISHED --GOODBYE--> CLOSED --HELLO--> ...
//!      |                        |   \--leave()--> CLOSING --GOODBYE--> CLOSED
//!      \--HELLO refused--> CLOSED   \--violation--> ABORT, task ends
//! ```

use junction_core::{close, Message, MessageKind, RoutingError};
use junction_observability::logging::create_session_span;
use junction_observability::RealmMetrics;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};

use crate::realm::{CallOutcome, Realm};
use crate::session::{SessionDetails, SessionState};
use crate::session_manager::SessionManager;
use crate::transport::Transport;

/// Input of a session task
#[derive(Debug)]
pub enum Inbound {
    /// A decoded message from the peer
    Message(Message),
    /// A frame that could not be decoded
    Invalid(String),
    /// Router-initiated close; the peer is asked to say GOODBYE
    Leave(String),
    /// The connection is gone
    Closed,
}

/// Sender half feeding a session task
pub type SessionInbox = mpsc::Sender<Inbound>;

pub struct RouterSession {
    manager: Arc<SessionManager>,
    transport: Arc<dyn Transport>,
    state: SessionState,
    joined: Option<SessionDetails>,
}

impl RouterSession {
    pub fn new(manager: Arc<SessionManager>, transport: Arc<dyn Transport>) -> Self {
        Self {
            manager,
            transport,
            state: SessionState::Connecting,
            joined: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn details(&self) -> Option<&SessionDetails> {
        self.joined.as_ref()
    }

    /// Process inbound messages until the connection closes or the peer
    /// violates the protocol
    pub async fn run(mut self, mut inbox: mpsc::Receiver<Inbound>) {
        while let Some(inbound) = inbox.recv().await {
            if !self.handle(inbound).await {
                break;
            }
        }
        self.detach().await;
        self.state = SessionState::Closed;
        debug!("session task finished");
    }

    /// Handle one input. Returns `false` when the task should stop.
    pub async fn handle(&mut self, inbound: Inbound) -> bool {
        match inbound {
            Inbound::Message(message) => self.on_message(message).await,
            Inbound::Invalid(reason) => self.violation(reason).await,
            Inbound::Leave(reason) => {
                self.leave(&reason).await;
                true
            }
            Inbound::Closed => false,
        }
    }

    async fn on_message(&mut self, message: Message) -> bool {
        let kind = message.kind();
        if !kind.is_client_sent() {
            return self.violation(format!("{} is never sent by a client", kind)).await;
        }

        // killed or realm shut down behind our back
        if self.state == SessionState::Established && !self.attached() {
            debug!("session no longer attached, back to closed");
            self.joined = None;
            self.state = SessionState::Closed;
            if kind != MessageKind::Hello {
                return true;
            }
        }

        match self.state {
            SessionState::Connecting | SessionState::Closed => match message {
                Message::Hello { realm, details } => {
                    self.hello(&realm, &details).await;
                    true
                }
                _ => self.violation(format!("{} before HELLO", kind)).await,
            },
            SessionState::Established => self.established(message).await,
            SessionState::Closing => {
                match message {
                    Message::Goodbye { .. } | Message::Abort { .. } => {
                        self.detach().await;
                        self.state = SessionState::Closed;
                    }
                    _ => debug!("discarding {} while closing", kind),
                }
                true
            }
        }
    }

    async fn hello(&mut self, realm: &str, details: &junction_core::HelloDetails) {
        match self.manager.attach(realm, details, &self.transport).await {
            Ok(session) => {
                self.joined = Some(session);
                self.state = SessionState::Established;
            }
            Err(err) => {
                info!(realm = %realm, peer = %self.transport.peer(), "HELLO refused: {}", err);
                self.transport
                    .send(Message::abort(err.uri(), err.to_string()))
                    .await;
                self.state = SessionState::Closed;
            }
        }
    }

    fn attached(&self) -> bool {
        self.joined
            .as_ref()
            .map(|session| self.manager.is_attached(session))
            .unwrap_or(false)
    }

    fn realm(&self) -> Option<(Arc<Realm>, SessionDetails)> {
        let session = self.joined.as_ref()?;
        let realm = self.manager.registry().get(&session.realm)?;
        Some((realm, session.clone()))
    }

    async fn established(&mut self, message: Message) -> bool {
        let Some((realm, session)) = self.realm() else {
            self.joined = None;
            self.state = SessionState::Closed;
            return true;
        };

        match message {
            Message::Hello { .. } => {
                self.violation("HELLO on an established session".to_string())
                    .await
            }
            Message::Goodbye { .. } => {
                self.transport
                    .send(Message::goodbye(close::GOODBYE_AND_OUT))
                    .await;
                self.detach().await;
                self.state = SessionState::Closed;
                true
            }
            Message::Abort { reason, .. } => {
                debug!(session = session.session, "peer aborted: {}", reason);
                self.detach().await;
                self.state = SessionState::Closed;
                true
            }

            Message::Subscribe {
                request,
                options,
                topic,
            } => {
                let result = realm
                    .subscribe(&session, &topic, &options)
                    .await
                    .map(|subscription| Message::Subscribed {
                        request,
                        subscription,
                    });
                self.reply(MessageKind::Subscribe, request, result).await
            }
            Message::Unsubscribe {
                request,
                subscription,
            } => {
                let result = realm
                    .unsubscribe(&session, subscription)
                    .await
                    .map(|_| Message::Unsubscribed { request });
                self.reply(MessageKind::Unsubscribe, request, result).await
            }
            Message::Publish {
                request,
                options,
                topic,
                payload,
            } => {
                let result = realm.publish(&session, &topic, &options, &payload).await;
                match result {
                    Ok(publication) if options.acknowledge => {
                        self.reply(
                            MessageKind::Publish,
                            request,
                            Ok(Message::Published {
                                request,
                                publication,
                            }),
                        )
                        .await
                    }
                    Ok(_) => true,
                    Err(err) if options.acknowledge => {
                        self.reply(MessageKind::Publish, request, Err(err)).await
                    }
                    Err(RoutingError::ProtocolViolation(reason)) => self.violation(reason).await,
                    Err(err) => {
                        debug!(session = session.session, "unacknowledged publish failed: {}", err);
                        true
                    }
                }
            }

            Message::Register {
                request,
                options,
                procedure,
            } => {
                let result = realm
                    .register(&session, &procedure, &options)
                    .await
                    .map(|registration| Message::Registered {
                        request,
                        registration,
                    });
                self.reply(MessageKind::Register, request, result).await
            }
            Message::Unregister {
                request,
                registration,
            } => {
                let result = realm
                    .unregister(&session, registration)
                    .await
                    .map(|_| Message::Unregistered { request });
                self.reply(MessageKind::Unregister, request, result).await
            }
            Message::Call {
                request,
                options,
                procedure,
                payload,
            } => match realm
                .call(&session, request, &procedure, &options, payload)
                .await
            {
                Ok(CallOutcome::Invoked(_)) => true,
                Ok(CallOutcome::Answered(payload)) => {
                    let result = Message::Result {
                        request,
                        details: Default::default(),
                        payload,
                    };
                    self.reply(MessageKind::Call, request, Ok(result)).await
                }
                Err(err) => self.reply(MessageKind::Call, request, Err(err)).await,
            },
            Message::Cancel { request, options } => {
                realm.cancel(session.session, request, &options).await;
                true
            }
            Message::Yield {
                request,
                options,
                payload,
            } => {
                realm
                    .yield_result(session.session, request, &options, payload)
                    .await;
                true
            }
            Message::Error {
                request_type: MessageKind::Invocation,
                request,
                details,
                error,
                payload,
            } => {
                realm
                    .invocation_error(session.session, request, details, error, payload)
                    .await;
                true
            }
            Message::Error { request_type, .. } => {
                self.violation(format!("ERROR for {} from a client", request_type))
                    .await
            }
            other => {
                self.violation(format!("unexpected {}", other.kind()))
                    .await
            }
        }
    }

    /// Send a reply or the matching ERROR. A protocol violation aborts.
    async fn reply(
        &mut self,
        kind: MessageKind,
        request: junction_core::RequestId,
        result: Result<Message, RoutingError>,
    ) -> bool {
        match result {
            Ok(message) => {
                self.transport.send(message).await;
                true
            }
            Err(RoutingError::ProtocolViolation(reason)) => self.violation(reason).await,
            Err(err) => {
                debug!("{} {} failed: {}", kind, request, err);
                self.transport.send(Message::error(kind, request, &err)).await;
                true
            }
        }
    }

    /// Router-initiated close
    async fn leave(&mut self, reason: &str) {
        if self.state == SessionState::Established {
            self.transport.send(Message::goodbye(reason)).await;
            self.state = SessionState::Closing;
        }
    }

    /// ABORT the peer, detach and close the connection. Always `false`.
    async fn violation(&mut self, reason: String) -> bool {
        warn!(peer = %self.transport.peer(), "protocol violation: {}", reason);
        RealmMetrics::protocol_violation();
        self.transport
            .send(Message::abort(
                RoutingError::ProtocolViolation(String::new()).uri(),
                reason,
            ))
            .await;
        self.detach().await;
        self.transport.close("protocol violation").await;
        self.state = SessionState::Closed;
        false
    }

    async fn detach(&mut self) {
        if let Some(session) = self.joined.take() {
            let span = create_session_span(session.session, Some(&session.realm));
            self.manager.detach(&session).instrument(span).await;
        }
    }
}
