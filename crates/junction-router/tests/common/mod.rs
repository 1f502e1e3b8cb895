#![allow(dead_code)]

use async_trait::async_trait;
use junction_core::{
    CallOptions, EventDetails, HelloDetails, Message, Payload, PublishOptions, RegisterOptions,
    RegistrationId, RequestId, SessionId, SubscribeOptions, SubscriptionId,
};
use junction_router::{Inbound, Router, SessionInbox, Transport};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Transport that records everything the router sends
pub struct MockTransport {
    peer: String,
    tx: mpsc::UnboundedSender<Message>,
    closed: AtomicBool,
    failing: AtomicBool,
    close_reason: Mutex<Option<String>>,
}

impl MockTransport {
    pub fn new(peer: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            peer: peer.to_string(),
            tx,
            closed: AtomicBool::new(false),
            failing: AtomicBool::new(false),
            close_reason: Mutex::new(None),
        });
        (transport, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_reason(&self) -> Option<String> {
        self.close_reason.lock().clone()
    }

    /// Make every further send fail while the transport stays open
    pub fn fail_sends(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, message: Message) -> bool {
        if self.is_closed() || self.failing.load(Ordering::SeqCst) {
            return false;
        }
        self.tx.send(message).is_ok()
    }

    async fn close(&self, reason: &str) {
        self.closed.store(true, Ordering::SeqCst);
        *self.close_reason.lock() = Some(reason.to_string());
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

/// Poll `check` until it holds, failing after two seconds
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}

/// A scripted peer driving one router session
pub struct TestClient {
    pub transport: Arc<MockTransport>,
    pub session: SessionId,
    inbox: SessionInbox,
    rx: mpsc::UnboundedReceiver<Message>,
    next_request: RequestId,
}

impl TestClient {
    pub fn connect(router: &Router, peer: &str) -> Self {
        let (transport, rx) = MockTransport::new(peer);
        let inbox = router.spawn_session(transport.clone() as Arc<dyn Transport>);
        Self {
            transport,
            session: 0,
            inbox,
            rx,
            next_request: 1,
        }
    }

    /// Connect and join `realm` anonymously
    pub async fn join(router: &Router, realm: &str, peer: &str) -> Self {
        Self::join_with(router, realm, peer, HelloDetails::default()).await
    }

    pub async fn join_with(router: &Router, realm: &str, peer: &str, hello: HelloDetails) -> Self {
        let mut client = Self::connect(router, peer);
        match client.hello(realm, hello).await {
            Message::Welcome { session, .. } => client.session = session,
            other => panic!("expected WELCOME, got {:?}", other),
        }
        client
    }

    pub async fn hello(&mut self, realm: &str, details: HelloDetails) -> Message {
        self.send(Message::Hello {
            realm: realm.to_string(),
            details,
        })
        .await;
        self.recv().await
    }

    pub fn request(&mut self) -> RequestId {
        let id = self.next_request;
        self.next_request += 1;
        id
    }

    pub async fn send(&self, message: Message) {
        self.inbox
            .send(Inbound::Message(message))
            .await
            .expect("session task stopped");
    }

    pub async fn send_inbound(&self, inbound: Inbound) -> bool {
        self.inbox.send(inbound).await.is_ok()
    }

    pub async fn recv(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("transport dropped")
    }

    /// Next message within `millis`, if any
    pub async fn try_recv(&mut self, millis: u64) -> Option<Message> {
        tokio::time::timeout(Duration::from_millis(millis), self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    pub async fn expect_silence(&mut self) {
        if let Some(message) = self.try_recv(100).await {
            panic!("unexpected message {:?}", message);
        }
    }

    pub async fn subscribe(&mut self, topic: &str, options: SubscribeOptions) -> SubscriptionId {
        let request = self.request();
        self.send(Message::Subscribe {
            request,
            options,
            topic: topic.to_string(),
        })
        .await;
        match self.recv().await {
            Message::Subscribed {
                request: r,
                subscription,
            } if r == request => subscription,
            other => panic!("expected SUBSCRIBED, got {:?}", other),
        }
    }

    pub async fn register(&mut self, procedure: &str, options: RegisterOptions) -> RegistrationId {
        let request = self.request();
        self.send(Message::Register {
            request,
            options,
            procedure: procedure.to_string(),
        })
        .await;
        match self.recv().await {
            Message::Registered {
                request: r,
                registration,
            } if r == request => registration,
            other => panic!("expected REGISTERED, got {:?}", other),
        }
    }

    pub async fn publish(&mut self, topic: &str, options: PublishOptions, payload: Payload) -> RequestId {
        let request = self.request();
        self.send(Message::Publish {
            request,
            options,
            topic: topic.to_string(),
            payload,
        })
        .await;
        request
    }

    pub async fn call(&mut self, procedure: &str, options: CallOptions, payload: Payload) -> RequestId {
        let request = self.request();
        self.send(Message::Call {
            request,
            options,
            procedure: procedure.to_string(),
            payload,
        })
        .await;
        request
    }

    pub async fn expect_event(&mut self) -> (SubscriptionId, EventDetails, Payload) {
        match self.recv().await {
            Message::Event {
                subscription,
                details,
                payload,
                ..
            } => (subscription, details, payload),
            other => panic!("expected EVENT, got {:?}", other),
        }
    }

    /// Returns (invocation request, registration, payload)
    pub async fn expect_invocation(&mut self) -> (RequestId, RegistrationId, Payload) {
        match self.recv().await {
            Message::Invocation {
                request,
                registration,
                payload,
                ..
            } => (request, registration, payload),
            other => panic!("expected INVOCATION, got {:?}", other),
        }
    }

    pub async fn expect_error(&mut self) -> (RequestId, String) {
        match self.recv().await {
            Message::Error { request, error, .. } => (request, error),
            other => panic!("expected ERROR, got {:?}", other),
        }
    }

    /// Call a meta procedure and return the RESULT payload
    pub async fn meta(&mut self, procedure: &str, payload: Payload) -> Payload {
        let request = self.call(procedure, CallOptions::default(), payload).await;
        match self.recv().await {
            Message::Result {
                request: r,
                payload,
                ..
            } if r == request => payload,
            other => panic!("expected RESULT, got {:?}", other),
        }
    }
}
