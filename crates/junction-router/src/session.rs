//! Realm membership records
//!
//! A [`Session`] is what a realm knows about one attached peer: its
//! identity, a weak handle on its transport and its stored testaments.
//! The per-connection protocol state machine lives in
//! [`router_session`](crate::router_session).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use junction_core::{Message, Payload, PublishOptions, SessionId};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::auth::Principal;
use crate::transport::Transport;

/// Testament scope published right after the session leaves
pub const SCOPE_DETACHED: &str = "detached";

/// Testament scope published after the detached scope
pub const SCOPE_DESTROYED: &str = "destroyed";

/// Protocol state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport open, waiting for HELLO
    Connecting,
    /// Attached to a realm
    Established,
    /// GOODBYE sent by the router, waiting for the peer's GOODBYE
    Closing,
    /// Not attached; a new HELLO may follow on the same transport
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Established => "established",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

/// Identity of an attached session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionDetails {
    pub session: SessionId,
    pub realm: String,
    pub authid: String,
    pub authrole: String,
    pub authmethod: String,
    pub transport: String,
    pub joined_at: DateTime<Utc>,
}

impl SessionDetails {
    pub fn new(session: SessionId, realm: &str, principal: Principal, transport: String) -> Self {
        Self {
            session,
            realm: realm.to_string(),
            authid: principal.authid,
            authrole: principal.authrole,
            authmethod: principal.authmethod,
            transport,
            joined_at: Utc::now(),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(session: SessionId, realm: &str, authid: &str, authrole: &str) -> Self {
        Self::new(
            session,
            realm,
            Principal::new(authid, authrole, "anonymous"),
            "test".to_string(),
        )
    }
}

/// An event stored for publication when its session goes away
#[derive(Debug, Clone)]
pub struct Testament {
    pub topic: String,
    pub payload: Payload,
    pub options: PublishOptions,
}

/// A session attached to a realm
pub struct Session {
    details: SessionDetails,
    transport: Weak<dyn Transport>,
    testaments: Mutex<HashMap<String, Vec<Testament>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("details", &self.details)
            .field("transport", &"<weak>")
            .finish()
    }
}

impl Session {
    pub fn new(details: SessionDetails, transport: &Arc<dyn Transport>) -> Self {
        Self {
            details,
            transport: Arc::downgrade(transport),
            testaments: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.details.session
    }

    pub fn details(&self) -> &SessionDetails {
        &self.details
    }

    /// The transport, if the connection still exists
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.upgrade()
    }

    pub fn add_testament(&self, scope: &str, testament: Testament) {
        self.testaments
            .lock()
            .entry(scope.to_string())
            .or_default()
            .push(testament);
    }

    /// Drop stored testaments of a scope, returning how many were dropped
    pub fn flush_testaments(&self, scope: &str) -> usize {
        self.testaments
            .lock()
            .remove(scope)
            .map(|t| t.len())
            .unwrap_or(0)
    }

    pub fn take_testaments(&self, scope: &str) -> Vec<Testament> {
        self.testaments.lock().remove(scope).unwrap_or_default()
    }
}

/// Sessions of one realm keyed by id
pub type SessionTable = DashMap<SessionId, Arc<Session>>;

/// One outbound message addressed to a session of the realm
#[derive(Debug, Clone)]
pub struct Delivery {
    pub to: SessionId,
    pub message: Message,
}

impl Delivery {
    pub fn new(to: SessionId, message: Message) -> Self {
        Self { to, message }
    }
}
