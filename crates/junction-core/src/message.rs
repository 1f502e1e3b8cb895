//! Protocol message model
//!
//! `Message` is a closed union over the 22 message kinds the router speaks.
//! Components dispatch on it with exhaustive matches.

use serde_json::{Map, Value};
use std::fmt;

use crate::error::RoutingError;
use crate::ids::{PublicationId, RegistrationId, RequestId, SessionId, SubscriptionId};
use crate::options::{
    CallOptions, CancelOptions, CloseDetails, EventDetails, HelloDetails, InterruptOptions,
    InvocationDetails, Payload, PublishOptions, RegisterOptions, ResultDetails,
    SubscribeOptions, WelcomeDetails, YieldOptions,
};

/// Message type tag with its wire code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Hello,
    Welcome,
    Abort,
    Goodbye,
    Error,
    Publish,
    Published,
    Subscribe,
    Subscribed,
    Unsubscribe,
    Unsubscribed,
    Event,
    Call,
    Cancel,
    Result,
    Register,
    Registered,
    Unregister,
    Unregistered,
    Invocation,
    Interrupt,
    Yield,
}

impl MessageKind {
    pub fn code(&self) -> u64 {
        match self {
            MessageKind::Hello => 1,
            MessageKind::Welcome => 2,
            MessageKind::Abort => 3,
            MessageKind::Goodbye => 6,
            MessageKind::Error => 8,
            MessageKind::Publish => 16,
            MessageKind::Published => 17,
            MessageKind::Subscribe => 32,
            MessageKind::Subscribed => 33,
            MessageKind::Unsubscribe => 34,
            MessageKind::Unsubscribed => 35,
            MessageKind::Event => 36,
            MessageKind::Call => 48,
            MessageKind::Cancel => 49,
            MessageKind::Result => 50,
            MessageKind::Register => 64,
            MessageKind::Registered => 65,
            MessageKind::Unregister => 66,
            MessageKind::Unregistered => 67,
            MessageKind::Invocation => 68,
            MessageKind::Interrupt => 69,
            MessageKind::Yield => 70,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        let kind = match code {
            1 => MessageKind::Hello,
            2 => MessageKind::Welcome,
            3 => MessageKind::Abort,
            6 => MessageKind::Goodbye,
            8 => MessageKind::Error,
            16 => MessageKind::Publish,
            17 => MessageKind::Published,
            32 => MessageKind::Subscribe,
            33 => MessageKind::Subscribed,
            34 => MessageKind::Unsubscribe,
            35 => MessageKind::Unsubscribed,
            36 => MessageKind::Event,
            48 => MessageKind::Call,
            49 => MessageKind::Cancel,
            50 => MessageKind::Result,
            64 => MessageKind::Register,
            65 => MessageKind::Registered,
            66 => MessageKind::Unregister,
            67 => MessageKind::Unregistered,
            68 => MessageKind::Invocation,
            69 => MessageKind::Interrupt,
            70 => MessageKind::Yield,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::Hello => "HELLO",
            MessageKind::Welcome => "WELCOME",
            MessageKind::Abort => "ABORT",
            MessageKind::Goodbye => "GOODBYE",
            MessageKind::Error => "ERROR",
            MessageKind::Publish => "PUBLISH",
            MessageKind::Published => "PUBLISHED",
            MessageKind::Subscribe => "SUBSCRIBE",
            MessageKind::Subscribed => "SUBSCRIBED",
            MessageKind::Unsubscribe => "UNSUBSCRIBE",
            MessageKind::Unsubscribed => "UNSUBSCRIBED",
            MessageKind::Event => "EVENT",
            MessageKind::Call => "CALL",
            MessageKind::Cancel => "CANCEL",
            MessageKind::Result => "RESULT",
            MessageKind::Register => "REGISTER",
            MessageKind::Registered => "REGISTERED",
            MessageKind::Unregister => "UNREGISTER",
            MessageKind::Unregistered => "UNREGISTERED",
            MessageKind::Invocation => "INVOCATION",
            MessageKind::Interrupt => "INTERRUPT",
            MessageKind::Yield => "YIELD",
        }
    }

    /// Whether a client peer may send this kind to the router
    pub fn is_client_sent(&self) -> bool {
        matches!(
            self,
            MessageKind::Hello
                | MessageKind::Abort
                | MessageKind::Goodbye
                | MessageKind::Error
                | MessageKind::Publish
                | MessageKind::Subscribe
                | MessageKind::Unsubscribe
                | MessageKind::Call
                | MessageKind::Cancel
                | MessageKind::Register
                | MessageKind::Unregister
                | MessageKind::Yield
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A protocol message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello {
        realm: String,
        details: HelloDetails,
    },
    Welcome {
        session: SessionId,
        details: WelcomeDetails,
    },
    Abort {
        details: CloseDetails,
        reason: String,
    },
    Goodbye {
        details: CloseDetails,
        reason: String,
    },
    Error {
        request_type: MessageKind,
        request: RequestId,
        details: Map<String, Value>,
        error: String,
        payload: Payload,
    },
    Publish {
        request: RequestId,
        options: PublishOptions,
        topic: String,
        payload: Payload,
    },
    Published {
        request: RequestId,
        publication: PublicationId,
    },
    Subscribe {
        request: RequestId,
        options: SubscribeOptions,
        topic: String,
    },
    Subscribed {
        request: RequestId,
        subscription: SubscriptionId,
    },
    Unsubscribe {
        request: RequestId,
        subscription: SubscriptionId,
    },
    Unsubscribed {
        request: RequestId,
    },
    Event {
        subscription: SubscriptionId,
        publication: PublicationId,
        details: EventDetails,
        payload: Payload,
    },
    Call {
        request: RequestId,
        options: CallOptions,
        procedure: String,
        payload: Payload,
    },
    Cancel {
        request: RequestId,
        options: CancelOptions,
    },
    Result {
        request: RequestId,
        details: ResultDetails,
        payload: Payload,
    },
    Register {
        request: RequestId,
        options: RegisterOptions,
        procedure: String,
    },
    Registered {
        request: RequestId,
        registration: RegistrationId,
    },
    Unregister {
        request: RequestId,
        registration: RegistrationId,
    },
    Unregistered {
        request: RequestId,
    },
    Invocation {
        request: RequestId,
        registration: RegistrationId,
        details: InvocationDetails,
        payload: Payload,
    },
    Interrupt {
        request: RequestId,
        options: InterruptOptions,
    },
    Yield {
        request: RequestId,
        options: YieldOptions,
        payload: Payload,
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Hello { .. } => MessageKind::Hello,
            Message::Welcome { .. } => MessageKind::Welcome,
            Message::Abort { .. } => MessageKind::Abort,
            Message::Goodbye { .. } => MessageKind::Goodbye,
            Message::Error { .. } => MessageKind::Error,
            Message::Publish { .. } => MessageKind::Publish,
            Message::Published { .. } => MessageKind::Published,
            Message::Subscribe { .. } => MessageKind::Subscribe,
            Message::Subscribed { .. } => MessageKind::Subscribed,
            Message::Unsubscribe { .. } => MessageKind::Unsubscribe,
            Message::Unsubscribed { .. } => MessageKind::Unsubscribed,
            Message::Event { .. } => MessageKind::Event,
            Message::Call { .. } => MessageKind::Call,
            Message::Cancel { .. } => MessageKind::Cancel,
            Message::Result { .. } => MessageKind::Result,
            Message::Register { .. } => MessageKind::Register,
            Message::Registered { .. } => MessageKind::Registered,
            Message::Unregister { .. } => MessageKind::Unregister,
            Message::Unregistered { .. } => MessageKind::Unregistered,
            Message::Invocation { .. } => MessageKind::Invocation,
            Message::Interrupt { .. } => MessageKind::Interrupt,
            Message::Yield { .. } => MessageKind::Yield,
        }
    }

    /// Request id the message answers or carries, if any
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Message::Error { request, .. }
            | Message::Publish { request, .. }
            | Message::Published { request, .. }
            | Message::Subscribe { request, .. }
            | Message::Subscribed { request, .. }
            | Message::Unsubscribe { request, .. }
            | Message::Unsubscribed { request }
            | Message::Call { request, .. }
            | Message::Cancel { request, .. }
            | Message::Result { request, .. }
            | Message::Register { request, .. }
            | Message::Registered { request, .. }
            | Message::Unregister { request, .. }
            | Message::Unregistered { request }
            | Message::Invocation { request, .. }
            | Message::Interrupt { request, .. }
            | Message::Yield { request, .. } => Some(*request),
            Message::Hello { .. }
            | Message::Welcome { .. }
            | Message::Abort { .. }
            | Message::Goodbye { .. }
            | Message::Event { .. } => None,
        }
    }

    /// ERROR reply for a failed request
    pub fn error(request_type: MessageKind, request: RequestId, err: &RoutingError) -> Self {
        Message::Error {
            request_type,
            request,
            details: Map::new(),
            error: err.uri().to_string(),
            payload: Payload::args(err.args()),
        }
    }

    /// ERROR reply with an application error URI and payload
    pub fn error_with(
        request_type: MessageKind,
        request: RequestId,
        error: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Message::Error {
            request_type,
            request,
            details: Map::new(),
            error: error.into(),
            payload,
        }
    }

    pub fn abort(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Message::Abort {
            details: CloseDetails::message(message),
            reason: reason.into(),
        }
    }

    pub fn goodbye(reason: impl Into<String>) -> Self {
        Message::Goodbye {
            details: CloseDetails::default(),
            reason: reason.into(),
        }
    }
}

/// Close reasons used by the router
pub mod close {
    pub const NORMAL: &str = "wamp.close.normal";
    pub const GOODBYE_AND_OUT: &str = "wamp.close.goodbye_and_out";
    pub const SYSTEM_SHUTDOWN: &str = "wamp.close.system_shutdown";
    pub const KILLED: &str = "wamp.close.killed";
    pub const CLOSE_REALM: &str = "wamp.close.close_realm";
}
