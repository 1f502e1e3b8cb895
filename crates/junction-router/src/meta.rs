//! Meta events
//!
//! Lifecycle events the realm publishes on the reserved `wamp.` namespace.
//! They travel through the ordinary broker path with no publisher.

use junction_core::{Payload, RegistrationId, SessionId, SubscriptionId};
use serde_json::{json, Value};

use crate::broker::SubscriptionInfo;
use crate::dealer::RegistrationInfo;
use crate::session::SessionDetails;

pub mod topics {
    pub const SESSION_ON_JOIN: &str = "wamp.session.on_join";
    pub const SESSION_ON_LEAVE: &str = "wamp.session.on_leave";
    pub const SUBSCRIPTION_ON_CREATE: &str = "wamp.subscription.on_create";
    pub const SUBSCRIPTION_ON_SUBSCRIBE: &str = "wamp.subscription.on_subscribe";
    pub const SUBSCRIPTION_ON_UNSUBSCRIBE: &str = "wamp.subscription.on_unsubscribe";
    pub const SUBSCRIPTION_ON_DELETE: &str = "wamp.subscription.on_delete";
    pub const REGISTRATION_ON_CREATE: &str = "wamp.registration.on_create";
    pub const REGISTRATION_ON_REGISTER: &str = "wamp.registration.on_register";
    pub const REGISTRATION_ON_UNREGISTER: &str = "wamp.registration.on_unregister";
    pub const REGISTRATION_ON_DELETE: &str = "wamp.registration.on_delete";
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetaEvent {
    SessionJoin(SessionDetails),
    SessionLeave {
        session: SessionId,
        authid: String,
        authrole: String,
    },
    SubscriptionCreate {
        session: SessionId,
        info: SubscriptionInfo,
    },
    SubscriptionSubscribe {
        session: SessionId,
        subscription: SubscriptionId,
    },
    SubscriptionUnsubscribe {
        session: SessionId,
        subscription: SubscriptionId,
    },
    SubscriptionDelete {
        session: SessionId,
        subscription: SubscriptionId,
    },
    RegistrationCreate {
        session: SessionId,
        info: RegistrationInfo,
    },
    RegistrationRegister {
        session: SessionId,
        registration: RegistrationId,
    },
    RegistrationUnregister {
        session: SessionId,
        registration: RegistrationId,
    },
    RegistrationDelete {
        session: SessionId,
        registration: RegistrationId,
    },
}

impl MetaEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            MetaEvent::SessionJoin(_) => topics::SESSION_ON_JOIN,
            MetaEvent::SessionLeave { .. } => topics::SESSION_ON_LEAVE,
            MetaEvent::SubscriptionCreate { .. } => topics::SUBSCRIPTION_ON_CREATE,
            MetaEvent::SubscriptionSubscribe { .. } => topics::SUBSCRIPTION_ON_SUBSCRIBE,
            MetaEvent::SubscriptionUnsubscribe { .. } => topics::SUBSCRIPTION_ON_UNSUBSCRIBE,
            MetaEvent::SubscriptionDelete { .. } => topics::SUBSCRIPTION_ON_DELETE,
            MetaEvent::RegistrationCreate { .. } => topics::REGISTRATION_ON_CREATE,
            MetaEvent::RegistrationRegister { .. } => topics::REGISTRATION_ON_REGISTER,
            MetaEvent::RegistrationUnregister { .. } => topics::REGISTRATION_ON_UNREGISTER,
            MetaEvent::RegistrationDelete { .. } => topics::REGISTRATION_ON_DELETE,
        }
    }

    pub fn payload(&self) -> Payload {
        let args = match self {
            MetaEvent::SessionJoin(details) => {
                vec![serde_json::to_value(details).unwrap_or(Value::Null)]
            }
            MetaEvent::SessionLeave {
                session,
                authid,
                authrole,
            } => vec![json!(session), json!(authid), json!(authrole)],
            MetaEvent::SubscriptionCreate { session, info } => vec![
                json!(session),
                serde_json::to_value(info).unwrap_or(Value::Null),
            ],
            MetaEvent::RegistrationCreate { session, info } => vec![
                json!(session),
                serde_json::to_value(info).unwrap_or(Value::Null),
            ],
            MetaEvent::SubscriptionSubscribe {
                session,
                subscription,
            }
            | MetaEvent::SubscriptionUnsubscribe {
                session,
                subscription,
            }
            | MetaEvent::SubscriptionDelete {
                session,
                subscription,
            } => vec![json!(session), json!(subscription)],
            MetaEvent::RegistrationRegister {
                session,
                registration,
            }
            | MetaEvent::RegistrationUnregister {
                session,
                registration,
            }
            | MetaEvent::RegistrationDelete {
                session,
                registration,
            } => vec![json!(session), json!(registration)],
        };
        Payload::args(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use junction_core::MatchPolicy;

    #[test]
    fn test_topics_are_reserved() {
        let event = MetaEvent::SubscriptionDelete {
            session: 1,
            subscription: 2,
        };
        assert!(junction_core::uri::is_reserved(event.topic()));
        assert_eq!(event.payload().args, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_create_payload_describes_entry() {
        let event = MetaEvent::SubscriptionCreate {
            session: 5,
            info: SubscriptionInfo {
                id: 9,
                created: Utc::now(),
                uri: "com.example".to_string(),
                match_policy: MatchPolicy::Prefix,
            },
        };
        let payload = event.payload();
        assert_eq!(payload.args[0], json!(5));
        assert_eq!(payload.args[1]["id"], json!(9));
        assert_eq!(payload.args[1]["match"], json!("prefix"));
        assert_eq!(payload.args[1]["uri"], json!("com.example"));
    }

    #[test]
    fn test_join_payload_is_session_details() {
        let details = SessionDetails::for_test(3, "realm1", "alice", "user");
        let payload = MetaEvent::SessionJoin(details).payload();
        assert_eq!(payload.args[0]["session"], json!(3));
        assert_eq!(payload.args[0]["authid"], json!("alice"));
    }
}
