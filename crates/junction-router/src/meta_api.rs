//! Meta procedures answered by the realm itself
//!
//! Calls to `wamp.session.*`, `wamp.subscription.*` and
//! `wamp.registration.*` never reach a callee. They read the realm tables
//! and return a plain payload.

use junction_core::uri;
use junction_core::{close, MatchPolicy, Payload, PublishOptions, RoutingError, SessionId};
use serde::Serialize;
use serde_json::{json, Value};

use crate::auth::Action;
use crate::realm::Realm;
use crate::session::{SessionDetails, Testament, SCOPE_DESTROYED, SCOPE_DETACHED};

pub mod procedures {
    pub const SESSION_COUNT: &str = "wamp.session.count";
    pub const SESSION_LIST: &str = "wamp.session.list";
    pub const SESSION_GET: &str = "wamp.session.get";
    pub const SESSION_KILL: &str = "wamp.session.kill";
    pub const SESSION_ADD_TESTAMENT: &str = "wamp.session.add_testament";
    pub const SESSION_FLUSH_TESTAMENTS: &str = "wamp.session.flush_testaments";
    pub const SUBSCRIPTION_LOOKUP: &str = "wamp.subscription.lookup";
    pub const SUBSCRIPTION_MATCH: &str = "wamp.subscription.match";
    pub const SUBSCRIPTION_GET: &str = "wamp.subscription.get";
    pub const SUBSCRIPTION_LIST: &str = "wamp.subscription.list";
    pub const SUBSCRIPTION_LIST_SUBSCRIBERS: &str = "wamp.subscription.list_subscribers";
    pub const SUBSCRIPTION_COUNT_SUBSCRIBERS: &str = "wamp.subscription.count_subscribers";
    pub const REGISTRATION_LOOKUP: &str = "wamp.registration.lookup";
    pub const REGISTRATION_MATCH: &str = "wamp.registration.match";
    pub const REGISTRATION_GET: &str = "wamp.registration.get";
    pub const REGISTRATION_LIST: &str = "wamp.registration.list";
    pub const REGISTRATION_LIST_CALLEES: &str = "wamp.registration.list_callees";
    pub const REGISTRATION_COUNT_CALLEES: &str = "wamp.registration.count_callees";
}

fn value<T: Serialize>(item: &T) -> Result<Value, RoutingError> {
    serde_json::to_value(item).map_err(|e| RoutingError::InvalidArgument(e.to_string()))
}

fn arg_id(payload: &Payload, index: usize) -> Result<u64, RoutingError> {
    payload
        .args
        .get(index)
        .and_then(Value::as_u64)
        .ok_or_else(|| RoutingError::InvalidArgument(format!("argument {} must be an id", index)))
}

fn arg_str(payload: &Payload, index: usize) -> Result<&str, RoutingError> {
    payload
        .args
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            RoutingError::InvalidArgument(format!("argument {} must be a string", index))
        })
}

/// `{"match": ...}` options dictionary at `index`, exact when absent
fn arg_match(payload: &Payload, index: usize) -> Result<MatchPolicy, RoutingError> {
    match payload.args.get(index).and_then(|v| v.get("match")) {
        None | Some(Value::Null) => Ok(MatchPolicy::Exact),
        Some(policy) => serde_json::from_value(policy.clone())
            .map_err(|_| RoutingError::InvalidArgument(format!("invalid match policy {}", policy))),
    }
}

/// Optional list of authroles at `index`
fn arg_roles(payload: &Payload, index: usize) -> Result<Option<Vec<String>>, RoutingError> {
    match payload.args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(roles) => serde_json::from_value(roles.clone())
            .map(Some)
            .map_err(|_| RoutingError::InvalidArgument("authroles must be a list of strings".into())),
    }
}

fn kwarg_str<'a>(payload: &'a Payload, key: &str) -> Option<&'a str> {
    payload.kwargs.get(key).and_then(Value::as_str)
}

fn testament_scope(payload: &Payload) -> Result<&str, RoutingError> {
    match kwarg_str(payload, "scope") {
        None => Ok(SCOPE_DESTROYED),
        Some(scope) if scope == SCOPE_DESTROYED || scope == SCOPE_DETACHED => Ok(scope),
        Some(other) => Err(RoutingError::InvalidArgument(format!(
            "scope must be '{}' or '{}', got '{}'",
            SCOPE_DETACHED, SCOPE_DESTROYED, other
        ))),
    }
}

fn sessions_with_roles(realm: &Realm, roles: Option<&[String]>) -> Vec<SessionId> {
    realm
        .session_details()
        .into_iter()
        .filter(|d| roles.map_or(true, |roles| roles.iter().any(|r| *r == d.authrole)))
        .map(|d| d.session)
        .collect()
}

fn id_or_null(id: Option<u64>) -> Value {
    id.map(Value::from).unwrap_or(Value::Null)
}

/// Answer one meta procedure call
pub async fn handle(
    realm: &Realm,
    caller: &SessionDetails,
    procedure: &str,
    payload: &Payload,
) -> Result<Payload, RoutingError> {
    use procedures::*;

    let result = match procedure {
        SESSION_COUNT => {
            let roles = arg_roles(payload, 0)?;
            json!(sessions_with_roles(realm, roles.as_deref()).len())
        }
        SESSION_LIST => {
            let roles = arg_roles(payload, 0)?;
            json!(sessions_with_roles(realm, roles.as_deref()))
        }
        SESSION_GET => {
            let id = arg_id(payload, 0)?;
            let session = realm.session(id).ok_or(RoutingError::NoSuchSession(id))?;
            value(session.details())?
        }
        SESSION_KILL => {
            let id = arg_id(payload, 0)?;
            if id == caller.session {
                return Err(RoutingError::InvalidArgument(
                    "a session cannot kill itself".into(),
                ));
            }
            let reason = kwarg_str(payload, "reason").unwrap_or(close::KILLED);
            if uri::validate_concrete(reason).is_err() {
                return Err(RoutingError::InvalidUri(reason.to_string()));
            }
            let message = kwarg_str(payload, "message").map(str::to_string);
            realm.kill_session(id, reason, message).await?;
            Value::Null
        }
        SESSION_ADD_TESTAMENT => {
            let topic = arg_str(payload, 0)?;
            uri::validate_concrete(topic)?;
            if uri::is_reserved(topic) {
                return Err(RoutingError::not_authorized(Action::Publish.as_str(), topic));
            }

            let args = match payload.args.get(1) {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items.clone(),
                Some(_) => {
                    return Err(RoutingError::InvalidArgument(
                        "testament args must be a list".into(),
                    ))
                }
            };
            let kwargs = match payload.args.get(2) {
                None | Some(Value::Null) => Default::default(),
                Some(Value::Object(map)) => map.clone(),
                Some(_) => {
                    return Err(RoutingError::InvalidArgument(
                        "testament kwargs must be a dictionary".into(),
                    ))
                }
            };
            let mut options: PublishOptions = match payload.kwargs.get("publish_options") {
                None | Some(Value::Null) => PublishOptions::default(),
                Some(options) => serde_json::from_value(options.clone()).map_err(|e| {
                    RoutingError::InvalidArgument(format!("invalid publish_options: {}", e))
                })?,
            };
            let scope = testament_scope(payload)?;
            if realm.authorize(caller, Action::Publish, topic).await? {
                options.disclose_me = true;
            }

            let session = realm
                .session(caller.session)
                .ok_or(RoutingError::NoSuchSession(caller.session))?;
            session.add_testament(
                scope,
                Testament {
                    topic: topic.to_string(),
                    payload: Payload::new(args, kwargs),
                    options,
                },
            );
            Value::Null
        }
        SESSION_FLUSH_TESTAMENTS => {
            let scope = testament_scope(payload)?;
            let session = realm
                .session(caller.session)
                .ok_or(RoutingError::NoSuchSession(caller.session))?;
            json!(session.flush_testaments(scope))
        }

        SUBSCRIPTION_LOOKUP => {
            let topic = arg_str(payload, 0)?;
            let policy = arg_match(payload, 1)?;
            id_or_null(realm.broker().lookup(topic, policy))
        }
        SUBSCRIPTION_MATCH => {
            let topic = arg_str(payload, 0)?;
            let ids = realm.broker().match_topic(topic);
            if ids.is_empty() {
                Value::Null
            } else {
                json!(ids)
            }
        }
        SUBSCRIPTION_GET => {
            let id = arg_id(payload, 0)?;
            let info = realm
                .broker()
                .get(id)
                .ok_or(RoutingError::NoSuchSubscription(id))?;
            value(&info)?
        }
        SUBSCRIPTION_LIST => value(&realm.broker().list())?,
        SUBSCRIPTION_LIST_SUBSCRIBERS => {
            let id = arg_id(payload, 0)?;
            let subscribers = realm
                .broker()
                .subscribers(id)
                .ok_or(RoutingError::NoSuchSubscription(id))?;
            json!(subscribers)
        }
        SUBSCRIPTION_COUNT_SUBSCRIBERS => {
            let id = arg_id(payload, 0)?;
            let subscribers = realm
                .broker()
                .subscribers(id)
                .ok_or(RoutingError::NoSuchSubscription(id))?;
            json!(subscribers.len())
        }

        REGISTRATION_LOOKUP => {
            let procedure = arg_str(payload, 0)?;
            let policy = arg_match(payload, 1)?;
            id_or_null(realm.dealer().lookup(procedure, policy))
        }
        REGISTRATION_MATCH => {
            let procedure = arg_str(payload, 0)?;
            id_or_null(realm.dealer().match_procedure(procedure))
        }
        REGISTRATION_GET => {
            let id = arg_id(payload, 0)?;
            let info = realm
                .dealer()
                .get(id)
                .ok_or(RoutingError::NoSuchRegistration(id))?;
            value(&info)?
        }
        REGISTRATION_LIST => value(&realm.dealer().list())?,
        REGISTRATION_LIST_CALLEES => {
            let id = arg_id(payload, 0)?;
            let callees = realm
                .dealer()
                .callees(id)
                .ok_or(RoutingError::NoSuchRegistration(id))?;
            json!(callees)
        }
        REGISTRATION_COUNT_CALLEES => {
            let id = arg_id(payload, 0)?;
            let callees = realm
                .dealer()
                .callees(id)
                .ok_or(RoutingError::NoSuchRegistration(id))?;
            json!(callees.len())
        }

        _ => return Err(RoutingError::NoSuchProcedure(procedure.to_string())),
    };

    Ok(if result.is_null() {
        Payload::default()
    } else {
        Payload::single(result)
    })
}
