//! Typed option and detail records
//!
//! Every protocol message carries an options or details dictionary. These
//! structs give them a shape; unknown keys are ignored on decode and unset
//! optional keys are omitted on encode.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::SessionId;
use crate::uri::MatchPolicy;

/// Keyword arguments of a payload
pub type Kwargs = Map<String, Value>;

/// Application payload carried by PUBLISH, EVENT, CALL, INVOCATION, YIELD,
/// RESULT and ERROR
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub args: Vec<Value>,
    pub kwargs: Kwargs,
}

impl Payload {
    pub fn new(args: Vec<Value>, kwargs: Kwargs) -> Self {
        Self { args, kwargs }
    }

    /// Payload with positional arguments only
    pub fn args(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Kwargs::new(),
        }
    }

    /// Payload with a single positional value
    pub fn single(value: Value) -> Self {
        Self::args(vec![value])
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_exact(policy: &MatchPolicy) -> bool {
    *policy == MatchPolicy::Exact
}

/// Options of a SUBSCRIBE
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscribeOptions {
    #[serde(rename = "match", skip_serializing_if = "is_exact")]
    pub match_policy: MatchPolicy,
}

impl SubscribeOptions {
    pub fn with_match(mut self, policy: MatchPolicy) -> Self {
        self.match_policy = policy;
        self
    }
}

/// Options of a PUBLISH
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishOptions {
    #[serde(skip_serializing_if = "is_false")]
    pub acknowledge: bool,
    /// Defaults to true when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_me: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eligible: Option<Vec<SessionId>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude_authid: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude_authrole: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eligible_authid: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eligible_authrole: Option<Vec<String>>,
    #[serde(skip_serializing_if = "is_false")]
    pub disclose_me: bool,
}

impl PublishOptions {
    pub fn excludes_publisher(&self) -> bool {
        self.exclude_me.unwrap_or(true)
    }

    pub fn with_acknowledge(mut self) -> Self {
        self.acknowledge = true;
        self
    }

    pub fn with_exclude_me(mut self, exclude_me: bool) -> Self {
        self.exclude_me = Some(exclude_me);
        self
    }

    pub fn with_exclude(mut self, sessions: Vec<SessionId>) -> Self {
        self.exclude = sessions;
        self
    }

    pub fn with_eligible(mut self, sessions: Vec<SessionId>) -> Self {
        self.eligible = Some(sessions);
        self
    }
}

/// Rule selecting a callee among the callees of one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationPolicy {
    #[default]
    Single,
    Roundrobin,
    Random,
    First,
    Last,
}

impl InvocationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationPolicy::Single => "single",
            InvocationPolicy::Roundrobin => "roundrobin",
            InvocationPolicy::Random => "random",
            InvocationPolicy::First => "first",
            InvocationPolicy::Last => "last",
        }
    }

    /// Whether more than one callee may share the registration
    pub fn is_shared(&self) -> bool {
        *self != InvocationPolicy::Single
    }
}

fn is_single(policy: &InvocationPolicy) -> bool {
    *policy == InvocationPolicy::Single
}

/// Options of a REGISTER
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterOptions {
    #[serde(rename = "match", skip_serializing_if = "is_exact")]
    pub match_policy: MatchPolicy,
    #[serde(skip_serializing_if = "is_single")]
    pub invoke: InvocationPolicy,
    #[serde(skip_serializing_if = "is_false")]
    pub disclose_caller: bool,
}

impl RegisterOptions {
    pub fn with_invoke(mut self, policy: InvocationPolicy) -> Self {
        self.invoke = policy;
        self
    }

    pub fn with_match(mut self, policy: MatchPolicy) -> Self {
        self.match_policy = policy;
        self
    }
}

/// Options of a CALL
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallOptions {
    /// Deadline in milliseconds, zero or absent means none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "is_false")]
    pub receive_progress: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub disclose_me: bool,
}

impl CallOptions {
    pub fn with_timeout(mut self, millis: u64) -> Self {
        self.timeout = Some(millis);
        self
    }

    pub fn with_receive_progress(mut self) -> Self {
        self.receive_progress = true;
        self
    }

    /// Effective deadline, ignoring a zero timeout
    pub fn deadline_ms(&self) -> Option<u64> {
        self.timeout.filter(|t| *t > 0)
    }
}

/// How a canceled call is torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelMode {
    /// Stop waiting; the callee is not told
    Skip,
    /// Interrupt the callee and wait for its error reply
    #[default]
    Kill,
    /// Interrupt the callee and answer the caller immediately
    KillNoWait,
}

impl CancelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelMode::Skip => "skip",
            CancelMode::Kill => "kill",
            CancelMode::KillNoWait => "killnowait",
        }
    }
}

/// Options of a CANCEL
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CancelOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<CancelMode>,
}

impl CancelOptions {
    pub fn with_mode(mode: CancelMode) -> Self {
        Self { mode: Some(mode) }
    }
}

/// Options of an INTERRUPT
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterruptOptions {
    pub mode: CancelMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Options of a YIELD
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YieldOptions {
    #[serde(skip_serializing_if = "is_false")]
    pub progress: bool,
}

/// Details of a RESULT
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultDetails {
    #[serde(skip_serializing_if = "is_false")]
    pub progress: bool,
}

/// Details of a HELLO
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelloDetails {
    pub roles: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authrole: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authmethods: Vec<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub authextra: Map<String, Value>,
}

impl HelloDetails {
    pub fn with_authid(mut self, authid: impl Into<String>) -> Self {
        self.authid = Some(authid.into());
        self
    }

    pub fn with_ticket(mut self, ticket: impl Into<String>) -> Self {
        self.authmethods.push("ticket".to_string());
        self.authextra
            .insert("ticket".to_string(), Value::String(ticket.into()));
        self
    }
}

/// Details of a WELCOME
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WelcomeDetails {
    pub realm: String,
    pub authid: String,
    pub authrole: String,
    pub authmethod: String,
    pub roles: Map<String, Value>,
}

/// Details of an EVENT
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher_authid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher_authrole: Option<String>,
    /// Concrete topic, set when the subscription is not exact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

/// Details of an INVOCATION
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_authid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_authrole: Option<String>,
    /// Concrete procedure, set when the registration is not exact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub procedure: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub receive_progress: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Details of GOODBYE and ABORT
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloseDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CloseDetails {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}

/// Roles the router announces in WELCOME
pub fn router_roles() -> Map<String, Value> {
    let mut roles = Map::new();
    roles.insert(
        "broker".to_string(),
        serde_json::json!({
            "features": {
                "pattern_based_subscription": true,
                "publisher_exclusion": true,
                "subscriber_blackwhite_listing": true,
                "publisher_identification": true,
                "subscription_meta_api": true,
                "session_meta_api": true
            }
        }),
    );
    roles.insert(
        "dealer".to_string(),
        serde_json::json!({
            "features": {
                "pattern_based_registration": true,
                "shared_registration": true,
                "call_canceling": true,
                "call_timeout": true,
                "progressive_call_results": true,
                "caller_identification": true,
                "registration_meta_api": true,
                "session_meta_api": true,
                "testament_meta_api": true
            }
        }),
    );
    roles
}
