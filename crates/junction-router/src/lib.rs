//! Junction router
//!
//! Realm-scoped routing core: a broker for publish/subscribe, a dealer for
//! routed calls, session management, authorization and meta events.
//!
//! # Layout
//!
//! - [`registry`] maps realm names to [`realm::Realm`]s
//! - [`realm`] owns the session table, [`broker`] and [`dealer`] of one realm
//! - [`session_manager`] attaches and detaches sessions
//! - [`router_session`] runs the per-connection protocol state machine
//! - [`auth`] holds the authentication and authorization gateways
//! - [`meta`] and [`meta_api`] implement the reserved `wamp.` namespace

pub mod auth;
pub mod broker;
pub mod config;
pub mod dealer;
pub mod matcher;
pub mod meta;
pub mod meta_api;
pub mod realm;
pub mod registry;
pub mod router;
pub mod router_session;
pub mod session;
pub mod session_manager;
pub mod telemetry;
pub mod transport;

pub use auth::{
    Action, AllowAllAuthorizer, AnonymousAuthenticator, Authenticator, Authorization,
    Authorizer, ConfigAuthenticator, Principal, RoleAuthorizer,
};
pub use broker::{Broker, SubscriptionInfo};
pub use config::{
    AllowedActions, ConfigError, Disclosure, Permission, PrincipalConfig, RealmConfig, RoleConfig,
    RouterConfig,
};
pub use dealer::{Dealer, RegistrationInfo};
pub use meta::MetaEvent;
pub use realm::{CallOutcome, Realm};
pub use registry::RealmRegistry;
pub use router::Router;
pub use router_session::{Inbound, RouterSession, SessionInbox};
pub use session::{SessionDetails, SessionState};
pub use session_manager::SessionManager;
pub use telemetry::RealmTelemetry;
pub use transport::Transport;
