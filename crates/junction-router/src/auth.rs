//! Authentication and authorization gateway
//!
//! The router consults an [`Authenticator`] when a session says HELLO and an
//! [`Authorizer`] before every routing action. Both are async so an
//! implementation may call out to an external service; only the awaiting
//! session is suspended meanwhile.

use async_trait::async_trait;
use junction_core::{HelloDetails, RoutingError};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::config::{Permission, RealmConfig, RouterConfig};
use crate::matcher::UriTable;
use crate::session::SessionDetails;

/// Role that is allowed every action
pub const TRUSTED_ROLE: &str = "trusted";

/// Role given to sessions of realms that have no configuration
pub const ANONYMOUS_ROLE: &str = "anonymous";

/// Routing actions subject to authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Publish,
    Subscribe,
    Call,
    Register,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Publish => "publish",
            Action::Subscribe => "subscribe",
            Action::Call => "call",
            Action::Register => "register",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an authorization request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    /// Allowed; `disclose` asks the router to reveal the actor's identity
    /// to the receiving side (caller to callee, publisher to subscriber)
    Allow { disclose: bool },
    Deny,
}

impl Authorization {
    pub fn allow() -> Self {
        Authorization::Allow { disclose: false }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Authorization::Allow { .. })
    }
}

/// Identity established by authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub authid: String,
    pub authrole: String,
    pub authmethod: String,
}

impl Principal {
    pub fn new(
        authid: impl Into<String>,
        authrole: impl Into<String>,
        authmethod: impl Into<String>,
    ) -> Self {
        Self {
            authid: authid.into(),
            authrole: authrole.into(),
            authmethod: authmethod.into(),
        }
    }

    /// Anonymous principal with a generated authid
    pub fn anonymous(authrole: impl Into<String>) -> Self {
        Self::new(
            uuid::Uuid::new_v4().simple().to_string(),
            authrole,
            "anonymous",
        )
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Decide who a joining session is, or refuse it
    async fn authenticate(
        &self,
        realm: &str,
        details: &HelloDetails,
    ) -> Result<Principal, RoutingError>;
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Decide whether `session` may perform `action` on `uri`
    async fn authorize(&self, session: &SessionDetails, action: Action, uri: &str)
        -> Authorization;
}

/// Accepts every HELLO as anonymous
#[derive(Debug, Default, Clone)]
pub struct AnonymousAuthenticator;

#[async_trait]
impl Authenticator for AnonymousAuthenticator {
    async fn authenticate(
        &self,
        _realm: &str,
        _details: &HelloDetails,
    ) -> Result<Principal, RoutingError> {
        Ok(Principal::anonymous(ANONYMOUS_ROLE))
    }
}

#[derive(Debug, Clone)]
struct TicketEntry {
    ticket: String,
    role: String,
}

#[derive(Debug, Clone, Default)]
struct RealmAuth {
    anonymous_role: Option<String>,
    tickets: HashMap<String, TicketEntry>,
}

/// Ticket and anonymous authentication from static configuration
///
/// Methods are tried in the order `ticket`, `anonymous`. Realms absent from
/// the configuration accept anonymous sessions.
#[derive(Debug, Clone, Default)]
pub struct ConfigAuthenticator {
    realms: HashMap<String, RealmAuth>,
}

impl ConfigAuthenticator {
    pub fn new(config: &RouterConfig) -> Self {
        let realms = config
            .realms
            .iter()
            .map(|realm| (realm.name.clone(), Self::realm_auth(realm)))
            .collect();
        Self { realms }
    }

    fn realm_auth(realm: &RealmConfig) -> RealmAuth {
        RealmAuth {
            anonymous_role: realm.anonymous_role.clone(),
            tickets: realm
                .principals
                .iter()
                .map(|p| {
                    (
                        p.authid.clone(),
                        TicketEntry {
                            ticket: p.ticket.clone(),
                            role: p.role.clone(),
                        },
                    )
                })
                .collect(),
        }
    }
}

#[async_trait]
impl Authenticator for ConfigAuthenticator {
    async fn authenticate(
        &self,
        realm: &str,
        details: &HelloDetails,
    ) -> Result<Principal, RoutingError> {
        let Some(auth) = self.realms.get(realm) else {
            return Ok(Principal::anonymous(ANONYMOUS_ROLE));
        };

        let wants = |method: &str| {
            details.authmethods.is_empty() || details.authmethods.iter().any(|m| m == method)
        };

        if wants("ticket") {
            if let Some(authid) = details.authid.as_deref() {
                if let Some(entry) = auth.tickets.get(authid) {
                    let presented = details.authextra.get("ticket").and_then(Value::as_str);
                    return if presented == Some(entry.ticket.as_str()) {
                        Ok(Principal::new(authid, entry.role.clone(), "ticket"))
                    } else {
                        Err(RoutingError::AuthenticationDenied(format!(
                            "invalid ticket for '{}'",
                            authid
                        )))
                    };
                }
            }
        }

        if wants("anonymous") {
            if let Some(role) = &auth.anonymous_role {
                return Ok(Principal::anonymous(role.clone()));
            }
        }

        Err(RoutingError::AuthenticationDenied(format!(
            "no acceptable authentication method for realm '{}'",
            realm
        )))
    }
}

/// Allows everything, never discloses
#[derive(Debug, Default, Clone)]
pub struct AllowAllAuthorizer;

#[async_trait]
impl Authorizer for AllowAllAuthorizer {
    async fn authorize(
        &self,
        _session: &SessionDetails,
        _action: Action,
        _uri: &str,
    ) -> Authorization {
        Authorization::allow()
    }
}

/// Role based permissions from static configuration
///
/// Each role's permissions are indexed like registrations; the permission
/// governing a URI is the exact one, else the longest prefix, else the most
/// specific wildcard. Realms absent from the configuration allow everything.
#[derive(Debug, Default)]
pub struct RoleAuthorizer {
    realms: HashMap<String, HashMap<String, UriTable<Permission>>>,
}

impl RoleAuthorizer {
    pub fn new(config: &RouterConfig) -> Self {
        let realms = config
            .realms
            .iter()
            .map(|realm| {
                let roles = realm
                    .roles
                    .iter()
                    .map(|role| {
                        let mut table = UriTable::new();
                        for permission in &role.permissions {
                            table.insert(
                                &permission.uri,
                                permission.match_policy,
                                permission.clone(),
                            );
                        }
                        (role.name.clone(), table)
                    })
                    .collect();
                (realm.name.clone(), roles)
            })
            .collect();
        Self { realms }
    }
}

#[async_trait]
impl Authorizer for RoleAuthorizer {
    async fn authorize(
        &self,
        session: &SessionDetails,
        action: Action,
        uri: &str,
    ) -> Authorization {
        let Some(roles) = self.realms.get(&session.realm) else {
            return Authorization::allow();
        };
        if session.authrole == TRUSTED_ROLE {
            return Authorization::allow();
        }
        let Some(permission) = roles
            .get(&session.authrole)
            .and_then(|table| table.best_match(uri))
            .map(|m| m.value)
        else {
            return Authorization::Deny;
        };

        let (allowed, disclose) = match action {
            Action::Call => (permission.allow.call, permission.disclose.caller),
            Action::Register => (permission.allow.register, false),
            Action::Publish => (permission.allow.publish, permission.disclose.publisher),
            Action::Subscribe => (permission.allow.subscribe, false),
        };

        if allowed {
            Authorization::Allow { disclose }
        } else {
            Authorization::Deny
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AllowedActions, Disclosure, PrincipalConfig, RoleConfig};
    use junction_core::MatchPolicy;

    fn config() -> RouterConfig {
        RouterConfig::default().with_realm(
            RealmConfig::new("realm1")
                .with_anonymous_role("public")
                .with_principal(PrincipalConfig::new("joe", "secret", "backend"))
                .with_role(RoleConfig::new("public").with_permission(
                    Permission::new("com.example", MatchPolicy::Prefix).with_allow(
                        AllowedActions {
                            subscribe: true,
                            call: true,
                            ..Default::default()
                        },
                    ),
                ))
                .with_role(
                    RoleConfig::new("backend").with_permission(
                        Permission::new("com.example", MatchPolicy::Prefix)
                            .allow_all()
                            .with_disclose(Disclosure {
                                caller: true,
                                publisher: false,
                            }),
                    ),
                ),
        )
    }

    fn session(realm: &str, role: &str) -> SessionDetails {
        SessionDetails::for_test(1, realm, "someone", role)
    }

    #[tokio::test]
    async fn test_ticket_then_anonymous() {
        let auth = ConfigAuthenticator::new(&config());

        let hello = HelloDetails::default().with_authid("joe").with_ticket("secret");
        let principal = auth.authenticate("realm1", &hello).await.unwrap();
        assert_eq!(principal.authid, "joe");
        assert_eq!(principal.authrole, "backend");
        assert_eq!(principal.authmethod, "ticket");

        let hello = HelloDetails::default().with_authid("joe").with_ticket("wrong");
        assert!(matches!(
            auth.authenticate("realm1", &hello).await,
            Err(RoutingError::AuthenticationDenied(_))
        ));

        let principal = auth
            .authenticate("realm1", &HelloDetails::default())
            .await
            .unwrap();
        assert_eq!(principal.authrole, "public");
        assert_eq!(principal.authmethod, "anonymous");
    }

    #[tokio::test]
    async fn test_realm_without_anonymous_role_refuses() {
        let config = RouterConfig::default().with_realm(RealmConfig::new("locked"));
        let auth = ConfigAuthenticator::new(&config);
        assert!(auth
            .authenticate("locked", &HelloDetails::default())
            .await
            .is_err());

        // unconfigured realm falls back to anonymous
        let principal = auth
            .authenticate("elsewhere", &HelloDetails::default())
            .await
            .unwrap();
        assert_eq!(principal.authrole, ANONYMOUS_ROLE);
    }

    #[tokio::test]
    async fn test_role_authorizer() {
        let authz = RoleAuthorizer::new(&config());

        let public = session("realm1", "public");
        assert!(authz
            .authorize(&public, Action::Subscribe, "com.example.news")
            .await
            .is_allowed());
        assert_eq!(
            authz.authorize(&public, Action::Publish, "com.example.news").await,
            Authorization::Deny
        );
        assert_eq!(
            authz.authorize(&public, Action::Call, "org.other").await,
            Authorization::Deny
        );

        let backend = session("realm1", "backend");
        assert_eq!(
            authz.authorize(&backend, Action::Call, "com.example.add").await,
            Authorization::Allow { disclose: true }
        );

        let trusted = session("realm1", TRUSTED_ROLE);
        assert!(authz
            .authorize(&trusted, Action::Register, "anything.at.all")
            .await
            .is_allowed());

        let stranger = session("unconfigured", "whoever");
        assert!(authz
            .authorize(&stranger, Action::Publish, "com.x")
            .await
            .is_allowed());
    }
}
