//! Router configuration
//!
//! Plain serde structs. The hosting process builds them (from a file, the
//! environment or code) and hands them to [`Router::from_config`].
//!
//! [`Router::from_config`]: crate::Router::from_config

use junction_core::uri::{self, MatchPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Realm '{0}' is configured more than once")]
    DuplicateRealm(String),

    #[error("Invalid realm name: '{0}'")]
    InvalidRealmName(String),

    #[error("Invalid permission URI '{uri}' in role '{role}'")]
    InvalidPermission { role: String, uri: String },

    #[error("Principal '{authid}' refers to unknown role '{role}'")]
    UnknownRole { authid: String, role: String },

    #[error("Inbound queue size must be positive")]
    ZeroQueueSize,

    #[error("Failed to create realm: {0}")]
    Realm(#[from] junction_core::RoutingError),
}

/// Top level router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Realms created at startup
    #[serde(default)]
    pub realms: Vec<RealmConfig>,

    /// Create realms on first HELLO instead of answering no_such_realm
    #[serde(default = "default_true")]
    pub auto_create_realms: bool,

    /// Capacity of each session's inbound queue
    #[serde(default = "default_inbound_queue_size")]
    pub inbound_queue_size: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            realms: Vec::new(),
            auto_create_realms: true,
            inbound_queue_size: default_inbound_queue_size(),
        }
    }
}

impl RouterConfig {
    pub fn with_realm(mut self, realm: RealmConfig) -> Self {
        self.realms.push(realm);
        self
    }

    pub fn with_auto_create(mut self, auto_create: bool) -> Self {
        self.auto_create_realms = auto_create;
        self
    }

    pub fn with_inbound_queue_size(mut self, size: usize) -> Self {
        self.inbound_queue_size = size;
        self
    }

    pub fn realm(&self, name: &str) -> Option<&RealmConfig> {
        self.realms.iter().find(|r| r.name == name)
    }

    /// Check names, URIs and role references
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inbound_queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize);
        }

        let mut seen = HashSet::new();
        for realm in &self.realms {
            if uri::validate_concrete(&realm.name).is_err() {
                return Err(ConfigError::InvalidRealmName(realm.name.clone()));
            }
            if !seen.insert(realm.name.as_str()) {
                return Err(ConfigError::DuplicateRealm(realm.name.clone()));
            }
            realm.validate()?;
        }
        Ok(())
    }
}

/// Per-realm configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealmConfig {
    pub name: String,

    /// Role given to anonymous sessions; anonymous HELLOs are refused when unset
    #[serde(default)]
    pub anonymous_role: Option<String>,

    #[serde(default)]
    pub principals: Vec<PrincipalConfig>,

    #[serde(default)]
    pub roles: Vec<RoleConfig>,
}

impl RealmConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_anonymous_role(mut self, role: impl Into<String>) -> Self {
        self.anonymous_role = Some(role.into());
        self
    }

    pub fn with_principal(mut self, principal: PrincipalConfig) -> Self {
        self.principals.push(principal);
        self
    }

    pub fn with_role(mut self, role: RoleConfig) -> Self {
        self.roles.push(role);
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for role in &self.roles {
            for permission in &role.permissions {
                if uri::validate(&permission.uri, permission.match_policy).is_err() {
                    return Err(ConfigError::InvalidPermission {
                        role: role.name.clone(),
                        uri: permission.uri.clone(),
                    });
                }
            }
        }

        // trusted is built in and needs no declaration
        let declared: HashSet<&str> = self
            .roles
            .iter()
            .map(|r| r.name.as_str())
            .chain(std::iter::once(crate::auth::TRUSTED_ROLE))
            .collect();
        for principal in &self.principals {
            if !declared.contains(principal.role.as_str()) {
                return Err(ConfigError::UnknownRole {
                    authid: principal.authid.clone(),
                    role: principal.role.clone(),
                });
            }
        }
        Ok(())
    }
}

/// A known principal and its shared secret
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalConfig {
    pub authid: String,
    pub ticket: String,
    pub role: String,
}

impl PrincipalConfig {
    pub fn new(
        authid: impl Into<String>,
        ticket: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            authid: authid.into(),
            ticket: ticket.into(),
            role: role.into(),
        }
    }
}

/// A role and its permissions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl RoleConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permissions: Vec::new(),
        }
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }
}

/// Actions allowed on a URI pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub uri: String,
    #[serde(rename = "match", default)]
    pub match_policy: MatchPolicy,
    #[serde(default)]
    pub allow: AllowedActions,
    #[serde(default)]
    pub disclose: Disclosure,
}

impl Permission {
    pub fn new(uri: impl Into<String>, match_policy: MatchPolicy) -> Self {
        Self {
            uri: uri.into(),
            match_policy,
            allow: AllowedActions::default(),
            disclose: Disclosure::default(),
        }
    }

    pub fn allow_all(mut self) -> Self {
        self.allow = AllowedActions {
            call: true,
            register: true,
            publish: true,
            subscribe: true,
        };
        self
    }

    pub fn with_allow(mut self, allow: AllowedActions) -> Self {
        self.allow = allow;
        self
    }

    pub fn with_disclose(mut self, disclose: Disclosure) -> Self {
        self.disclose = disclose;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllowedActions {
    pub call: bool,
    pub register: bool,
    pub publish: bool,
    pub subscribe: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Disclosure {
    pub caller: bool,
    pub publisher: bool,
}

fn default_true() -> bool {
    true
}

fn default_inbound_queue_size() -> usize {
    256
}
