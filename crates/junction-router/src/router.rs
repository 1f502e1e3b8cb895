//! Router entry point
//!
//! Ties the registry, the session manager and the authentication and
//! authorization gateways together. Transports call [`Router::spawn_session`]
//! once per connection and feed the returned inbox.

use junction_observability::logging::create_connection_span;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, Instrument};

use crate::auth::{
    AllowAllAuthorizer, AnonymousAuthenticator, Authenticator, Authorizer, ConfigAuthenticator,
    RoleAuthorizer,
};
use crate::config::{ConfigError, RouterConfig};
use crate::registry::RealmRegistry;
use crate::router_session::{RouterSession, SessionInbox};
use crate::session_manager::SessionManager;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct Router {
    config: Arc<RouterConfig>,
    manager: Arc<SessionManager>,
}

impl Default for Router {
    /// Anonymous sessions, no restrictions, realms created on demand
    fn default() -> Self {
        Self::new(
            RouterConfig::default(),
            Arc::new(AnonymousAuthenticator),
            Arc::new(AllowAllAuthorizer),
        )
    }
}

impl Router {
    pub fn new(
        config: RouterConfig,
        authenticator: Arc<dyn Authenticator>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        let registry = Arc::new(RealmRegistry::new(authorizer, config.auto_create_realms));
        Self {
            config: Arc::new(config),
            manager: Arc::new(SessionManager::new(registry, authenticator)),
        }
    }

    /// Router with ticket authentication and role permissions taken from the
    /// configuration; configured realms exist from the start
    pub fn from_config(config: RouterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let authenticator = Arc::new(ConfigAuthenticator::new(&config));
        let authorizer = Arc::new(RoleAuthorizer::new(&config));
        let names: Vec<String> = config.realms.iter().map(|r| r.name.clone()).collect();

        let router = Self::new(config, authenticator, authorizer);
        for name in &names {
            router.registry().create_realm(name)?;
        }
        info!(realms = names.len(), "router configured");
        Ok(router)
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RealmRegistry> {
        self.manager.registry()
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Start a session task for a new connection
    pub fn spawn_session(&self, transport: Arc<dyn Transport>) -> SessionInbox {
        let (tx, rx) = mpsc::channel(self.config.inbound_queue_size);
        let span = create_connection_span(&transport.peer());
        let session = RouterSession::new(Arc::clone(&self.manager), transport);
        tokio::spawn(session.run(rx).instrument(span));
        tx
    }

    /// Shut down every realm
    pub async fn shutdown(&self) {
        self.registry().shutdown().await;
        info!("router shut down");
    }
}
