//! Attaching and detaching sessions

use junction_core::{router_roles, HelloDetails, Message, RoutingError, WelcomeDetails};
use std::sync::Arc;
use tracing::{debug, info};

use crate::auth::Authenticator;
use crate::registry::RealmRegistry;
use crate::session::SessionDetails;
use crate::transport::Transport;

pub struct SessionManager {
    registry: Arc<RealmRegistry>,
    authenticator: Arc<dyn Authenticator>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("registry", &self.registry)
            .finish()
    }
}

impl SessionManager {
    pub fn new(registry: Arc<RealmRegistry>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            registry,
            authenticator,
        }
    }

    pub fn registry(&self) -> &Arc<RealmRegistry> {
        &self.registry
    }

    /// Resolve the realm, authenticate, add the session, send WELCOME and
    /// announce the join
    pub async fn attach(
        &self,
        realm: &str,
        hello: &HelloDetails,
        transport: &Arc<dyn Transport>,
    ) -> Result<SessionDetails, RoutingError> {
        let realm = self.registry.resolve(realm)?;
        let principal = self.authenticator.authenticate(realm.name(), hello).await?;
        let details = realm.join(principal, transport);

        let welcome = Message::Welcome {
            session: details.session,
            details: WelcomeDetails {
                realm: details.realm.clone(),
                authid: details.authid.clone(),
                authrole: details.authrole.clone(),
                authmethod: details.authmethod.clone(),
                roles: router_roles(),
            },
        };
        if !transport.send(welcome).await {
            debug!(session = details.session, "peer gone before WELCOME");
        }
        realm.announce_join(&details).await;

        info!(
            realm = %details.realm,
            session = details.session,
            peer = %details.transport,
            "session attached"
        );
        Ok(details)
    }

    /// Detach a session from its realm. Returns `false` if it was already gone.
    pub async fn detach(&self, session: &SessionDetails) -> bool {
        match self.registry.get(&session.realm) {
            Some(realm) => realm.leave(session.session).await,
            None => false,
        }
    }

    /// Whether the session is still a member of its realm
    pub fn is_attached(&self, session: &SessionDetails) -> bool {
        self.registry
            .get(&session.realm)
            .map(|realm| realm.has_session(session.session))
            .unwrap_or(false)
    }
}
