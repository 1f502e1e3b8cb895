//! Realm registry
//!
//! Process-wide name to realm map. Realms are created explicitly, from
//! configuration, or on the first HELLO when auto creation is on.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use junction_core::{close, uri, RoutingError, SessionId};
use junction_observability::logging::create_realm_span;
use junction_observability::RealmMetrics;
use std::sync::Arc;
use tracing::{info, Instrument};

use crate::auth::Authorizer;
use crate::realm::Realm;
use crate::telemetry::RealmTelemetry;

pub struct RealmRegistry {
    realms: DashMap<String, Arc<Realm>>,
    authorizer: Arc<dyn Authorizer>,
    auto_create: bool,
}

impl std::fmt::Debug for RealmRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealmRegistry")
            .field("realms", &self.realm_names())
            .field("auto_create", &self.auto_create)
            .finish()
    }
}

impl RealmRegistry {
    pub fn new(authorizer: Arc<dyn Authorizer>, auto_create: bool) -> Self {
        Self {
            realms: DashMap::new(),
            authorizer,
            auto_create,
        }
    }

    pub fn auto_create(&self) -> bool {
        self.auto_create
    }

    pub fn len(&self) -> usize {
        self.realms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.realms.is_empty()
    }

    fn new_realm(&self, name: &str) -> Arc<Realm> {
        RealmMetrics::realm_created();
        info!(realm = %name, "realm created");
        Realm::new(name, Arc::clone(&self.authorizer))
    }

    pub fn create_realm(&self, name: &str) -> Result<Arc<Realm>, RoutingError> {
        uri::validate_concrete(name)?;
        match self.realms.entry(name.to_string()) {
            Entry::Occupied(_) => Err(RoutingError::RealmExists(name.to_string())),
            Entry::Vacant(entry) => {
                let realm = self.new_realm(name);
                entry.insert(Arc::clone(&realm));
                Ok(realm)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Realm>> {
        self.realms.get(name).map(|r| Arc::clone(r.value()))
    }

    /// Realm for a HELLO: existing, or newly created when auto creation is on
    pub fn resolve(&self, name: &str) -> Result<Arc<Realm>, RoutingError> {
        if let Some(realm) = self.get(name) {
            return Ok(realm);
        }
        if !self.auto_create || uri::validate_concrete(name).is_err() {
            return Err(RoutingError::NoSuchRealm(name.to_string()));
        }
        let realm = self
            .realms
            .entry(name.to_string())
            .or_insert_with(|| self.new_realm(name));
        Ok(Arc::clone(realm.value()))
    }

    /// Remove a realm that has no sessions
    pub fn destroy_realm(&self, name: &str) -> Result<(), RoutingError> {
        if self
            .realms
            .remove_if(name, |_, realm| realm.session_count() == 0)
            .is_some()
        {
            RealmMetrics::realm_destroyed();
            info!(realm = %name, "realm destroyed");
            return Ok(());
        }
        match self.get(name) {
            Some(realm) => Err(RoutingError::RealmNotEmpty {
                realm: name.to_string(),
                sessions: realm.session_count(),
            }),
            None => Err(RoutingError::NoSuchRealm(name.to_string())),
        }
    }

    /// Kill every session of a realm, then remove it
    pub async fn shutdown_realm(&self, name: &str) -> Result<(), RoutingError> {
        let (_, realm) = self
            .realms
            .remove(name)
            .ok_or_else(|| RoutingError::NoSuchRealm(name.to_string()))?;
        realm
            .shutdown(close::SYSTEM_SHUTDOWN)
            .instrument(create_realm_span(name))
            .await;
        RealmMetrics::realm_destroyed();
        Ok(())
    }

    /// Shut down all realms
    pub async fn shutdown(&self) {
        for name in self.realm_names() {
            let _ = self.shutdown_realm(&name).await;
        }
    }

    pub async fn kill_session(
        &self,
        realm: &str,
        session: SessionId,
        message: Option<String>,
    ) -> Result<(), RoutingError> {
        let realm = self
            .get(realm)
            .ok_or_else(|| RoutingError::NoSuchRealm(realm.to_string()))?;
        realm.kill_session(session, close::KILLED, message).await
    }

    pub fn telemetry(&self, name: &str) -> Result<RealmTelemetry, RoutingError> {
        self.get(name)
            .map(|realm| realm.telemetry())
            .ok_or_else(|| RoutingError::NoSuchRealm(name.to_string()))
    }

    /// Telemetry of every realm, ordered by name
    pub fn telemetry_all(&self) -> Vec<RealmTelemetry> {
        let mut all: Vec<RealmTelemetry> = self.realms.iter().map(|r| r.telemetry()).collect();
        all.sort_by(|a, b| a.realm.cmp(&b.realm));
        all
    }

    pub fn realm_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.realms.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowAllAuthorizer;

    fn registry(auto_create: bool) -> RealmRegistry {
        RealmRegistry::new(Arc::new(AllowAllAuthorizer), auto_create)
    }

    #[test]
    fn test_create_and_duplicate() {
        let registry = registry(false);
        registry.create_realm("realm1").unwrap();
        assert_eq!(
            registry.create_realm("realm1").unwrap_err(),
            RoutingError::RealmExists("realm1".to_string())
        );
        assert!(matches!(
            registry.create_realm("bad..name"),
            Err(RoutingError::InvalidUri(_))
        ));
        assert_eq!(registry.realm_names(), vec!["realm1".to_string()]);
    }

    #[test]
    fn test_resolve_respects_auto_create() {
        let strict = registry(false);
        assert_eq!(
            strict.resolve("realm1").unwrap_err(),
            RoutingError::NoSuchRealm("realm1".to_string())
        );

        let lenient = registry(true);
        let first = lenient.resolve("realm1").unwrap();
        let second = lenient.resolve("realm1").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(lenient.len(), 1);
    }

    #[test]
    fn test_destroy_empty_realm() {
        let registry = registry(false);
        registry.create_realm("realm1").unwrap();
        registry.destroy_realm("realm1").unwrap();
        assert!(registry.get("realm1").is_none());
        assert_eq!(
            registry.destroy_realm("realm1").unwrap_err(),
            RoutingError::NoSuchRealm("realm1".to_string())
        );
    }

    #[tokio::test]
    async fn test_shutdown_unknown_realm() {
        let registry = registry(false);
        assert!(matches!(
            registry.shutdown_realm("nope").await,
            Err(RoutingError::NoSuchRealm(_))
        ));
    }
}
