//! Realm: one isolated routing domain
//!
//! A realm owns its session table, broker and dealer. Table mutations are
//! synchronous critical sections inside the broker and dealer; the realm
//! adds authorization, meta events and delivery around them. Nothing here
//! is shared with other realms.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use junction_core::uri;
use junction_core::{
    random_id, CallOptions, CancelOptions, CloseDetails, Kwargs, Message, Payload,
    PublicationId, PublishOptions, RegisterOptions, RegistrationId, RequestId, RoutingError,
    SessionId, SubscribeOptions, SubscriptionId, YieldOptions,
};
use junction_observability::RealmMetrics;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::auth::{Action, Authorization, Authorizer, Principal};
use crate::broker::{Broker, Publication, UnsubscribeOutcome};
use crate::dealer::{CallRequest, Dealer, UnregisterOutcome};
use crate::meta::MetaEvent;
use crate::meta_api;
use crate::session::{
    Delivery, Session, SessionDetails, SessionTable, SCOPE_DESTROYED, SCOPE_DETACHED,
};
use crate::telemetry::{RealmStats, RealmTelemetry, TableCounts};
use crate::transport::Transport;

/// How a CALL was handled
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// Forwarded to a callee under this invocation id
    Invoked(RequestId),
    /// Answered by the realm itself
    Answered(Payload),
}

pub struct Realm {
    name: String,
    sessions: SessionTable,
    broker: Broker,
    dealer: Dealer,
    authorizer: Arc<dyn Authorizer>,
    stats: RealmStats,
    created_at: DateTime<Utc>,
    this: Weak<Realm>,
}

impl std::fmt::Debug for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realm")
            .field("name", &self.name)
            .field("sessions", &self.sessions.len())
            .field("broker", &self.broker)
            .field("dealer", &self.dealer)
            .field("authorizer", &"<authorizer>")
            .finish()
    }
}

fn unsubscribe_events(outcomes: &[UnsubscribeOutcome]) -> Vec<MetaEvent> {
    outcomes
        .iter()
        .filter(|o| !uri::is_reserved(&o.info.uri))
        .map(|o| {
            if o.deleted {
                MetaEvent::SubscriptionDelete {
                    session: o.session,
                    subscription: o.info.id,
                }
            } else {
                MetaEvent::SubscriptionUnsubscribe {
                    session: o.session,
                    subscription: o.info.id,
                }
            }
        })
        .collect()
}

fn unregister_events(outcomes: &[UnregisterOutcome]) -> Vec<MetaEvent> {
    outcomes
        .iter()
        .filter(|o| !uri::is_reserved(&o.info.uri))
        .map(|o| {
            if o.deleted {
                MetaEvent::RegistrationDelete {
                    session: o.session,
                    registration: o.info.id,
                }
            } else {
                MetaEvent::RegistrationUnregister {
                    session: o.session,
                    registration: o.info.id,
                }
            }
        })
        .collect()
}

impl Realm {
    pub fn new(name: impl Into<String>, authorizer: Arc<dyn Authorizer>) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|this| Self {
            stats: RealmStats::new(&name),
            name,
            sessions: SessionTable::new(),
            broker: Broker::new(),
            dealer: Dealer::new(),
            authorizer,
            created_at: Utc::now(),
            this: this.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn dealer(&self) -> &Dealer {
        &self.dealer
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn has_session(&self, session: SessionId) -> bool {
        self.sessions.contains_key(&session)
    }

    pub fn session(&self, session: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&session).map(|s| Arc::clone(s.value()))
    }

    /// Ids of attached sessions, ascending
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.iter().map(|s| *s.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Details of attached sessions, ordered by id
    pub fn session_details(&self) -> Vec<SessionDetails> {
        let mut details: Vec<SessionDetails> = self
            .sessions
            .iter()
            .map(|s| s.details().clone())
            .collect();
        details.sort_by_key(|d| d.session);
        details
    }

    pub fn telemetry(&self) -> RealmTelemetry {
        self.stats.snapshot(
            self.created_at,
            TableCounts {
                sessions: self.sessions.len(),
                subscriptions: self.broker.count(),
                registrations: self.dealer.count(),
                invocations: self.dealer.invocation_count(),
            },
        )
    }

    fn ensure_member(&self, session: SessionId) -> Result<(), RoutingError> {
        if self.has_session(session) {
            Ok(())
        } else {
            Err(RoutingError::NoSuchSession(session))
        }
    }

    pub(crate) async fn authorize(
        &self,
        session: &SessionDetails,
        action: Action,
        uri: &str,
    ) -> Result<bool, RoutingError> {
        match self.authorizer.authorize(session, action, uri).await {
            Authorization::Allow { disclose } => Ok(disclose),
            Authorization::Deny => {
                debug!(
                    realm = %self.name,
                    session = session.session,
                    "denied {} on {}",
                    action,
                    uri
                );
                Err(RoutingError::not_authorized(action.as_str(), uri))
            }
        }
    }

    /// Add a session under a fresh id
    pub(crate) fn join(&self, principal: Principal, transport: &Arc<dyn Transport>) -> SessionDetails {
        loop {
            let id = random_id();
            if let Entry::Vacant(entry) = self.sessions.entry(id) {
                let details = SessionDetails::new(id, &self.name, principal, transport.peer());
                entry.insert(Arc::new(Session::new(details.clone(), transport)));
                RealmMetrics::session_joined(&self.name);
                info!(
                    realm = %self.name,
                    session = id,
                    authid = %details.authid,
                    authrole = %details.authrole,
                    "session joined"
                );
                return details;
            }
        }
    }

    pub(crate) async fn announce_join(&self, details: &SessionDetails) {
        self.publish_meta(vec![MetaEvent::SessionJoin(details.clone())])
            .await;
    }

    /// Detach a session and clean up everything it owns. Returns `false`
    /// when the session was not attached.
    pub async fn leave(&self, session: SessionId) -> bool {
        let Some((_, record)) = self.sessions.remove(&session) else {
            return false;
        };
        RealmMetrics::session_left(&self.name);

        let details = record.details().clone();
        let unsubscribed = self.broker.remove_session(session);
        let cleanup = self.dealer.remove_session(session);

        for scope in [SCOPE_DETACHED, SCOPE_DESTROYED] {
            for testament in record.take_testaments(scope) {
                self.dispatch(
                    Some(&details),
                    &testament.topic,
                    &testament.options,
                    &testament.payload,
                    testament.options.disclose_me,
                )
                .await;
            }
        }

        let mut events = vec![MetaEvent::SessionLeave {
            session,
            authid: details.authid.clone(),
            authrole: details.authrole.clone(),
        }];
        events.extend(unsubscribe_events(&unsubscribed));
        events.extend(unregister_events(&cleanup.unregistered));
        self.publish_meta(events).await;
        self.deliver(cleanup.deliveries).await;

        info!(
            realm = %self.name,
            session,
            subscriptions = unsubscribed.len(),
            registrations = cleanup.unregistered.len(),
            "session left"
        );
        true
    }

    pub async fn subscribe(
        &self,
        session: &SessionDetails,
        topic: &str,
        options: &SubscribeOptions,
    ) -> Result<SubscriptionId, RoutingError> {
        uri::validate(topic, options.match_policy)?;
        self.authorize(session, Action::Subscribe, topic).await?;
        self.ensure_member(session.session)?;

        let outcome = self
            .broker
            .subscribe(session.session, topic, options.match_policy)?;
        if !self.has_session(session.session) {
            // left while we were subscribing
            self.broker.remove_session(session.session);
            return Err(RoutingError::NoSuchSession(session.session));
        }

        if !uri::is_reserved(topic) {
            let mut events = Vec::new();
            if outcome.created {
                events.push(MetaEvent::SubscriptionCreate {
                    session: session.session,
                    info: outcome.info.clone(),
                });
            }
            if outcome.added {
                events.push(MetaEvent::SubscriptionSubscribe {
                    session: session.session,
                    subscription: outcome.info.id,
                });
            }
            self.publish_meta(events).await;
        }

        debug!(
            realm = %self.name,
            session = session.session,
            subscription = outcome.info.id,
            "subscribed to {} ({})",
            topic,
            options.match_policy
        );
        Ok(outcome.info.id)
    }

    pub async fn unsubscribe(
        &self,
        session: &SessionDetails,
        subscription: SubscriptionId,
    ) -> Result<(), RoutingError> {
        let outcome = self.broker.unsubscribe(session.session, subscription)?;
        self.publish_meta(unsubscribe_events(std::slice::from_ref(&outcome)))
            .await;
        Ok(())
    }

    pub async fn publish(
        &self,
        session: &SessionDetails,
        topic: &str,
        options: &PublishOptions,
        payload: &Payload,
    ) -> Result<PublicationId, RoutingError> {
        uri::validate_concrete(topic)?;
        if uri::is_reserved(topic) {
            return Err(RoutingError::not_authorized(Action::Publish.as_str(), topic));
        }
        let disclose = self.authorize(session, Action::Publish, topic).await?;
        self.ensure_member(session.session)?;

        Ok(self
            .dispatch(
                Some(session),
                topic,
                options,
                payload,
                disclose || options.disclose_me,
            )
            .await)
    }

    /// Route and deliver one publication
    async fn dispatch(
        &self,
        publisher: Option<&SessionDetails>,
        topic: &str,
        options: &PublishOptions,
        payload: &Payload,
        disclose: bool,
    ) -> PublicationId {
        let id = random_id();
        let deliveries = self.broker.route(
            &Publication {
                id,
                publisher,
                topic,
                payload,
                options,
                disclose,
            },
            &self.sessions,
        );

        if publisher.is_some() {
            self.stats.record_publication(deliveries.len());
        }
        self.deliver(deliveries).await;
        id
    }

    /// Publish meta events in order
    async fn publish_meta(&self, events: Vec<MetaEvent>) {
        let options = PublishOptions::default();
        for event in events {
            let payload = event.payload();
            self.dispatch(None, event.topic(), &options, &payload, false)
                .await;
        }
    }

    pub async fn register(
        &self,
        session: &SessionDetails,
        procedure: &str,
        options: &RegisterOptions,
    ) -> Result<RegistrationId, RoutingError> {
        uri::validate(procedure, options.match_policy)?;
        if uri::is_reserved(procedure) {
            return Err(RoutingError::not_authorized(
                Action::Register.as_str(),
                procedure,
            ));
        }
        self.authorize(session, Action::Register, procedure).await?;
        self.ensure_member(session.session)?;

        let outcome = self.dealer.register(session.session, procedure, options)?;
        if !self.has_session(session.session) {
            self.dealer.remove_session(session.session);
            return Err(RoutingError::NoSuchSession(session.session));
        }

        let mut events = Vec::new();
        if outcome.created {
            events.push(MetaEvent::RegistrationCreate {
                session: session.session,
                info: outcome.info.clone(),
            });
        }
        events.push(MetaEvent::RegistrationRegister {
            session: session.session,
            registration: outcome.info.id,
        });
        self.publish_meta(events).await;

        debug!(
            realm = %self.name,
            session = session.session,
            registration = outcome.info.id,
            "registered {} ({}, {})",
            procedure,
            options.match_policy,
            options.invoke.as_str()
        );
        Ok(outcome.info.id)
    }

    pub async fn unregister(
        &self,
        session: &SessionDetails,
        registration: RegistrationId,
    ) -> Result<(), RoutingError> {
        let outcome = self.dealer.unregister(session.session, registration)?;
        self.publish_meta(unregister_events(std::slice::from_ref(&outcome)))
            .await;
        Ok(())
    }

    pub async fn call(
        &self,
        session: &SessionDetails,
        request: RequestId,
        procedure: &str,
        options: &CallOptions,
        payload: Payload,
    ) -> Result<CallOutcome, RoutingError> {
        uri::validate_concrete(procedure)?;
        let disclose = self.authorize(session, Action::Call, procedure).await?;
        self.ensure_member(session.session)?;

        if uri::is_reserved(procedure) {
            let result = meta_api::handle(self, session, procedure, &payload).await?;
            return Ok(CallOutcome::Answered(result));
        }

        let routed = self.dealer.call(CallRequest {
            caller: session,
            request,
            procedure,
            options,
            payload,
            disclose,
        })?;
        self.stats.record_call();

        if let Some(timeout) = routed.timeout {
            self.schedule_timeout(routed.invocation, timeout);
        }
        let invocation = routed.invocation;
        self.deliver(vec![routed.delivery]).await;
        Ok(CallOutcome::Invoked(invocation))
    }

    fn schedule_timeout(&self, invocation: RequestId, timeout: Duration) {
        let realm = self.this.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(realm) = realm.upgrade() {
                realm.expire_invocation(invocation).await;
            }
        });
    }

    pub(crate) async fn expire_invocation(&self, invocation: RequestId) {
        let deliveries = self.dealer.expire(invocation);
        if deliveries.is_empty() {
            return;
        }
        self.stats.record_call_timeout();
        warn!(realm = %self.name, invocation, "call timed out");
        self.deliver(deliveries).await;
    }

    pub async fn yield_result(
        &self,
        callee: SessionId,
        request: RequestId,
        options: &YieldOptions,
        payload: Payload,
    ) {
        match self.dealer.yield_result(callee, request, options, payload) {
            Some(result) => {
                if let Some(elapsed) = result.elapsed {
                    self.stats.record_call_completed(elapsed);
                }
                self.deliver(vec![result.delivery]).await;
            }
            None => debug!(
                realm = %self.name,
                session = callee,
                request,
                "dropping YIELD for unknown invocation"
            ),
        }
    }

    pub async fn invocation_error(
        &self,
        callee: SessionId,
        request: RequestId,
        details: Kwargs,
        error: String,
        payload: Payload,
    ) {
        match self
            .dealer
            .invocation_error(callee, request, details, error, payload)
        {
            Some(delivery) => self.deliver(vec![delivery]).await,
            None => debug!(
                realm = %self.name,
                session = callee,
                request,
                "dropping ERROR for unknown invocation"
            ),
        }
    }

    pub async fn cancel(&self, caller: SessionId, request: RequestId, options: &CancelOptions) {
        let mode = options.mode.unwrap_or_default();
        let deliveries = self.dealer.cancel(caller, request, mode);
        debug!(
            realm = %self.name,
            session = caller,
            request,
            "cancel ({}) produced {} messages",
            mode.as_str(),
            deliveries.len()
        );
        self.deliver(deliveries).await;
    }

    /// Say GOODBYE to a session, detach it and close its transport
    pub async fn kill_session(
        &self,
        session: SessionId,
        reason: &str,
        message: Option<String>,
    ) -> Result<(), RoutingError> {
        let transport = self
            .sessions
            .get(&session)
            .map(|s| s.transport())
            .ok_or(RoutingError::NoSuchSession(session))?;

        if let Some(transport) = &transport {
            transport
                .send(Message::Goodbye {
                    details: CloseDetails { message },
                    reason: reason.to_string(),
                })
                .await;
        }
        self.leave(session).await;
        if let Some(transport) = transport {
            transport.close(reason).await;
        }

        info!(realm = %self.name, session, "session killed: {}", reason);
        Ok(())
    }

    /// Kill every session with the given reason
    pub async fn shutdown(&self, reason: &str) {
        for session in self.session_ids() {
            // a session may leave on its own meanwhile
            let _ = self.kill_session(session, reason, None).await;
        }
        info!(realm = %self.name, "realm shut down: {}", reason);
    }

    /// Detach a session outside the current delivery
    fn schedule_detach(&self, session: SessionId) {
        let realm = self.this.clone();
        tokio::spawn(async move {
            if let Some(realm) = realm.upgrade() {
                if realm.leave(session).await {
                    debug!(realm = %realm.name, session, "detached after delivery failure");
                }
            }
        });
    }

    /// Send messages; each recipient gets its messages in order, recipients
    /// are served concurrently and a failure to one does not affect others
    pub(crate) async fn deliver(&self, deliveries: Vec<Delivery>) {
        if deliveries.is_empty() {
            return;
        }

        let mut batches: Vec<(SessionId, Vec<Message>)> = Vec::new();
        let mut index: HashMap<SessionId, usize> = HashMap::new();
        for delivery in deliveries {
            match index.get(&delivery.to) {
                Some(&i) => batches[i].1.push(delivery.message),
                None => {
                    index.insert(delivery.to, batches.len());
                    batches.push((delivery.to, vec![delivery.message]));
                }
            }
        }

        join_all(
            batches
                .into_iter()
                .map(|(to, messages)| self.send_batch(to, messages)),
        )
        .await;
    }

    async fn send_batch(&self, to: SessionId, messages: Vec<Message>) {
        let Some(transport) = self.sessions.get(&to).and_then(|s| s.transport()) else {
            debug!(realm = %self.name, session = to, "recipient gone, dropping {} messages", messages.len());
            return;
        };

        for message in messages {
            if !transport.send(message).await {
                self.stats.record_delivery_failure();
                warn!(realm = %self.name, session = to, "delivery failed, detaching session");
                transport.close("delivery failed").await;
                self.schedule_detach(to);
                return;
            }
        }
    }
}
