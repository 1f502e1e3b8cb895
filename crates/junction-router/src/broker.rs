//! Broker: subscription table and publication fan-out
//!
//! Subscriptions are keyed by (topic pattern, match policy); subscribing to
//! the same pair again joins the existing id. For a publication the broker
//! computes the recipients and builds their EVENTs, and it drops a session's
//! subscriptions when the session leaves.
//!
//! Table changes happen under the write lock; matching only takes the read
//! lock. Delivery is left to the realm.

use chrono::{DateTime, Utc};
use junction_core::uri::{self, MatchPolicy};
use junction_core::{
    EventDetails, IdSequence, Message, Payload, PublicationId, PublishOptions, RoutingError,
    SessionId, SubscriptionId,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

use crate::matcher::UriTable;
use crate::session::{Delivery, SessionDetails, SessionTable};

/// Public description of a subscription
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub created: DateTime<Utc>,
    pub uri: String,
    #[serde(rename = "match")]
    pub match_policy: MatchPolicy,
}

/// Subscription ids grouped by match policy
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubscriptionList {
    pub exact: Vec<SubscriptionId>,
    pub prefix: Vec<SubscriptionId>,
    pub wildcard: Vec<SubscriptionId>,
}

#[derive(Debug)]
struct Subscription {
    info: SubscriptionInfo,
    /// Subscribers in join order
    subscribers: Vec<SessionId>,
}

#[derive(Debug, Default)]
struct BrokerState {
    table: UriTable<SubscriptionId>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
}

/// Result of a subscribe
#[derive(Debug, Clone)]
pub struct SubscribeOutcome {
    pub info: SubscriptionInfo,
    /// A new entry was created
    pub created: bool,
    /// The session was not subscribed yet (false on a repeat)
    pub added: bool,
}

/// Result of an unsubscribe
#[derive(Debug, Clone)]
pub struct UnsubscribeOutcome {
    pub session: SessionId,
    pub info: SubscriptionInfo,
    /// The last subscriber left and the entry was removed
    pub deleted: bool,
}

/// One publication to route
#[derive(Debug, Clone, Copy)]
pub struct Publication<'a> {
    pub id: PublicationId,
    /// Publisher; `None` for meta events raised by the router
    pub publisher: Option<&'a SessionDetails>,
    pub topic: &'a str,
    pub payload: &'a Payload,
    pub options: &'a PublishOptions,
    /// Whether subscribers learn who published
    pub disclose: bool,
}

/// Subscription table
#[derive(Debug, Default)]
pub struct Broker {
    state: RwLock<BrokerState>,
    ids: IdSequence,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe; an existing (topic, policy) pair returns its id
    pub fn subscribe(
        &self,
        session: SessionId,
        topic: &str,
        policy: MatchPolicy,
    ) -> Result<SubscribeOutcome, RoutingError> {
        uri::validate(topic, policy)?;

        let mut state = self.state.write();

        let existing = state.table.get(topic, policy).copied();
        if let Some(id) = existing {
            let subscription = state
                .subscriptions
                .get_mut(&id)
                .ok_or(RoutingError::NoSuchSubscription(id))?;
            let added = !subscription.subscribers.contains(&session);
            if added {
                subscription.subscribers.push(session);
            }
            return Ok(SubscribeOutcome {
                info: subscription.info.clone(),
                created: false,
                added,
            });
        }

        let info = SubscriptionInfo {
            id: self.ids.next_id(),
            created: Utc::now(),
            uri: topic.to_string(),
            match_policy: policy,
        };
        state.table.insert(topic, policy, info.id);
        state.subscriptions.insert(
            info.id,
            Subscription {
                info: info.clone(),
                subscribers: vec![session],
            },
        );

        Ok(SubscribeOutcome {
            info,
            created: true,
            added: true,
        })
    }

    /// Unsubscribe; the entry goes away with its last subscriber
    pub fn unsubscribe(
        &self,
        session: SessionId,
        id: SubscriptionId,
    ) -> Result<UnsubscribeOutcome, RoutingError> {
        let mut state = self.state.write();
        Self::remove_subscriber(&mut state, session, id)
            .ok_or(RoutingError::NoSuchSubscription(id))
    }

    fn remove_subscriber(
        state: &mut BrokerState,
        session: SessionId,
        id: SubscriptionId,
    ) -> Option<UnsubscribeOutcome> {
        let subscription = state.subscriptions.get_mut(&id)?;
        let index = subscription.subscribers.iter().position(|s| *s == session)?;
        subscription.subscribers.remove(index);

        let info = subscription.info.clone();
        let deleted = subscription.subscribers.is_empty();
        if deleted {
            state.subscriptions.remove(&id);
            state.table.remove(&info.uri, info.match_policy);
        }

        Some(UnsubscribeOutcome {
            session,
            info,
            deleted,
        })
    }

    /// Drop every subscription of a session, ordered by subscription id
    pub fn remove_session(&self, session: SessionId) -> Vec<UnsubscribeOutcome> {
        let mut state = self.state.write();

        let mut ids: Vec<SubscriptionId> = state
            .subscriptions
            .values()
            .filter(|s| s.subscribers.contains(&session))
            .map(|s| s.info.id)
            .collect();
        ids.sort_unstable();

        ids.into_iter()
            .filter_map(|id| Self::remove_subscriber(&mut state, session, id))
            .collect()
    }

    /// Build the EVENT for every recipient of a publication
    ///
    /// Each matching subscription yields its own event, so a session matched
    /// through several subscriptions receives several copies.
    pub fn route(&self, publication: &Publication<'_>, sessions: &SessionTable) -> Vec<Delivery> {
        let filter = RecipientFilter::new(publication);
        let state = self.state.read();
        let mut deliveries = Vec::new();

        for matched in state.table.matches(publication.topic) {
            let Some(subscription) = state.subscriptions.get(matched.value) else {
                continue;
            };

            let details = event_details(publication, matched.policy);
            for &subscriber in &subscription.subscribers {
                if !filter.accepts(subscriber, sessions) {
                    continue;
                }
                deliveries.push(Delivery::new(
                    subscriber,
                    Message::Event {
                        subscription: subscription.info.id,
                        publication: publication.id,
                        details: details.clone(),
                        payload: publication.payload.clone(),
                    },
                ));
            }
        }

        deliveries
    }

    /// Find a subscription by its (topic, policy)
    pub fn lookup(&self, topic: &str, policy: MatchPolicy) -> Option<SubscriptionId> {
        self.state.read().table.get(topic, policy).copied()
    }

    /// Every subscription matching a topic
    pub fn match_topic(&self, topic: &str) -> Vec<SubscriptionId> {
        self.state
            .read()
            .table
            .matches(topic)
            .iter()
            .map(|m| *m.value)
            .collect()
    }

    pub fn get(&self, id: SubscriptionId) -> Option<SubscriptionInfo> {
        self.state
            .read()
            .subscriptions
            .get(&id)
            .map(|s| s.info.clone())
    }

    pub fn subscribers(&self, id: SubscriptionId) -> Option<Vec<SessionId>> {
        self.state
            .read()
            .subscriptions
            .get(&id)
            .map(|s| s.subscribers.clone())
    }

    /// All subscription ids by policy, ascending
    pub fn list(&self) -> SubscriptionList {
        let state = self.state.read();
        let mut list = SubscriptionList::default();
        for subscription in state.subscriptions.values() {
            let bucket = match subscription.info.match_policy {
                MatchPolicy::Exact => &mut list.exact,
                MatchPolicy::Prefix => &mut list.prefix,
                MatchPolicy::Wildcard => &mut list.wildcard,
            };
            bucket.push(subscription.info.id);
        }
        list.exact.sort_unstable();
        list.prefix.sort_unstable();
        list.wildcard.sort_unstable();
        list
    }

    pub fn count(&self) -> usize {
        self.state.read().subscriptions.len()
    }
}

fn event_details(publication: &Publication<'_>, policy: MatchPolicy) -> EventDetails {
    let mut details = EventDetails::default();
    if policy != MatchPolicy::Exact {
        details.topic = Some(publication.topic.to_string());
    }
    if publication.disclose {
        if let Some(publisher) = publication.publisher {
            details.publisher = Some(publisher.session);
            details.publisher_authid = Some(publisher.authid.clone());
            details.publisher_authrole = Some(publisher.authrole.clone());
        }
    }
    details
}

/// Recipient filters taken from the publish options
struct RecipientFilter<'a> {
    publisher: Option<SessionId>,
    options: &'a PublishOptions,
    needs_identity: bool,
}

impl<'a> RecipientFilter<'a> {
    fn new(publication: &Publication<'a>) -> Self {
        let options = publication.options;
        let publisher = publication
            .publisher
            .filter(|_| options.excludes_publisher())
            .map(|p| p.session);
        let needs_identity = !options.exclude_authid.is_empty()
            || !options.exclude_authrole.is_empty()
            || options.eligible_authid.is_some()
            || options.eligible_authrole.is_some();

        Self {
            publisher,
            options,
            needs_identity,
        }
    }

    fn accepts(&self, recipient: SessionId, sessions: &SessionTable) -> bool {
        let options = self.options;

        if self.publisher == Some(recipient) || options.exclude.contains(&recipient) {
            return false;
        }
        if let Some(eligible) = &options.eligible {
            if !eligible.contains(&recipient) {
                return false;
            }
        }
        if !self.needs_identity {
            return true;
        }

        let Some(session) = sessions.get(&recipient) else {
            return false;
        };
        let details = session.details();

        if options.exclude_authid.contains(&details.authid)
            || options.exclude_authrole.contains(&details.authrole)
        {
            return false;
        }
        if let Some(eligible) = &options.eligible_authid {
            if !eligible.contains(&details.authid) {
                return false;
            }
        }
        if let Some(eligible) = &options.eligible_authrole {
            if !eligible.contains(&details.authrole) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn send(&self, _message: Message) -> bool {
            true
        }

        async fn close(&self, _reason: &str) {}
    }

    fn publish<'a>(
        publisher: &'a SessionDetails,
        topic: &'a str,
        payload: &'a Payload,
        options: &'a PublishOptions,
    ) -> Publication<'a> {
        Publication {
            id: 99,
            publisher: Some(publisher),
            topic,
            payload,
            options,
            disclose: false,
        }
    }

    fn recipients(deliveries: &[Delivery]) -> Vec<SessionId> {
        deliveries.iter().map(|d| d.to).collect()
    }

    #[test]
    fn test_subscribe_is_idempotent_by_content() {
        let broker = Broker::new();
        let a = broker.subscribe(1, "com.example.topic", MatchPolicy::Exact).unwrap();
        let b = broker.subscribe(2, "com.example.topic", MatchPolicy::Exact).unwrap();
        let again = broker.subscribe(2, "com.example.topic", MatchPolicy::Exact).unwrap();
        let prefix = broker.subscribe(1, "com.example.topic", MatchPolicy::Prefix).unwrap();

        assert!(a.created && a.added);
        assert!(!b.created && b.added);
        assert!(!again.created && !again.added);
        assert_eq!(a.info.id, b.info.id);
        assert_ne!(a.info.id, prefix.info.id);
        assert!(prefix.info.id > a.info.id);
        assert_eq!(broker.subscribers(a.info.id), Some(vec![1, 2]));
    }

    #[test]
    fn test_invalid_topic_rejected_before_mutation() {
        let broker = Broker::new();
        assert!(matches!(
            broker.subscribe(1, "com..x", MatchPolicy::Exact),
            Err(RoutingError::InvalidUri(_))
        ));
        assert_eq!(broker.count(), 0);
    }

    #[test]
    fn test_last_unsubscribe_deletes_entry() {
        let broker = Broker::new();
        let id = broker.subscribe(1, "com.t", MatchPolicy::Exact).unwrap().info.id;
        broker.subscribe(2, "com.t", MatchPolicy::Exact).unwrap();

        let first = broker.unsubscribe(1, id).unwrap();
        assert!(!first.deleted);
        let last = broker.unsubscribe(2, id).unwrap();
        assert!(last.deleted);

        assert_eq!(broker.count(), 0);
        assert_eq!(broker.lookup("com.t", MatchPolicy::Exact), None);
        assert!(matches!(
            broker.unsubscribe(2, id),
            Err(RoutingError::NoSuchSubscription(_))
        ));
    }

    #[test]
    fn test_unsubscribe_by_non_subscriber_fails() {
        let broker = Broker::new();
        let id = broker.subscribe(1, "com.t", MatchPolicy::Exact).unwrap().info.id;
        assert!(broker.unsubscribe(2, id).is_err());
        assert_eq!(broker.subscribers(id), Some(vec![1]));
    }

    #[test]
    fn test_remove_session() {
        let broker = Broker::new();
        broker.subscribe(1, "com.a", MatchPolicy::Exact).unwrap();
        broker.subscribe(1, "com.b", MatchPolicy::Exact).unwrap();
        broker.subscribe(2, "com.b", MatchPolicy::Exact).unwrap();

        let removed = broker.remove_session(1);
        assert_eq!(removed.len(), 2);
        assert!(removed[0].deleted);
        assert!(!removed[1].deleted);
        assert_eq!(broker.count(), 1);
        assert!(broker.remove_session(1).is_empty());
    }

    #[test]
    fn test_route_excludes_publisher_by_default() {
        let broker = Broker::new();
        let sessions = SessionTable::new();
        broker.subscribe(1, "com.t", MatchPolicy::Exact).unwrap();
        broker.subscribe(2, "com.t", MatchPolicy::Exact).unwrap();

        let publisher = SessionDetails::for_test(1, "realm1", "a", "user");
        let payload = Payload::single(json!("hi"));
        let options = PublishOptions::default();
        let deliveries = broker.route(&publish(&publisher, "com.t", &payload, &options), &sessions);
        assert_eq!(recipients(&deliveries), vec![2]);

        let options = PublishOptions::default().with_exclude_me(false);
        let deliveries = broker.route(&publish(&publisher, "com.t", &payload, &options), &sessions);
        assert_eq!(recipients(&deliveries), vec![1, 2]);
    }

    #[test]
    fn test_route_exclude_and_eligible_lists() {
        let broker = Broker::new();
        let sessions = SessionTable::new();
        for s in 2..=5 {
            broker.subscribe(s, "com.t", MatchPolicy::Exact).unwrap();
        }
        let publisher = SessionDetails::for_test(1, "realm1", "a", "user");
        let payload = Payload::default();

        let options = PublishOptions::default().with_exclude(vec![3]);
        let deliveries = broker.route(&publish(&publisher, "com.t", &payload, &options), &sessions);
        assert_eq!(recipients(&deliveries), vec![2, 4, 5]);

        let options = PublishOptions::default()
            .with_eligible(vec![3, 4])
            .with_exclude(vec![4]);
        let deliveries = broker.route(&publish(&publisher, "com.t", &payload, &options), &sessions);
        assert_eq!(recipients(&deliveries), vec![3]);
    }

    #[test]
    fn test_route_authrole_filter_uses_session_table() {
        let broker = Broker::new();
        let sessions = SessionTable::new();
        let transport: Arc<dyn Transport> = Arc::new(NullTransport);
        for (id, role) in [(2, "admin"), (3, "user")] {
            sessions.insert(
                id,
                Arc::new(Session::new(
                    SessionDetails::for_test(id, "realm1", "x", role),
                    &transport,
                )),
            );
            broker.subscribe(id, "com.t", MatchPolicy::Exact).unwrap();
        }

        let publisher = SessionDetails::for_test(1, "realm1", "a", "user");
        let payload = Payload::default();
        let mut options = PublishOptions::default();
        options.eligible_authrole = Some(vec!["admin".to_string()]);
        let deliveries = broker.route(&publish(&publisher, "com.t", &payload, &options), &sessions);
        assert_eq!(recipients(&deliveries), vec![2]);
    }

    #[test]
    fn test_pattern_subscription_events_carry_topic() {
        let broker = Broker::new();
        let sessions = SessionTable::new();
        let exact = broker.subscribe(2, "com.app.update", MatchPolicy::Exact).unwrap();
        let wildcard = broker.subscribe(3, "com..update", MatchPolicy::Wildcard).unwrap();

        let publisher = SessionDetails::for_test(1, "realm1", "alice", "user");
        let payload = Payload::default();
        let options = PublishOptions::default();
        let mut publication = publish(&publisher, "com.app.update", &payload, &options);
        publication.disclose = true;

        let deliveries = broker.route(&publication, &sessions);
        assert_eq!(deliveries.len(), 2);
        for delivery in deliveries {
            let Message::Event {
                subscription,
                publication,
                details,
                ..
            } = delivery.message
            else {
                panic!("expected EVENT");
            };
            assert_eq!(publication, 99);
            assert_eq!(details.publisher, Some(1));
            assert_eq!(details.publisher_authid.as_deref(), Some("alice"));
            if subscription == exact.info.id {
                assert_eq!(details.topic, None);
            } else {
                assert_eq!(subscription, wildcard.info.id);
                assert_eq!(details.topic.as_deref(), Some("com.app.update"));
            }
        }
    }

    #[test]
    fn test_list_and_match() {
        let broker = Broker::new();
        let a = broker.subscribe(1, "com.t", MatchPolicy::Exact).unwrap().info.id;
        let b = broker.subscribe(1, "com", MatchPolicy::Prefix).unwrap().info.id;
        let c = broker.subscribe(1, ".t", MatchPolicy::Wildcard).unwrap().info.id;

        let list = broker.list();
        assert_eq!(list.exact, vec![a]);
        assert_eq!(list.prefix, vec![b]);
        assert_eq!(list.wildcard, vec![c]);
        assert_eq!(broker.match_topic("com.t"), vec![a, b, c]);
        assert_eq!(broker.get(b).unwrap().match_policy, MatchPolicy::Prefix);
    }
}
