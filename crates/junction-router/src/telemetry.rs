//! Per-realm counters and telemetry snapshots

use chrono::{DateTime, Utc};
use junction_observability::RealmMetrics;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Live counters of one realm, mirrored to the metrics facade
#[derive(Debug)]
pub struct RealmStats {
    realm: String,
    publications: AtomicU64,
    events_delivered: AtomicU64,
    calls: AtomicU64,
    call_timeouts: AtomicU64,
    delivery_failures: AtomicU64,
}

impl RealmStats {
    pub fn new(realm: &str) -> Self {
        Self {
            realm: realm.to_string(),
            publications: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            call_timeouts: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
        }
    }

    pub fn record_publication(&self, recipients: usize) {
        self.publications.fetch_add(1, Ordering::Relaxed);
        self.events_delivered
            .fetch_add(recipients as u64, Ordering::Relaxed);
        RealmMetrics::publication(&self.realm, recipients);
    }

    pub fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        RealmMetrics::call(&self.realm);
    }

    pub fn record_call_completed(&self, elapsed: Duration) {
        RealmMetrics::call_completed(&self.realm, elapsed.as_secs_f64());
    }

    pub fn record_call_timeout(&self) {
        self.call_timeouts.fetch_add(1, Ordering::Relaxed);
        RealmMetrics::call_timeout(&self.realm);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
        RealmMetrics::delivery_failure(&self.realm);
    }

    pub fn publications(&self) -> u64 {
        self.publications.load(Ordering::Relaxed)
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of a realm for the supervising layer
#[derive(Debug, Clone, Serialize)]
pub struct RealmTelemetry {
    pub realm: String,
    pub created_at: DateTime<Utc>,
    pub uptime_secs: f64,
    pub sessions: usize,
    pub subscriptions: usize,
    pub registrations: usize,
    pub invocations: usize,
    pub publications: u64,
    pub events_delivered: u64,
    pub calls: u64,
    pub call_timeouts: u64,
    pub delivery_failures: u64,
    /// Publications per second since the realm was created
    pub publish_rate: f64,
    /// Calls per second since the realm was created
    pub call_rate: f64,
}

/// Table sizes sampled by the realm
#[derive(Debug, Clone, Copy, Default)]
pub struct TableCounts {
    pub sessions: usize,
    pub subscriptions: usize,
    pub registrations: usize,
    pub invocations: usize,
}

impl RealmStats {
    pub fn snapshot(&self, created_at: DateTime<Utc>, counts: TableCounts) -> RealmTelemetry {
        let uptime = (Utc::now() - created_at)
            .to_std()
            .unwrap_or_default()
            .as_secs_f64();
        let publications = self.publications();
        let calls = self.calls();
        let rate = |count: u64| if uptime > 0.0 { count as f64 / uptime } else { 0.0 };

        RealmTelemetry {
            realm: self.realm.clone(),
            created_at,
            uptime_secs: uptime,
            sessions: counts.sessions,
            subscriptions: counts.subscriptions,
            registrations: counts.registrations,
            invocations: counts.invocations,
            publications,
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            calls,
            call_timeouts: self.call_timeouts.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            publish_rate: rate(publications),
            call_rate: rate(calls),
        }
    }
}
