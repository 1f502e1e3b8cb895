//! Dealer: registration table and call routing
//!
//! The dealer is a synchronous state machine guarded by one mutex. Every
//! operation mutates the tables and returns the messages that must go out;
//! the realm delivers them and schedules call deadlines.

use chrono::{DateTime, Utc};
use junction_core::uri::{self, MatchPolicy};
use junction_core::{
    CallOptions, CancelMode, IdSequence, InterruptOptions, InvocationDetails, InvocationPolicy,
    Kwargs, Message, MessageKind, Payload, RegisterOptions, RegistrationId, RequestId,
    ResultDetails, RoutingError, SessionId, YieldOptions,
};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::matcher::UriTable;
use crate::session::{Delivery, SessionDetails};

/// Public description of a registration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationInfo {
    pub id: RegistrationId,
    pub created: DateTime<Utc>,
    pub uri: String,
    #[serde(rename = "match")]
    pub match_policy: MatchPolicy,
    pub invoke: InvocationPolicy,
}

/// Registration ids grouped by match policy
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistrationList {
    pub exact: Vec<RegistrationId>,
    pub prefix: Vec<RegistrationId>,
    pub wildcard: Vec<RegistrationId>,
}

#[derive(Debug, Clone)]
struct Callee {
    session: SessionId,
    disclose_caller: bool,
}

#[derive(Debug)]
struct Registration {
    info: RegistrationInfo,
    /// Callees in registration order
    callees: Vec<Callee>,
    /// Index of the next roundrobin callee
    cursor: usize,
}

impl Registration {
    fn select(&mut self) -> Option<Callee> {
        if self.callees.is_empty() {
            return None;
        }
        let index = match self.info.invoke {
            InvocationPolicy::Single | InvocationPolicy::First => 0,
            InvocationPolicy::Last => self.callees.len() - 1,
            InvocationPolicy::Random => rand::thread_rng().gen_range(0..self.callees.len()),
            InvocationPolicy::Roundrobin => {
                let index = self.cursor % self.callees.len();
                self.cursor = (index + 1) % self.callees.len();
                index
            }
        };
        self.callees.get(index).cloned()
    }

    /// Remove a callee, keeping the roundrobin cursor on the same next callee
    fn remove_callee(&mut self, session: SessionId) -> bool {
        let Some(index) = self.callees.iter().position(|c| c.session == session) else {
            return false;
        };
        self.callees.remove(index);
        if index < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.callees.len() {
            self.cursor = 0;
        }
        true
    }
}

#[derive(Debug)]
struct Invocation {
    registration: RegistrationId,
    caller: SessionId,
    call_request: RequestId,
    callee: SessionId,
    receive_progress: bool,
    /// Set once a kill-mode cancel has been forwarded
    interrupted: bool,
    started: Instant,
}

#[derive(Debug, Default)]
struct DealerState {
    table: UriTable<RegistrationId>,
    registrations: HashMap<RegistrationId, Registration>,
    /// Keyed by the request id used toward the callee
    invocations: HashMap<RequestId, Invocation>,
    /// (caller, caller request id) to invocation id
    by_call: HashMap<(SessionId, RequestId), RequestId>,
}

impl DealerState {
    fn take_invocation(&mut self, id: RequestId) -> Option<Invocation> {
        let invocation = self.invocations.remove(&id)?;
        self.by_call
            .remove(&(invocation.caller, invocation.call_request));
        Some(invocation)
    }

    fn remove_callee(
        &mut self,
        session: SessionId,
        id: RegistrationId,
    ) -> Option<UnregisterOutcome> {
        let registration = self.registrations.get_mut(&id)?;
        if !registration.remove_callee(session) {
            return None;
        }

        let info = registration.info.clone();
        let deleted = registration.callees.is_empty();
        if deleted {
            self.registrations.remove(&id);
            self.table.remove(&info.uri, info.match_policy);
        }

        Some(UnregisterOutcome {
            session,
            info,
            deleted,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RegisterOutcome {
    pub info: RegistrationInfo,
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct UnregisterOutcome {
    pub session: SessionId,
    pub info: RegistrationInfo,
    pub deleted: bool,
}

/// A CALL to be routed
#[derive(Debug, Clone)]
pub struct CallRequest<'a> {
    pub caller: &'a SessionDetails,
    pub request: RequestId,
    pub procedure: &'a str,
    pub options: &'a CallOptions,
    pub payload: Payload,
    /// The authorizer asked for caller disclosure
    pub disclose: bool,
}

/// A call forwarded to a callee
#[derive(Debug, Clone)]
pub struct RoutedCall {
    pub invocation: RequestId,
    pub delivery: Delivery,
    pub timeout: Option<Duration>,
}

/// A result forwarded to a caller
#[derive(Debug, Clone)]
pub struct CallResult {
    pub delivery: Delivery,
    /// Elapsed time for a final result, `None` for progressive ones
    pub elapsed: Option<Duration>,
}

/// Cleanup produced by a leaving session
#[derive(Debug, Default)]
pub struct SessionCleanup {
    pub unregistered: Vec<UnregisterOutcome>,
    pub deliveries: Vec<Delivery>,
}

#[derive(Debug, Default)]
pub struct Dealer {
    state: Mutex<DealerState>,
    registration_ids: IdSequence,
    invocation_ids: IdSequence,
}

fn interrupt(request: RequestId, mode: CancelMode, reason: &RoutingError) -> Message {
    Message::Interrupt {
        request,
        options: InterruptOptions {
            mode,
            reason: Some(reason.uri().to_string()),
        },
    }
}

impl Dealer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        session: SessionId,
        procedure: &str,
        options: &RegisterOptions,
    ) -> Result<RegisterOutcome, RoutingError> {
        uri::validate(procedure, options.match_policy)?;

        let mut state = self.state.lock();
        let callee = Callee {
            session,
            disclose_caller: options.disclose_caller,
        };

        let existing = state.table.get(procedure, options.match_policy).copied();
        if let Some(id) = existing {
            let registration = state
                .registrations
                .get_mut(&id)
                .ok_or(RoutingError::NoSuchRegistration(id))?;

            if registration.info.invoke == InvocationPolicy::Single
                || registration.callees.iter().any(|c| c.session == session)
            {
                return Err(RoutingError::ProcedureAlreadyExists(procedure.to_string()));
            }
            if registration.info.invoke != options.invoke {
                return Err(RoutingError::InvocationPolicyMismatch(procedure.to_string()));
            }

            registration.callees.push(callee);
            return Ok(RegisterOutcome {
                info: registration.info.clone(),
                created: false,
            });
        }

        let info = RegistrationInfo {
            id: self.registration_ids.next_id(),
            created: Utc::now(),
            uri: procedure.to_string(),
            match_policy: options.match_policy,
            invoke: options.invoke,
        };
        state.table.insert(procedure, options.match_policy, info.id);
        state.registrations.insert(
            info.id,
            Registration {
                info: info.clone(),
                callees: vec![callee],
                cursor: 0,
            },
        );

        Ok(RegisterOutcome {
            info,
            created: true,
        })
    }

    pub fn unregister(
        &self,
        session: SessionId,
        id: RegistrationId,
    ) -> Result<UnregisterOutcome, RoutingError> {
        self.state
            .lock()
            .remove_callee(session, id)
            .ok_or(RoutingError::NoSuchRegistration(id))
    }

    /// Whether any registration governs the procedure
    pub fn is_registered(&self, procedure: &str) -> bool {
        self.state.lock().table.best_match(procedure).is_some()
    }

    /// Pick a callee and build the INVOCATION
    pub fn call(&self, call: CallRequest<'_>) -> Result<RoutedCall, RoutingError> {
        uri::validate_concrete(call.procedure)?;

        let mut state = self.state.lock();

        if state.by_call.contains_key(&(call.caller.session, call.request)) {
            return Err(RoutingError::ProtocolViolation(format!(
                "call request id {} is already in flight",
                call.request
            )));
        }

        let (registration_id, policy) = state
            .table
            .best_match(call.procedure)
            .map(|m| (*m.value, m.policy))
            .ok_or_else(|| RoutingError::NoSuchProcedure(call.procedure.to_string()))?;

        let callee = state
            .registrations
            .get_mut(&registration_id)
            .and_then(Registration::select)
            .ok_or(RoutingError::Unavailable)?;

        let invocation_id = self.invocation_ids.next_id();
        let receive_progress = call.options.receive_progress;
        let timeout = call.options.deadline_ms();

        let mut details = InvocationDetails {
            receive_progress,
            timeout,
            ..Default::default()
        };
        if policy != MatchPolicy::Exact {
            details.procedure = Some(call.procedure.to_string());
        }
        if call.disclose || call.options.disclose_me || callee.disclose_caller {
            details.caller = Some(call.caller.session);
            details.caller_authid = Some(call.caller.authid.clone());
            details.caller_authrole = Some(call.caller.authrole.clone());
        }

        state.invocations.insert(
            invocation_id,
            Invocation {
                registration: registration_id,
                caller: call.caller.session,
                call_request: call.request,
                callee: callee.session,
                receive_progress,
                interrupted: false,
                started: Instant::now(),
            },
        );
        state
            .by_call
            .insert((call.caller.session, call.request), invocation_id);

        Ok(RoutedCall {
            invocation: invocation_id,
            delivery: Delivery::new(
                callee.session,
                Message::Invocation {
                    request: invocation_id,
                    registration: registration_id,
                    details,
                    payload: call.payload,
                },
            ),
            timeout: timeout.map(Duration::from_millis),
        })
    }

    /// Forward a YIELD. Returns `None` when the invocation is unknown (late
    /// result after a timeout or cancel) or the progress is unwanted.
    pub fn yield_result(
        &self,
        callee: SessionId,
        request: RequestId,
        options: &YieldOptions,
        payload: Payload,
    ) -> Option<CallResult> {
        let mut state = self.state.lock();
        let invocation = state.invocations.get(&request)?;
        if invocation.callee != callee {
            return None;
        }

        if options.progress {
            if !invocation.receive_progress {
                return None;
            }
            return Some(CallResult {
                delivery: Delivery::new(
                    invocation.caller,
                    Message::Result {
                        request: invocation.call_request,
                        details: ResultDetails { progress: true },
                        payload,
                    },
                ),
                elapsed: None,
            });
        }

        let invocation = state.take_invocation(request)?;
        Some(CallResult {
            delivery: Delivery::new(
                invocation.caller,
                Message::Result {
                    request: invocation.call_request,
                    details: ResultDetails::default(),
                    payload,
                },
            ),
            elapsed: Some(invocation.started.elapsed()),
        })
    }

    /// Forward a callee's ERROR for an INVOCATION to the caller
    pub fn invocation_error(
        &self,
        callee: SessionId,
        request: RequestId,
        details: Kwargs,
        error: String,
        payload: Payload,
    ) -> Option<Delivery> {
        let mut state = self.state.lock();
        if state.invocations.get(&request)?.callee != callee {
            return None;
        }
        let invocation = state.take_invocation(request)?;
        Some(Delivery::new(
            invocation.caller,
            Message::Error {
                request_type: MessageKind::Call,
                request: invocation.call_request,
                details,
                error,
                payload,
            },
        ))
    }

    /// Cancel an outstanding call on behalf of its caller
    pub fn cancel(&self, caller: SessionId, request: RequestId, mode: CancelMode) -> Vec<Delivery> {
        let mut state = self.state.lock();
        let Some(&id) = state.by_call.get(&(caller, request)) else {
            return Vec::new();
        };

        let canceled = RoutingError::Canceled("canceled by caller".to_string());
        match mode {
            CancelMode::Skip => match state.take_invocation(id) {
                Some(invocation) => vec![Delivery::new(
                    invocation.caller,
                    Message::error(MessageKind::Call, invocation.call_request, &canceled),
                )],
                None => Vec::new(),
            },
            CancelMode::Kill => match state.invocations.get_mut(&id) {
                Some(invocation) if !invocation.interrupted => {
                    invocation.interrupted = true;
                    vec![Delivery::new(
                        invocation.callee,
                        interrupt(id, CancelMode::Kill, &canceled),
                    )]
                }
                _ => Vec::new(),
            },
            CancelMode::KillNoWait => match state.take_invocation(id) {
                Some(invocation) => vec![
                    Delivery::new(
                        invocation.callee,
                        interrupt(id, CancelMode::KillNoWait, &canceled),
                    ),
                    Delivery::new(
                        invocation.caller,
                        Message::error(MessageKind::Call, invocation.call_request, &canceled),
                    ),
                ],
                None => Vec::new(),
            },
        }
    }

    /// Abandon an invocation whose deadline passed
    pub fn expire(&self, id: RequestId) -> Vec<Delivery> {
        let Some(invocation) = self.state.lock().take_invocation(id) else {
            return Vec::new();
        };
        let timeout = RoutingError::Timeout;
        vec![
            Delivery::new(
                invocation.caller,
                Message::error(MessageKind::Call, invocation.call_request, &timeout),
            ),
            Delivery::new(
                invocation.callee,
                interrupt(id, CancelMode::KillNoWait, &timeout),
            ),
        ]
    }

    /// Drop a session's registrations and every invocation it takes part in
    pub fn remove_session(&self, session: SessionId) -> SessionCleanup {
        let mut state = self.state.lock();
        let mut cleanup = SessionCleanup::default();

        let mut ids: Vec<RegistrationId> = state
            .registrations
            .values()
            .filter(|r| r.callees.iter().any(|c| c.session == session))
            .map(|r| r.info.id)
            .collect();
        ids.sort_unstable();
        cleanup.unregistered = ids
            .into_iter()
            .filter_map(|id| state.remove_callee(session, id))
            .collect();

        let mut affected: Vec<RequestId> = state
            .invocations
            .iter()
            .filter(|(_, inv)| inv.caller == session || inv.callee == session)
            .map(|(id, _)| *id)
            .collect();
        affected.sort_unstable();

        let caller_gone = RoutingError::Canceled("caller left".to_string());
        let callee_gone = RoutingError::Canceled("callee left".to_string());
        for id in affected {
            let Some(invocation) = state.take_invocation(id) else {
                continue;
            };
            if invocation.caller == session && invocation.callee != session {
                cleanup.deliveries.push(Delivery::new(
                    invocation.callee,
                    interrupt(id, CancelMode::KillNoWait, &caller_gone),
                ));
            } else if invocation.callee == session && invocation.caller != session {
                cleanup.deliveries.push(Delivery::new(
                    invocation.caller,
                    Message::error(MessageKind::Call, invocation.call_request, &callee_gone),
                ));
            }
        }

        cleanup
    }

    pub fn lookup(&self, procedure: &str, policy: MatchPolicy) -> Option<RegistrationId> {
        self.state.lock().table.get(procedure, policy).copied()
    }

    /// The registration a call to `procedure` would be routed to
    pub fn match_procedure(&self, procedure: &str) -> Option<RegistrationId> {
        self.state
            .lock()
            .table
            .best_match(procedure)
            .map(|m| *m.value)
    }

    pub fn get(&self, id: RegistrationId) -> Option<RegistrationInfo> {
        self.state
            .lock()
            .registrations
            .get(&id)
            .map(|r| r.info.clone())
    }

    pub fn callees(&self, id: RegistrationId) -> Option<Vec<SessionId>> {
        self.state
            .lock()
            .registrations
            .get(&id)
            .map(|r| r.callees.iter().map(|c| c.session).collect())
    }

    pub fn list(&self) -> RegistrationList {
        let state = self.state.lock();
        let mut list = RegistrationList::default();
        for registration in state.registrations.values() {
            let bucket = match registration.info.match_policy {
                MatchPolicy::Exact => &mut list.exact,
                MatchPolicy::Prefix => &mut list.prefix,
                MatchPolicy::Wildcard => &mut list.wildcard,
            };
            bucket.push(registration.info.id);
        }
        list.exact.sort_unstable();
        list.prefix.sort_unstable();
        list.wildcard.sort_unstable();
        list
    }

    pub fn count(&self) -> usize {
        self.state.lock().registrations.len()
    }

    /// Calls currently in flight
    pub fn invocation_count(&self) -> usize {
        self.state.lock().invocations.len()
    }

    /// Registration an in-flight invocation belongs to
    pub fn invocation_registration(&self, id: RequestId) -> Option<RegistrationId> {
        self.state
            .lock()
            .invocations
            .get(&id)
            .map(|inv| inv.registration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn caller(id: SessionId) -> SessionDetails {
        SessionDetails::for_test(id, "realm1", "caller", "user")
    }

    fn shared(policy: InvocationPolicy) -> RegisterOptions {
        RegisterOptions::default().with_invoke(policy)
    }

    fn route(dealer: &Dealer, from: &SessionDetails, request: RequestId, procedure: &str) -> RoutedCall {
        let options = CallOptions::default();
        dealer
            .call(CallRequest {
                caller: from,
                request,
                procedure,
                options: &options,
                payload: Payload::default(),
                disclose: false,
            })
            .unwrap()
    }

    #[test]
    fn test_single_registration_is_exclusive() {
        let dealer = Dealer::new();
        dealer.register(10, "com.add", &RegisterOptions::default()).unwrap();
        assert!(matches!(
            dealer.register(11, "com.add", &RegisterOptions::default()),
            Err(RoutingError::ProcedureAlreadyExists(_))
        ));
        assert!(matches!(
            dealer.register(11, "com.add", &shared(InvocationPolicy::Roundrobin)),
            Err(RoutingError::ProcedureAlreadyExists(_))
        ));
        assert_eq!(dealer.count(), 1);
    }

    #[test]
    fn test_shared_policy_must_match() {
        let dealer = Dealer::new();
        let first = dealer
            .register(10, "com.add", &shared(InvocationPolicy::Roundrobin))
            .unwrap();
        let second = dealer
            .register(11, "com.add", &shared(InvocationPolicy::Roundrobin))
            .unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.info.id, second.info.id);

        assert!(matches!(
            dealer.register(12, "com.add", &shared(InvocationPolicy::Random)),
            Err(RoutingError::InvocationPolicyMismatch(_))
        ));
        assert!(matches!(
            dealer.register(10, "com.add", &shared(InvocationPolicy::Roundrobin)),
            Err(RoutingError::ProcedureAlreadyExists(_))
        ));
        assert_eq!(dealer.callees(first.info.id), Some(vec![10, 11]));
    }

    #[test]
    fn test_roundrobin_order() {
        let dealer = Dealer::new();
        for callee in [10, 11, 12] {
            dealer
                .register(callee, "com.rr", &shared(InvocationPolicy::Roundrobin))
                .unwrap();
        }
        let from = caller(1);
        let targets: Vec<SessionId> = (1..=4)
            .map(|req| route(&dealer, &from, req, "com.rr").delivery.to)
            .collect();
        assert_eq!(targets, vec![10, 11, 12, 10]);
    }

    #[test]
    fn test_roundrobin_cursor_survives_membership_changes() {
        let dealer = Dealer::new();
        let id = dealer
            .register(10, "com.rr", &shared(InvocationPolicy::Roundrobin))
            .unwrap()
            .info
            .id;
        dealer.register(11, "com.rr", &shared(InvocationPolicy::Roundrobin)).unwrap();
        dealer.register(12, "com.rr", &shared(InvocationPolicy::Roundrobin)).unwrap();
        let from = caller(1);

        assert_eq!(route(&dealer, &from, 1, "com.rr").delivery.to, 10);
        // next is 11; removing 10 (before the cursor) keeps 11 next
        dealer.unregister(10, id).unwrap();
        assert_eq!(route(&dealer, &from, 2, "com.rr").delivery.to, 11);
        // a joining callee goes to the end of the rotation
        dealer.register(13, "com.rr", &shared(InvocationPolicy::Roundrobin)).unwrap();
        assert_eq!(route(&dealer, &from, 3, "com.rr").delivery.to, 12);
        assert_eq!(route(&dealer, &from, 4, "com.rr").delivery.to, 13);
        assert_eq!(route(&dealer, &from, 5, "com.rr").delivery.to, 11);
    }

    #[test]
    fn test_first_and_last_follow_registration_order() {
        let dealer = Dealer::new();
        for callee in [30, 10, 20] {
            dealer.register(callee, "com.first", &shared(InvocationPolicy::First)).unwrap();
            dealer.register(callee, "com.last", &shared(InvocationPolicy::Last)).unwrap();
        }
        let from = caller(1);
        assert_eq!(route(&dealer, &from, 1, "com.first").delivery.to, 30);
        assert_eq!(route(&dealer, &from, 2, "com.last").delivery.to, 20);
    }

    #[test]
    fn test_random_picks_a_current_callee() {
        let dealer = Dealer::new();
        for callee in [10, 11] {
            dealer.register(callee, "com.rnd", &shared(InvocationPolicy::Random)).unwrap();
        }
        let from = caller(1);
        for req in 1..20 {
            let to = route(&dealer, &from, req, "com.rnd").delivery.to;
            assert!(to == 10 || to == 11);
        }
    }

    #[test]
    fn test_no_such_procedure() {
        let dealer = Dealer::new();
        let options = CallOptions::default();
        let from = caller(1);
        let err = dealer
            .call(CallRequest {
                caller: &from,
                request: 1,
                procedure: "com.missing",
                options: &options,
                payload: Payload::default(),
                disclose: false,
            })
            .unwrap_err();
        assert!(matches!(err, RoutingError::NoSuchProcedure(_)));
    }

    #[test]
    fn test_prefix_registration_reports_procedure() {
        let dealer = Dealer::new();
        dealer
            .register(10, "com.api", &RegisterOptions::default().with_match(MatchPolicy::Prefix))
            .unwrap();
        let routed = route(&dealer, &caller(1), 1, "com.api.users.get");
        let Message::Invocation { details, .. } = routed.delivery.message else {
            panic!("expected INVOCATION");
        };
        assert_eq!(details.procedure.as_deref(), Some("com.api.users.get"));
        assert_eq!(details.caller, None);
    }

    #[test]
    fn test_yield_completes_and_late_yield_is_dropped() {
        let dealer = Dealer::new();
        dealer.register(10, "com.add", &RegisterOptions::default()).unwrap();
        let routed = route(&dealer, &caller(1), 7, "com.add");

        let result = dealer
            .yield_result(10, routed.invocation, &YieldOptions::default(), Payload::single(json!(3)))
            .unwrap();
        assert_eq!(result.delivery.to, 1);
        assert!(result.elapsed.is_some());
        assert!(matches!(result.delivery.message, Message::Result { request: 7, .. }));
        assert_eq!(dealer.invocation_count(), 0);

        assert!(dealer
            .yield_result(10, routed.invocation, &YieldOptions::default(), Payload::default())
            .is_none());
    }

    #[test]
    fn test_progressive_results() {
        let dealer = Dealer::new();
        dealer.register(10, "com.stream", &RegisterOptions::default()).unwrap();
        let options = CallOptions::default().with_receive_progress();
        let from = caller(1);
        let routed = dealer
            .call(CallRequest {
                caller: &from,
                request: 5,
                procedure: "com.stream",
                options: &options,
                payload: Payload::default(),
                disclose: false,
            })
            .unwrap();

        let progress = YieldOptions { progress: true };
        for _ in 0..3 {
            let partial = dealer
                .yield_result(10, routed.invocation, &progress, Payload::default())
                .unwrap();
            assert!(partial.elapsed.is_none());
            assert!(matches!(
                partial.delivery.message,
                Message::Result {
                    details: ResultDetails { progress: true },
                    ..
                }
            ));
        }
        assert_eq!(dealer.invocation_count(), 1);

        let last = dealer
            .yield_result(10, routed.invocation, &YieldOptions::default(), Payload::default())
            .unwrap();
        assert!(last.elapsed.is_some());
        assert_eq!(dealer.invocation_count(), 0);
    }

    #[test]
    fn test_yield_from_wrong_session_is_ignored() {
        let dealer = Dealer::new();
        dealer.register(10, "com.add", &RegisterOptions::default()).unwrap();
        let routed = route(&dealer, &caller(1), 1, "com.add");
        assert!(dealer
            .yield_result(99, routed.invocation, &YieldOptions::default(), Payload::default())
            .is_none());
        assert_eq!(dealer.invocation_count(), 1);
    }

    #[test]
    fn test_cancel_modes() {
        let dealer = Dealer::new();
        dealer.register(10, "com.slow", &RegisterOptions::default()).unwrap();
        let from = caller(1);

        route(&dealer, &from, 1, "com.slow");
        let out = dealer.cancel(1, 1, CancelMode::Skip);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, 1);
        assert_eq!(dealer.invocation_count(), 0);

        let routed = route(&dealer, &from, 2, "com.slow");
        let out = dealer.cancel(1, 2, CancelMode::Kill);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, 10);
        assert!(matches!(out[0].message, Message::Interrupt { .. }));
        assert!(dealer.cancel(1, 2, CancelMode::Kill).is_empty());
        assert_eq!(dealer.invocation_count(), 1);
        let error = dealer
            .invocation_error(
                10,
                routed.invocation,
                Kwargs::new(),
                "wamp.error.canceled".to_string(),
                Payload::default(),
            )
            .unwrap();
        assert_eq!(error.to, 1);

        route(&dealer, &from, 3, "com.slow");
        let out = dealer.cancel(1, 3, CancelMode::KillNoWait);
        let targets: Vec<SessionId> = out.iter().map(|d| d.to).collect();
        assert_eq!(targets, vec![10, 1]);
        assert_eq!(dealer.invocation_count(), 0);
    }

    #[test]
    fn test_expire() {
        let dealer = Dealer::new();
        dealer.register(10, "com.slow", &RegisterOptions::default()).unwrap();
        let options = CallOptions::default().with_timeout(100);
        let from = caller(1);
        let routed = dealer
            .call(CallRequest {
                caller: &from,
                request: 9,
                procedure: "com.slow",
                options: &options,
                payload: Payload::default(),
                disclose: false,
            })
            .unwrap();
        assert_eq!(routed.timeout, Some(Duration::from_millis(100)));

        let out = dealer.expire(routed.invocation);
        assert_eq!(out.len(), 2);
        match &out[0].message {
            Message::Error { request, error, .. } => {
                assert_eq!(*request, 9);
                assert_eq!(error, "wamp.error.timeout");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(dealer.expire(routed.invocation).is_empty());
    }

    #[test]
    fn test_remove_session_cleans_both_sides() {
        let dealer = Dealer::new();
        dealer.register(10, "com.a", &RegisterOptions::default()).unwrap();
        dealer.register(20, "com.b", &RegisterOptions::default()).unwrap();

        // 10 calls com.b, 1 calls com.a
        route(&dealer, &caller(10), 1, "com.b");
        route(&dealer, &caller(1), 1, "com.a");

        let cleanup = dealer.remove_session(10);
        assert_eq!(cleanup.unregistered.len(), 1);
        assert!(cleanup.unregistered[0].deleted);
        assert_eq!(dealer.count(), 1);
        assert_eq!(dealer.invocation_count(), 0);

        let targets: Vec<SessionId> = cleanup.deliveries.iter().map(|d| d.to).collect();
        assert!(targets.contains(&20));
        assert!(targets.contains(&1));
    }

    #[test]
    fn test_duplicate_request_id_is_a_violation() {
        let dealer = Dealer::new();
        dealer.register(10, "com.a", &RegisterOptions::default()).unwrap();
        let from = caller(1);
        route(&dealer, &from, 1, "com.a");
        let options = CallOptions::default();
        assert!(matches!(
            dealer.call(CallRequest {
                caller: &from,
                request: 1,
                procedure: "com.a",
                options: &options,
                payload: Payload::default(),
                disclose: false,
            }),
            Err(RoutingError::ProtocolViolation(_))
        ));
    }
}
