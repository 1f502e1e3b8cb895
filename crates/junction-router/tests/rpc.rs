mod common;

use common::TestClient;
use junction_core::{
    CallOptions, CancelMode, CancelOptions, InvocationPolicy, Kwargs, MatchPolicy, Message,
    MessageKind, Payload, RegisterOptions, YieldOptions,
};
use junction_router::Router;
use serde_json::json;
use std::time::{Duration, Instant};

async fn yield_value(callee: &TestClient, request: u64, value: serde_json::Value) {
    callee
        .send(Message::Yield {
            request,
            options: YieldOptions::default(),
            payload: Payload::single(value),
        })
        .await;
}

async fn expect_result(caller: &mut TestClient, request: u64) -> Payload {
    match caller.recv().await {
        Message::Result {
            request: r,
            payload,
            details,
        } if r == request && !details.progress => payload,
        other => panic!("expected final RESULT for {}, got {:?}", request, other),
    }
}

#[tokio::test]
async fn test_call_and_yield() {
    let router = Router::default();
    let mut callee = TestClient::join(&router, "realm1", "callee").await;
    let mut caller = TestClient::join(&router, "realm1", "caller").await;
    let registration = callee
        .register("com.example.add", RegisterOptions::default())
        .await;

    let request = caller
        .call(
            "com.example.add",
            CallOptions::default(),
            Payload::args(vec![json!(2), json!(3)]),
        )
        .await;

    let (invocation, reg, payload) = callee.expect_invocation().await;
    assert_eq!(reg, registration);
    assert_eq!(payload.args, vec![json!(2), json!(3)]);

    yield_value(&callee, invocation, json!(5)).await;
    assert_eq!(expect_result(&mut caller, request).await.args, vec![json!(5)]);
}

#[tokio::test]
async fn test_call_unknown_procedure() {
    let router = Router::default();
    let mut caller = TestClient::join(&router, "realm1", "caller").await;
    let request = caller
        .call("com.example.nothing", CallOptions::default(), Payload::default())
        .await;
    match caller.recv().await {
        Message::Error {
            request_type,
            request: r,
            error,
            ..
        } => {
            assert_eq!(request_type, MessageKind::Call);
            assert_eq!(r, request);
            assert_eq!(error, "wamp.error.no_such_procedure");
        }
        other => panic!("expected ERROR, got {:?}", other),
    }
}

#[tokio::test]
async fn test_single_registration_is_exclusive() {
    let router = Router::default();
    let mut first = TestClient::join(&router, "realm1", "first").await;
    let mut second = TestClient::join(&router, "realm1", "second").await;
    first
        .register("com.example.only", RegisterOptions::default())
        .await;

    let request = second.request();
    second
        .send(Message::Register {
            request,
            options: RegisterOptions::default(),
            procedure: "com.example.only".to_string(),
        })
        .await;
    assert_eq!(
        second.expect_error().await,
        (request, "wamp.error.procedure_already_exists".to_string())
    );

    let request = second.request();
    second
        .send(Message::Register {
            request,
            options: RegisterOptions::default().with_invoke(InvocationPolicy::Roundrobin),
            procedure: "com.example.only".to_string(),
        })
        .await;
    let (r, error) = second.expect_error().await;
    assert_eq!(r, request);
    assert!(
        error == "wamp.error.procedure_already_exists"
            || error == "wamp.error.procedure_exists_with_different_invocation_policy"
    );
}

#[tokio::test]
async fn test_roundrobin_rotates_callees() {
    let router = Router::default();
    let shared = RegisterOptions::default().with_invoke(InvocationPolicy::Roundrobin);
    let mut a = TestClient::join(&router, "realm1", "a").await;
    let mut b = TestClient::join(&router, "realm1", "b").await;
    let mut c = TestClient::join(&router, "realm1", "c").await;
    let mut caller = TestClient::join(&router, "realm1", "caller").await;

    let registration = a.register("com.example.rr", shared.clone()).await;
    assert_eq!(b.register("com.example.rr", shared.clone()).await, registration);
    assert_eq!(c.register("com.example.rr", shared.clone()).await, registration);

    let mut served = Vec::new();
    for round in 0..4 {
        let request = caller
            .call("com.example.rr", CallOptions::default(), Payload::default())
            .await;

        let mut handled = false;
        for (name, callee) in [("a", &mut a), ("b", &mut b), ("c", &mut c)] {
            if let Some(Message::Invocation { request: inv, .. }) = callee.try_recv(200).await {
                yield_value(callee, inv, json!(round)).await;
                served.push(name);
                handled = true;
                break;
            }
        }
        assert!(handled, "round {} was not invoked", round);
        assert_eq!(expect_result(&mut caller, request).await.args, vec![json!(round)]);
    }

    assert_eq!(served, vec!["a", "b", "c", "a"]);
}

#[tokio::test]
async fn test_prefix_registration_reports_procedure() {
    let router = Router::default();
    let mut callee = TestClient::join(&router, "realm1", "callee").await;
    let mut caller = TestClient::join(&router, "realm1", "caller").await;
    callee
        .register(
            "com.example.math",
            RegisterOptions::default().with_match(MatchPolicy::Prefix),
        )
        .await;

    caller
        .call("com.example.math.mul", CallOptions::default(), Payload::default())
        .await;
    match callee.recv().await {
        Message::Invocation { details, .. } => {
            assert_eq!(details.procedure.as_deref(), Some("com.example.math.mul"));
        }
        other => panic!("expected INVOCATION, got {:?}", other),
    }
}

#[tokio::test]
async fn test_timeout_and_late_yield() {
    let router = Router::default();
    let mut callee = TestClient::join(&router, "realm1", "callee").await;
    let mut caller = TestClient::join(&router, "realm1", "caller").await;
    callee
        .register("com.example.slow", RegisterOptions::default())
        .await;

    let started = Instant::now();
    let request = caller
        .call(
            "com.example.slow",
            CallOptions::default().with_timeout(100),
            Payload::default(),
        )
        .await;
    let (invocation, _, _) = callee.expect_invocation().await;

    assert_eq!(
        caller.expect_error().await,
        (request, "wamp.error.timeout".to_string())
    );
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(90) && elapsed < Duration::from_millis(500),
        "timed out after {:?}",
        elapsed
    );
    match callee.recv().await {
        Message::Interrupt { request, options } => {
            assert_eq!(request, invocation);
            assert_eq!(options.mode, CancelMode::KillNoWait);
        }
        other => panic!("expected INTERRUPT, got {:?}", other),
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    yield_value(&callee, invocation, json!("late")).await;
    caller.expect_silence().await;
}

#[tokio::test]
async fn test_cancel_kill_waits_for_callee() {
    let router = Router::default();
    let mut callee = TestClient::join(&router, "realm1", "callee").await;
    let mut caller = TestClient::join(&router, "realm1", "caller").await;
    callee
        .register("com.example.long", RegisterOptions::default())
        .await;

    let request = caller
        .call("com.example.long", CallOptions::default(), Payload::default())
        .await;
    let (invocation, _, _) = callee.expect_invocation().await;

    caller
        .send(Message::Cancel {
            request,
            options: CancelOptions::with_mode(CancelMode::Kill),
        })
        .await;
    match callee.recv().await {
        Message::Interrupt { request, options } => {
            assert_eq!(request, invocation);
            assert_eq!(options.mode, CancelMode::Kill);
        }
        other => panic!("expected INTERRUPT, got {:?}", other),
    }
    caller.expect_silence().await;

    callee
        .send(Message::Error {
            request_type: MessageKind::Invocation,
            request: invocation,
            details: Kwargs::new(),
            error: "wamp.error.canceled".to_string(),
            payload: Payload::default(),
        })
        .await;
    assert_eq!(
        caller.expect_error().await,
        (request, "wamp.error.canceled".to_string())
    );
}

#[tokio::test]
async fn test_cancel_skip_answers_immediately() {
    let router = Router::default();
    let mut callee = TestClient::join(&router, "realm1", "callee").await;
    let mut caller = TestClient::join(&router, "realm1", "caller").await;
    callee
        .register("com.example.long", RegisterOptions::default())
        .await;

    let request = caller
        .call("com.example.long", CallOptions::default(), Payload::default())
        .await;
    let (invocation, _, _) = callee.expect_invocation().await;

    caller
        .send(Message::Cancel {
            request,
            options: CancelOptions::with_mode(CancelMode::Skip),
        })
        .await;
    assert_eq!(
        caller.expect_error().await,
        (request, "wamp.error.canceled".to_string())
    );
    callee.expect_silence().await;

    yield_value(&callee, invocation, json!(1)).await;
    caller.expect_silence().await;
}

#[tokio::test]
async fn test_progressive_results() {
    let router = Router::default();
    let mut callee = TestClient::join(&router, "realm1", "callee").await;
    let mut caller = TestClient::join(&router, "realm1", "caller").await;
    callee
        .register("com.example.stream", RegisterOptions::default())
        .await;

    let request = caller
        .call(
            "com.example.stream",
            CallOptions::default().with_receive_progress(),
            Payload::default(),
        )
        .await;
    let (invocation, _, _) = callee.expect_invocation().await;

    callee
        .send(Message::Yield {
            request: invocation,
            options: YieldOptions { progress: true },
            payload: Payload::single(json!(1)),
        })
        .await;
    match caller.recv().await {
        Message::Result {
            request: r,
            details,
            payload,
        } => {
            assert_eq!(r, request);
            assert!(details.progress);
            assert_eq!(payload.args, vec![json!(1)]);
        }
        other => panic!("expected progressive RESULT, got {:?}", other),
    }

    yield_value(&callee, invocation, json!(2)).await;
    assert_eq!(expect_result(&mut caller, request).await.args, vec![json!(2)]);
}

#[tokio::test]
async fn test_callee_leaving_fails_pending_call() {
    let router = Router::default();
    let mut callee = TestClient::join(&router, "realm1", "callee").await;
    let mut caller = TestClient::join(&router, "realm1", "caller").await;
    callee
        .register("com.example.fragile", RegisterOptions::default())
        .await;

    let request = caller
        .call("com.example.fragile", CallOptions::default(), Payload::default())
        .await;
    callee.expect_invocation().await;

    callee
        .send(Message::Goodbye {
            details: Default::default(),
            reason: junction_core::close::NORMAL.to_string(),
        })
        .await;
    assert_eq!(
        caller.expect_error().await,
        (request, "wamp.error.canceled".to_string())
    );

    let request = caller
        .call("com.example.fragile", CallOptions::default(), Payload::default())
        .await;
    assert_eq!(
        caller.expect_error().await,
        (request, "wamp.error.no_such_procedure".to_string())
    );
}
