//! End-to-end tests over the in-memory wiring: the JSON-RPC router, the
//! tool surface, the composite checks, and the HTTP layer.


use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use warden_types::{RuleCategory, Severity};

use test_utils::{IDE_KEY, MCP_KEY, TestContext, rule, test_config};
use warden::mcp::router::PROTOCOL_VERSION;
use warden::session::OutboundFrame;
use warden::stores::ScopeStore;
use warden::web::{mcp_router, web_router};

// ============================================================================
// Scenario 1: bash guard
// ============================================================================

#[tokio::test]
async fn test_bash_guard_denies_force_push() {
    let ctx = TestContext::new();
    ctx.seed_rule(rule(
        "PREVENT-GIT-001",
        RuleCategory::Bash,
        r"git\s+push\s+--force(?!-with-lease)",
        Severity::Error,
    ))
    .await;
    ctx.seed_project("p", &["PREVENT-GIT-001"]);

    let session = ctx.open_session();
    ctx.init_session(&session, "p").await;

    let verdict = ctx
        .call_tool(
            &session,
            "guardrail_validate_bash",
            json!({"command": "git push --force origin main"}),
        )
        .await
        .unwrap();

    assert_eq!(verdict["valid"], json!(false));
    let violation = &verdict["violations"][0];
    assert_eq!(violation["rule_id"], json!("PREVENT-GIT-001"));
    assert_eq!(violation["severity"], json!("error"));
    assert_eq!(violation["line"], json!(1));
    assert_eq!(violation["column"], json!(1));
}

// ============================================================================
// Scenario 2: read before edit
// ============================================================================

#[tokio::test]
async fn test_read_before_edit() {
    let ctx = TestContext::new();
    ctx.seed_project("p", &[]);
    let session = ctx.open_session();
    ctx.init_session(&session, "p").await;

    let denied = ctx
        .call_tool(
            &session,
            "guardrail_validate_file_edit",
            json!({"file_path": "src/a.go", "new_content": "package a"}),
        )
        .await
        .unwrap();
    assert_eq!(denied["valid"], json!(false));
    assert_eq!(denied["violations"][0]["code"], json!("read_before_edit"));
    assert_eq!(denied["violations"][0]["file_path"], json!("src/a.go"));

    let read = ctx
        .call_tool(
            &session,
            "guardrail_record_file_read",
            json!({"file_path": "src/a.go"}),
        )
        .await
        .unwrap();
    assert_eq!(read["first_read"], json!(true));

    let allowed = ctx
        .call_tool(
            &session,
            "guardrail_validate_file_edit",
            json!({"file_path": "src/a.go", "new_content": "package a"}),
        )
        .await
        .unwrap();
    assert_eq!(allowed["valid"], json!(true));
}

#[tokio::test]
async fn test_record_file_read_idempotent() {
    let ctx = TestContext::new();
    ctx.seed_project("p", &[]);
    let session = ctx.open_session();
    ctx.init_session(&session, "p").await;

    let first = ctx
        .call_tool(&session, "guardrail_record_file_read", json!({"file_path": "a.rs"}))
        .await
        .unwrap();
    let second = ctx
        .call_tool(&session, "guardrail_record_file_read", json!({"file_path": "a.rs"}))
        .await
        .unwrap();
    assert_eq!(first["first_read"], json!(true));
    assert_eq!(second["first_read"], json!(false));
}

// ============================================================================
// Scenario 3: scope enforcement
// ============================================================================

#[tokio::test]
async fn test_scope_enforcement_persists_file_change() {
    let ctx = TestContext::new();
    ctx.seed_project("p", &[]);
    let session = ctx.open_session();
    ctx.init_session(&session, "p").await;

    ctx.call_tool(
        &session,
        "guardrail_declare_scope",
        json!({
            "scope_description": "server-side work",
            "affected_files": ["src/**"],
        }),
    )
    .await
    .unwrap();
    ctx.call_tool(
        &session,
        "guardrail_record_file_read",
        json!({"file_path": "tests/unit_test.go"}),
    )
    .await
    .unwrap();

    let denied = ctx
        .call_tool(
            &session,
            "guardrail_validate_file_edit",
            json!({"file_path": "tests/unit_test.go", "old_content": "a", "new_content": "b"}),
        )
        .await
        .unwrap();
    assert_eq!(denied["valid"], json!(false));
    assert!(
        denied["violations"]
            .as_array()
            .unwrap()
            .iter()
            .any(|v| v["code"] == json!("scope_violation")
                && v["file_path"] == json!("tests/unit_test.go"))
    );

    let changes = ctx
        .stores
        .scope
        .session_changes(&session.id)
        .await
        .unwrap();
    assert_eq!(changes.len(), 1);
    assert!(!changes[0].is_within_scope);
}

// ============================================================================
// Scenario 4: three strikes
// ============================================================================

#[tokio::test]
async fn test_three_strikes_then_halt_acknowledgment() {
    let ctx = TestContext::new();
    ctx.seed_project("p", &[]);
    let session = ctx.open_session();
    ctx.init_session(&session, "p").await;

    ctx.call_tool(
        &session,
        "guardrail_declare_scope",
        json!({
            "scope_description": "task T1",
            "affected_files": [],
            "task_id": "T1",
        }),
    )
    .await
    .unwrap();

    for expected in 1..=3 {
        let result = ctx
            .call_tool(
                &session,
                "guardrail_record_attempt",
                json!({"task_id": "T1", "error_category": "runtime", "error_message": "boom"}),
            )
            .await
            .unwrap();
        assert_eq!(result["attempt_number"], json!(expected));
    }

    let denied = ctx
        .call_tool(&session, "guardrail_validate_bash", json!({"command": "ls"}))
        .await
        .unwrap();
    assert_eq!(denied["valid"], json!(false));
    assert_eq!(denied["violations"][0]["code"], json!("must_escalate"));

    let halt = ctx
        .call_tool(
            &session,
            "guardrail_raise_halt",
            json!({"halt_type": "uncertainty", "severity": "high"}),
        )
        .await
        .unwrap();
    let halt_id = halt["halt_id"].as_str().unwrap().to_string();
    ctx.call_tool(
        &session,
        "guardrail_resolve_halt",
        json!({"halt_id": halt_id, "resolution": "resolved"}),
    )
    .await
    .unwrap();

    let allowed = ctx
        .call_tool(&session, "guardrail_validate_bash", json!({"command": "ls"}))
        .await
        .unwrap();
    assert_eq!(allowed["valid"], json!(true));
}

// ============================================================================
// Scenario 5: breaker trip
// ============================================================================

#[tokio::test]
async fn test_breaker_trip_surfaces_dependency_unavailable() {
    let ctx = TestContext::with_dead_database();
    let session = ctx.open_session();
    // Bind directly; init_session itself would fail on the dead store.
    session
        .bind_project(warden::session::ProjectBinding {
            slug: "p".into(),
            guardrail_context: String::new(),
        })
        .unwrap();

    // trip_threshold is 2 in the test config.
    for _ in 0..2 {
        let response = ctx
            .rpc(
                &session,
                json!({
                    "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                    "params": {"name": "guardrail_validate_bash", "arguments": {"command": "ls"}}
                }),
            )
            .await
            .unwrap();
        assert!(response.get("error").is_some());
    }

    let response = ctx
        .rpc(
            &session,
            json!({
                "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                "params": {"name": "guardrail_validate_bash", "arguments": {"command": "ls"}}
            }),
        )
        .await
        .unwrap();
    assert_eq!(response["error"]["code"], json!(-32002));

    // Rate limiting keeps functioning on its own backend.
    let decision = ctx
        .state
        .limiter
        .check(warden::auth::LimitClass::Session, &session.id)
        .await;
    assert!(decision.allowed);

    // Readiness reports the database component unhealthy.
    let response = web_router(ctx.state.clone())
        .oneshot(
            Request::builder()
                .uri("/health/ready")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&body).unwrap();
    let database = body["components"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["name"] == json!("database"))
        .unwrap();
    assert_eq!(database["status"], json!("unhealthy"));
}

// ============================================================================
// Scenario 6: transport lifecycle
// ============================================================================

#[tokio::test]
async fn test_initialize_roundtrip_preserves_id_and_order() {
    let ctx = TestContext::new();
    ctx.seed_project("p", &[]);
    let session = ctx.open_session();

    let response = ctx
        .rpc(
            &session,
            json!({"jsonrpc": "2.0", "id": "init-1", "method": "initialize", "params": {}}),
        )
        .await
        .unwrap();
    assert_eq!(response["id"], json!("init-1"));
    assert_eq!(response["result"]["protocolVersion"], json!(PROTOCOL_VERSION));

    // Notifications produce no response.
    let none = ctx
        .rpc(
            &session,
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .await;
    assert!(none.is_none());

    // Unknown method: -32601.
    let response = ctx
        .rpc(&session, json!({"jsonrpc": "2.0", "id": 9, "method": "no/such"}))
        .await
        .unwrap();
    assert_eq!(response["error"]["code"], json!(-32601));
}

#[tokio::test]
async fn test_dispatcher_preserves_request_order() {
    let ctx = TestContext::new();
    ctx.seed_project("p", &[]);
    let session = ctx.open_session();

    for id in 1..=3 {
        session
            .inbound
            .try_send(warden::session::InboundMessage {
                payload: json!({"jsonrpc": "2.0", "id": id, "method": "ping"}),
                meta: ctx.meta(),
            })
            .unwrap();
    }

    for expected in 1..=3 {
        let frame = tokio::time::timeout(Duration::from_secs(2), session.outbound.pop())
            .await
            .expect("frame in time")
            .expect("frame");
        match frame {
            OutboundFrame::Response(value) => assert_eq!(value["id"], json!(expected)),
            OutboundFrame::Notification(_) => panic!("unexpected notification"),
        }
    }
}

#[tokio::test]
async fn test_sse_stream_bootstraps_with_endpoint_event() {
    let ctx = TestContext::new();
    let response = mcp_router(ctx.state.clone())
        .oneshot(
            Request::builder()
                .uri("/mcp/v1/sse")
                .header("authorization", format!("Bearer {MCP_KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");
    assert_eq!(response.headers().get("x-accel-buffering").unwrap(), "no");

    let mut body = response.into_body();
    let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
        .await
        .expect("first frame in time")
        .expect("stream open")
        .expect("frame ok");
    let data = String::from_utf8_lossy(frame.data_ref().expect("data frame")).to_string();
    assert!(data.starts_with("event: endpoint"), "got: {data}");
    assert!(data.contains("/mcp/v1/message?session_id="), "got: {data}");
}

#[tokio::test]
async fn test_message_endpoint_accepts_and_delivers_on_stream() {
    let ctx = TestContext::new();
    ctx.seed_project("p", &[]);
    let session = ctx.open_session();

    let request = Request::builder()
        .method("POST")
        .uri(format!("/mcp/v1/message?session_id={}", session.id))
        .header("authorization", format!("Bearer {MCP_KEY}"))
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"jsonrpc": "2.0", "id": 42, "method": "ping"}).to_string(),
        ))
        .unwrap();
    let response = mcp_router(ctx.state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let frame = tokio::time::timeout(Duration::from_secs(2), session.outbound.pop())
        .await
        .expect("frame in time")
        .expect("frame");
    match frame {
        OutboundFrame::Response(value) => {
            assert_eq!(value["id"], json!(42));
            assert_eq!(value["result"], json!({}));
        }
        OutboundFrame::Notification(_) => panic!("unexpected notification"),
    }
}

#[tokio::test]
async fn test_shutdown_refuses_new_work() {
    let ctx = TestContext::new();
    let session = ctx.open_session();

    ctx.state.sessions.stop_accepting();
    ctx.state.shutdown.cancel();

    // New SSE streams are refused.
    let response = mcp_router(ctx.state.clone())
        .oneshot(
            Request::builder()
                .uri("/mcp/v1/sse")
                .header("authorization", format!("Bearer {MCP_KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    // New messages for existing sessions are refused too.
    let response = mcp_router(ctx.state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/mcp/v1/message?session_id={}", session.id))
                .header("authorization", format!("Bearer {MCP_KEY}"))
                .body(Body::from(
                    json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// ============================================================================
// Auth, rate limiting, audit
// ============================================================================

#[tokio::test]
async fn test_auth_required_on_mcp_endpoints() {
    let ctx = TestContext::new();

    let response = mcp_router(ctx.state.clone())
        .oneshot(
            Request::builder()
                .uri("/mcp/v1/sse")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = mcp_router(ctx.state.clone())
        .oneshot(
            Request::builder()
                .uri("/mcp/v1/sse")
                .header("authorization", "Bearer wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // IDE key authenticates too.
    let response = mcp_router(ctx.state.clone())
        .oneshot(
            Request::builder()
                .uri("/mcp/v1/sse")
                .header("authorization", format!("Bearer {IDE_KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_and_version_need_no_auth() {
    let ctx = TestContext::new();
    let router = web_router(ctx.state.clone());

    for path in ["/health/live", "/health/ready", "/version", "/metrics"] {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_ne!(response.status(), StatusCode::UNAUTHORIZED, "{path}");
    }
}

#[tokio::test]
async fn test_http_rate_limit_returns_429_with_retry_after() {
    let mut config = test_config();
    config.rate_limit.mcp = 2;
    config.rate_limit.burst_factor = 1.0;
    let ctx = TestContext::with_config(config);
    let router = mcp_router(ctx.state.clone());

    let request = || {
        Request::builder()
            .method("POST")
            .uri("/mcp/v1/message?session_id=none")
            .header("authorization", format!("Bearer {MCP_KEY}"))
            .body(Body::from(
                json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}).to_string(),
            ))
            .unwrap()
    };

    for _ in 0..2 {
        let response = router.clone().oneshot(request()).await.unwrap();
        // 404 (unknown session): the budget was consumed, not rejected.
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
    let response = router.clone().oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
}

#[tokio::test]
async fn test_session_rate_limit_maps_to_jsonrpc_code() {
    let mut config = test_config();
    config.rate_limit.session = 1;
    config.rate_limit.burst_factor = 1.0;
    let ctx = TestContext::with_config(config);
    ctx.seed_project("p", &[]);
    let session = ctx.open_session();

    let call = |id: u64| {
        json!({
            "jsonrpc": "2.0", "id": id, "method": "tools/call",
            "params": {"name": "guardrail_init_session", "arguments": {"project_slug": "p"}}
        })
    };
    let first = ctx.rpc(&session, call(1)).await.unwrap();
    assert!(first.get("error").is_none(), "unexpected: {first}");

    let second = ctx.rpc(&session, call(2)).await.unwrap();
    assert_eq!(second["error"]["code"], json!(-32001));
    assert!(second["error"]["data"]["retry_after_secs"].is_number());
}

#[tokio::test]
async fn test_every_tool_call_emits_one_audit_event() {
    let ctx = TestContext::new();
    ctx.seed_project("p", &[]);
    let session = ctx.open_session();
    ctx.init_session(&session, "p").await;
    ctx.call_tool(&session, "guardrail_validate_bash", json!({"command": "ls"}))
        .await
        .unwrap();

    // Audit pipeline flushes on a 250ms interval.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let events = ctx.stores.audit.events();
    assert_eq!(events.len(), 2, "init_session + validate_bash");
    let actions: Vec<_> = events.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(
        actions,
        vec!["guardrail_init_session", "guardrail_validate_bash"]
    );
    for event in &events {
        assert!(!event.request_id.is_empty());
        assert!(!event.correlation_id.is_empty());
        assert_eq!(event.actor, "test-actor");
        assert_eq!(event.resource.as_deref(), Some("p"));
    }
}

// ============================================================================
// Session conflict and uninitialized access
// ============================================================================

#[tokio::test]
async fn test_init_session_conflict_and_uninitialized_guard() {
    let ctx = TestContext::new();
    ctx.seed_project("alpha", &[]);
    ctx.seed_project("beta", &[]);
    let session = ctx.open_session();

    // Tools refuse to run before init.
    let err = ctx
        .call_tool(&session, "guardrail_validate_bash", json!({"command": "ls"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "precondition_failed");

    ctx.init_session(&session, "alpha").await;
    // Same project again: fine.
    ctx.init_session(&session, "alpha").await;

    let err = ctx
        .call_tool(
            &session,
            "guardrail_init_session",
            json!({"project_slug": "beta"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "precondition_failed");
    assert!(err.user_message().contains("session_conflict"));
}

#[tokio::test]
async fn test_session_teardown_leaves_no_transient_state() {
    let ctx = TestContext::new();
    ctx.seed_project("p", &[]);
    let session = ctx.open_session();
    ctx.init_session(&session, "p").await;
    ctx.call_tool(
        &session,
        "guardrail_record_file_read",
        json!({"file_path": "src/a.rs"}),
    )
    .await
    .unwrap();

    ctx.state
        .sessions
        .teardown(&session.id, &ctx.state.stores, &ctx.state.cache)
        .await;

    assert!(ctx.state.sessions.get(&session.id).is_none());
    use warden::stores::FileReadStore;
    assert!(
        !ctx.stores
            .file_reads
            .has_read(&session.id, "src/a.rs")
            .await
            .unwrap()
    );
}
