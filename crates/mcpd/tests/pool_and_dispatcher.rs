use std::sync::Arc;

use mcpd::catalog::{CatalogSource, StaticCatalog};
use mcpd::id::ServerId;
use mcpd::pool::Pool;
use mcpd::session::MCPSession;
use mcpd::spec::ServerSpec;
use mcpd::test_support::write_fake_mcp_server;

fn spec_for(path: &std::path::Path) -> ServerSpec {
    ServerSpec::new(path.to_string_lossy().to_string(), Vec::new())
}

/// Two concurrent `start(i, spec)` calls create at most one session, and
/// both callers observe the same `Arc`.
#[tokio::test]
async fn concurrent_start_creates_one_session() {
    let (_dir, script) = write_fake_mcp_server("concurrent");
    let spec = spec_for(&script);
    let id = ServerId::from_command(&spec.command, &spec.args);
    let pool = Arc::new(Pool::new());

    let (a, b) = tokio::join!(
        pool.start(id.clone(), spec.clone(), false),
        pool.start(id.clone(), spec.clone(), false),
    );
    let a = a.expect("first start");
    let b = b.expect("second start");
    assert!(Arc::ptr_eq(&a, &b), "concurrent starts must reuse one session");
    assert_eq!(pool.list_ids().await, vec![id]);
}

/// `start(i) ; stop(i) ; start(i)` is observationally equivalent to `start(i)`:
/// a fresh session is created, and the pool again holds exactly one entry.
#[tokio::test]
async fn start_stop_start_round_trips() {
    let (_dir, script) = write_fake_mcp_server("round-trip");
    let spec = spec_for(&script);
    let id = ServerId::from_command(&spec.command, &spec.args);
    let pool = Pool::new();

    let first = pool.start(id.clone(), spec.clone(), false).await.expect("start");
    pool.stop(&id).await;
    assert!(pool.get(&id).await.is_none());

    let second = pool.start(id.clone(), spec.clone(), false).await.expect("restart");
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(pool.list_ids().await, vec![id]);
}

/// `stop(i)` on an unknown id succeeds (no-op) rather than erroring.
#[tokio::test]
async fn stop_unknown_id_is_a_no_op() {
    let pool = Pool::new();
    let bogus = ServerId::from_command("nonexistent-binary", &[]);
    pool.stop(&bogus).await;
    assert!(pool.get(&bogus).await.is_none());
}

/// `list-all` after `start(A); start(B)` contains exactly `{A, B}`.
#[tokio::test]
async fn list_all_contains_exactly_started_ids() {
    let (_dir_a, script_a) = write_fake_mcp_server("a");
    let (_dir_b, script_b) = write_fake_mcp_server("b");
    let spec_a = spec_for(&script_a);
    let spec_b = spec_for(&script_b);
    let id_a = ServerId::from_command(&spec_a.command, &spec_a.args);
    let id_b = ServerId::from_command(&spec_b.command, &spec_b.args);
    let pool = Pool::new();

    pool.start(id_a.clone(), spec_a, false).await.expect("start a");
    pool.start(id_b.clone(), spec_b, false).await.expect("start b");

    let mut ids = pool.list_ids().await;
    ids.sort();
    let mut expected = vec![id_a, id_b];
    expected.sort();
    assert_eq!(ids, expected);
}

/// A tool call against a script that returns a JSON-RPC error surfaces as a
/// `SessionError::Rpc`, and the session remains usable afterward.
#[tokio::test]
async fn tool_call_error_does_not_kill_the_session() {
    let (_dir, script) = write_fake_mcp_server("erroring");
    let spec = spec_for(&script);
    let id = ServerId::from_command(&spec.command, &spec.args);
    let session = MCPSession::start(id, spec).await.expect("start session");

    let err = session
        .call_tool("fail", serde_json::json!({}))
        .await
        .expect_err("fail tool should error");
    assert!(matches!(err, mcpd::error::SessionError::Rpc { .. }));

    let ok = session
        .call_tool("echo", serde_json::json!({"msg": "still alive"}))
        .await
        .expect("session still usable after an rpc error");
    assert!(ok.get("content").is_some());

    session.stop().await;
}

/// A dead child fails the in-flight call with `ChildDead`.
#[tokio::test]
async fn dead_child_fails_pending_calls() {
    let (_dir, script) = mcpd::test_support::write_dying_mcp_server();
    let spec = spec_for(&script);
    let id = ServerId::from_command(&spec.command, &spec.args);

    let result = MCPSession::start(id, spec).await;
    assert!(result.is_err(), "a server that exits immediately must fail the handshake");
}

/// A handshake that never completes times out rather than hanging forever.
#[tokio::test]
async fn hanging_handshake_times_out() {
    let (_dir, script) = mcpd::test_support::write_hanging_mcp_server();
    let spec = spec_for(&script);
    let id = ServerId::from_command(&spec.command, &spec.args);

    let result = tokio::time::timeout(std::time::Duration::from_secs(10), MCPSession::start(id, spec)).await;
    let result = result.expect("outer test timeout should not fire first");
    assert!(matches!(
        result,
        Err(mcpd::error::SessionError::HandshakeTimeout { .. })
    ));
}

/// `StaticCatalog` round-trips entries unchanged and `load()` never fails.
#[test]
fn static_catalog_round_trips_entries() {
    let mut catalog = StaticCatalog::default();
    catalog.insert("fs", ServerSpec::new("fs-server", vec!["--root".into(), "/tmp".into()]));
    let loaded = catalog.load().expect("static catalog load is infallible");
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded["fs"].command, "fs-server");
}
