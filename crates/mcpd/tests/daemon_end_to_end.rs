use std::collections::BTreeMap;
use std::time::Duration;

use mcpd::catalog::StaticCatalog;
use mcpd::client::{self, ClientOp, ClientOptions};
use mcpd::settings::{DaemonSettings, OnInitFailure};
use mcpd::spec::ServerSpec;
use mcpd::supervisor::Supervisor;
use mcpd::test_support::{write_fake_mcp_server, write_short_lived_mcp_server, write_slow_mcp_server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

fn socket_path(dir: &tempfile::TempDir) -> std::path::PathBuf {
    dir.path().join("mcpd.sock")
}

/// Scenario 1: cold daemon + direct fallback. No daemon is listening on the
/// chosen socket, so the client falls straight through to a one-shot direct
/// spawn and still returns the `echo` tool.
#[tokio::test]
async fn cold_daemon_falls_back_to_direct_spawn() {
    let (_server_dir, script) = write_fake_mcp_server("cold-direct");
    let socket_dir = tempfile::tempdir().expect("tempdir");

    let opts = ClientOptions {
        socket_path: socket_path(&socket_dir),
        probe_timeout: Duration::from_millis(200),
        control_timeout: Duration::from_secs(5),
        no_daemon: false,
        verbose: false,
    };

    let result = client::dispatch(ClientOp::ListTools, &script.to_string_lossy(), &opts)
        .await
        .expect("direct dispatch should succeed");
    let tools = result.get("tools").and_then(|t| t.as_array()).expect("tools array");
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].get("name").and_then(|n| n.as_str()), Some("echo"));
}

/// Scenario 2: warm daemon, two concurrent calls against the same
/// `server_command` share exactly one spawned session.
#[tokio::test]
async fn warm_daemon_reuses_one_session_across_concurrent_calls() {
    let (_server_dir, script) = write_fake_mcp_server("warm-shared");
    let socket_dir = tempfile::tempdir().expect("tempdir");
    let socket = socket_path(&socket_dir);

    let settings = DaemonSettings {
        socket_path: socket.clone(),
        ..DaemonSettings::default()
    };
    let daemon = tokio::spawn(Supervisor::run(settings, StaticCatalog::default().load().unwrap()));
    wait_for_socket(&socket).await;

    let opts = ClientOptions {
        socket_path: socket.clone(),
        probe_timeout: Duration::from_millis(500),
        control_timeout: Duration::from_secs(5),
        no_daemon: false,
        verbose: false,
    };
    let command = script.to_string_lossy().to_string();

    let (a, b) = tokio::join!(
        client::dispatch(
            ClientOp::CallTool {
                tool: "echo".into(),
                arguments: serde_json::json!({ "msg": "hi" }),
            },
            &command,
            &opts,
        ),
        client::dispatch(
            ClientOp::CallTool {
                tool: "echo".into(),
                arguments: serde_json::json!({ "msg": "ho" }),
            },
            &command,
            &opts,
        ),
    );
    let a = a.expect("call a");
    let b = b.expect("call b");

    let a_text = a["result"]["content"][0]["text"].as_str().unwrap();
    let b_text = b["result"]["content"][0]["text"].as_str().unwrap();
    assert!(a_text.contains("hi"));
    assert!(b_text.contains("ho"));

    let status = send_control(&socket, serde_json::json!({ "command": "status" })).await;
    assert_eq!(status["server_count"].as_u64(), Some(1));

    shutdown_and_join(&socket, daemon).await;
}

/// Scenario 3: an auto-started entry that dies on its own is restarted by
/// Monitor within one health-check interval, and `status` reports it again
/// with a freshly reset uptime.
#[tokio::test]
async fn auto_started_server_is_restarted_after_it_dies() {
    let (_server_dir, script) = write_short_lived_mcp_server("flaky", 1);
    let socket_dir = tempfile::tempdir().expect("tempdir");
    let socket = socket_path(&socket_dir);

    let mut catalog = BTreeMap::new();
    let mut spec = ServerSpec::new(script.to_string_lossy().to_string(), Vec::new());
    spec.optional = false;
    catalog.insert("flaky".to_string(), spec);

    let settings = DaemonSettings {
        socket_path: socket.clone(),
        health_check_interval: Duration::from_millis(300),
        ..DaemonSettings::default()
    };
    let daemon = tokio::spawn(Supervisor::run(settings, catalog));
    wait_for_socket(&socket).await;

    let first = send_control(&socket, serde_json::json!({ "command": "status" })).await;
    let first_auto = first["auto_started"].as_array().expect("auto_started array");
    assert_eq!(first_auto.len(), 1);

    // The fake server self-destructs ~1s in; give Monitor a couple of
    // health-check intervals plus restart latency to notice and recover.
    tokio::time::sleep(Duration::from_secs(3)).await;

    let second = send_control(&socket, serde_json::json!({ "command": "status" })).await;
    let second_auto = second["auto_started"].as_array().expect("auto_started array");
    assert_eq!(second_auto.len(), 1);
    let uptime = second_auto[0]["uptime_seconds"].as_f64().expect("uptime_seconds");
    assert!(uptime < 2.5, "restarted session should report a freshly reset uptime, got {uptime}");

    shutdown_and_join(&socket, daemon).await;
}

/// Scenario 5: a `shutdown` sent while a tool call is in flight returns
/// success immediately and the daemon still exits cleanly within its grace
/// period, regardless of how the in-flight call itself resolves.
#[tokio::test]
async fn graceful_shutdown_does_not_wait_forever_on_in_flight_call() {
    let (_server_dir, script) = write_slow_mcp_server(10);
    let socket_dir = tempfile::tempdir().expect("tempdir");
    let socket = socket_path(&socket_dir);

    let settings = DaemonSettings {
        socket_path: socket.clone(),
        ..DaemonSettings::default()
    };
    let daemon = tokio::spawn(Supervisor::run(settings, StaticCatalog::default().load().unwrap()));
    wait_for_socket(&socket).await;

    let command = script.to_string_lossy().to_string();
    let opts = ClientOptions {
        socket_path: socket.clone(),
        probe_timeout: Duration::from_millis(500),
        control_timeout: Duration::from_secs(15),
        no_daemon: false,
        verbose: false,
    };

    let in_flight = tokio::spawn(async move {
        client::dispatch(
            ClientOp::CallTool {
                tool: "slow-echo".into(),
                arguments: serde_json::json!({}),
            },
            &command,
            &opts,
        )
        .await
    });

    tokio::time::sleep(Duration::from_secs(2)).await;
    let shutdown_response = send_control(&socket, serde_json::json!({ "command": "shutdown" })).await;
    assert_eq!(shutdown_response["success"], serde_json::json!(true));

    let code = tokio::time::timeout(Duration::from_secs(10), daemon)
        .await
        .expect("daemon should shut down within its grace period")
        .expect("daemon task should not panic");
    assert_eq!(format!("{code:?}"), format!("{:?}", std::process::ExitCode::SUCCESS));
    assert!(!socket.exists());

    // The in-flight call either completes normally (served before the grace
    // period elapsed) or observes the session going away; either is a
    // correct outcome for a shutdown racing an in-flight call.
    let _ = in_flight.await.expect("in-flight task should not panic");
}

/// Scenario 4: a required (non-optional) catalog entry whose command does
/// not exist makes the daemon exit with code 1 under the `fail` policy, and
/// the socket is unlinked.
#[tokio::test]
async fn required_server_failure_exits_with_code_one() {
    let socket_dir = tempfile::tempdir().expect("tempdir");
    let socket = socket_path(&socket_dir);

    let mut catalog = BTreeMap::new();
    catalog.insert(
        "broken".to_string(),
        ServerSpec::new("/nonexistent/mcp-server-binary", Vec::new()),
    );

    let settings = DaemonSettings {
        socket_path: socket.clone(),
        on_init_failure: OnInitFailure::Fail,
        initialization_timeout: Duration::from_secs(5),
        ..DaemonSettings::default()
    };

    let code = Supervisor::run(settings, catalog).await;
    assert_eq!(format!("{code:?}"), format!("{:?}", std::process::ExitCode::from(1)));
    assert!(!socket.exists());
}

/// Scenario 6: an oversize request frame is rejected without disturbing the
/// daemon, and the connection is closed.
#[tokio::test]
async fn oversize_frame_is_rejected() {
    let socket_dir = tempfile::tempdir().expect("tempdir");
    let socket = socket_path(&socket_dir);
    let settings = DaemonSettings {
        socket_path: socket.clone(),
        ..DaemonSettings::default()
    };
    let daemon = tokio::spawn(Supervisor::run(settings, StaticCatalog::default().load().unwrap()));
    wait_for_socket(&socket).await;

    let mut stream = UnixStream::connect(&socket).await.expect("connect");
    let oversized = vec![b'a'; 2 * 1024 * 1024];
    stream.write_all(&oversized).await.expect("write oversize frame");
    stream.write_all(b"\n").await.expect("write newline");

    let mut buf = [0u8; 4096];
    let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("read should not hang")
        .expect("read");
    let response: serde_json::Value = serde_json::from_slice(&buf[..n]).expect("valid json response");
    assert_eq!(response["success"], serde_json::json!(false));
    assert_eq!(response["kind"], serde_json::json!("oversize"));

    let status = send_control(&socket, serde_json::json!({ "command": "status" })).await;
    assert_eq!(status["status"], serde_json::json!("running"));

    shutdown_and_join(&socket, daemon).await;
}

async fn wait_for_socket(path: &std::path::Path) {
    for _ in 0..100 {
        if UnixStream::connect(path).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("daemon socket never became connectable at {}", path.display());
}

async fn send_control(socket: &std::path::Path, request: serde_json::Value) -> serde_json::Value {
    let mut stream = UnixStream::connect(socket).await.expect("connect");
    let mut line = serde_json::to_vec(&request).unwrap();
    line.push(b'\n');
    stream.write_all(&line).await.expect("write request");
    let mut buf = [0u8; 65536];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("read should not hang")
        .expect("read");
    serde_json::from_slice(&buf[..n]).expect("valid json response")
}

async fn shutdown_and_join(socket: &std::path::Path, daemon: tokio::task::JoinHandle<std::process::ExitCode>) {
    let _ = send_control(socket, serde_json::json!({ "command": "shutdown" })).await;
    let code = tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon should shut down within grace period")
        .expect("daemon task should not panic");
    assert_eq!(format!("{code:?}"), format!("{:?}", std::process::ExitCode::SUCCESS));
    assert!(!socket.exists());
}
