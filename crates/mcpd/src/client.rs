use std::path::PathBuf;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use crate::error::{ClientError, ErrorKind};
use crate::id::ServerId;
use crate::session::MCPSession;
use crate::settings::DEFAULT_SOCKET_PATH;
use crate::spec::ServerSpec;
use crate::wire::MAX_FRAME_BYTES;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(1000);
const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// The operation the CLI wants performed, independent of which path (daemon
/// or direct) ends up serving it.
#[derive(Clone, Debug)]
pub enum ClientOp {
    ListTools,
    CallTool { tool: String, arguments: Value },
}

#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub socket_path: PathBuf,
    pub probe_timeout: Duration,
    pub control_timeout: Duration,
    pub no_daemon: bool,
    pub verbose: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            control_timeout: DEFAULT_CONTROL_TIMEOUT,
            no_daemon: false,
            verbose: false,
        }
    }
}

/// Presents a single local API to the CLI, transparently choosing `daemon` or
/// `direct` per call. Both paths bottom out in the same
/// `MCPSession::call_tool`/`list_tools`, which is what makes the two paths
/// return byte-identical payloads by construction rather than by careful
/// duplication.
pub async fn dispatch(
    op: ClientOp,
    server_command: &str,
    opts: &ClientOptions,
) -> Result<Value, ClientError> {
    if !opts.no_daemon {
        match try_daemon(&op, server_command, opts).await {
            Ok(value) => {
                if opts.verbose {
                    eprintln!("mcpd: served via daemon");
                }
                return Ok(value);
            }
            Err(FallbackTrigger::Unavailable(reason)) => {
                debug!(%reason, "daemon unavailable; falling back to direct mode");
            }
            Err(FallbackTrigger::DaemonAccepted(err)) => {
                // The daemon accepted the real request before failing; its
                // error is returned verbatim rather than retrying direct,
                // to avoid a double tool invocation.
                return Err(err);
            }
        }
    }

    if opts.verbose {
        eprintln!("mcpd: served via direct spawn");
    }
    run_direct(op, server_command).await
}

enum FallbackTrigger {
    Unavailable(String),
    DaemonAccepted(ClientError),
}

/// The control socket serves one request per connection, so probing and the
/// real call each open their own `UnixStream`.
async fn try_daemon(
    op: &ClientOp,
    server_command: &str,
    opts: &ClientOptions,
) -> Result<Value, FallbackTrigger> {
    let mut probe = connect(opts).await.map_err(FallbackTrigger::Unavailable)?;
    let status = send_request(&mut probe, json!({ "command": "status" }), opts.probe_timeout)
        .await
        .map_err(|e| FallbackTrigger::Unavailable(e.to_string()))?;

    if status.get("status").and_then(Value::as_str) != Some("running") {
        return Err(FallbackTrigger::Unavailable(
            "daemon responded but is not running".into(),
        ));
    }

    let request = match op {
        ClientOp::ListTools => json!({
            "command": "list",
            "server_command": server_command,
        }),
        ClientOp::CallTool { tool, arguments } => json!({
            "command": "call",
            "server_command": server_command,
            "tool": tool,
            "arguments": arguments,
        }),
    };

    // From this point on the daemon has accepted the real request; any error
    // it returns is final, not a fallback trigger.
    let mut call = connect(opts)
        .await
        .map_err(|e| FallbackTrigger::DaemonAccepted(ClientError::BadResponse(e)))?;
    let response = send_request(&mut call, request, opts.control_timeout)
        .await
        .map_err(|e| FallbackTrigger::DaemonAccepted(ClientError::Io(e)))?;
    extract_result(response).map_err(FallbackTrigger::DaemonAccepted)
}

async fn connect(opts: &ClientOptions) -> Result<UnixStream, String> {
    tokio::time::timeout(opts.probe_timeout, UnixStream::connect(&opts.socket_path))
        .await
        .map_err(|_| "probe timed out".to_string())?
        .map_err(|e| e.to_string())
}

fn extract_result(response: Value) -> Result<Value, ClientError> {
    let success = response.get("success").and_then(Value::as_bool).unwrap_or(false);
    if !success {
        let message = response
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown daemon error")
            .to_string();
        let kind: ErrorKind = response
            .get("kind")
            .and_then(|k| serde_json::from_value(k.clone()).ok())
            .unwrap_or(ErrorKind::ProtocolError);
        return Err(ClientError::Daemon { message, kind });
    }
    if let Some(tools) = response.get("tools") {
        return Ok(json!({ "tools": tools }));
    }
    if let Some(result) = response.get("result") {
        return Ok(json!({ "result": result }));
    }
    Ok(response)
}

async fn run_direct(op: ClientOp, server_command: &str) -> Result<Value, ClientError> {
    let spec = ServerSpec::from_command_line(server_command)
        .map_err(|e| ClientError::BadResponse(e.to_string()))?;
    let id = ServerId::from_command(&spec.command, &spec.args);
    let session = MCPSession::start(id, spec).await?;

    let result = match op {
        ClientOp::ListTools => session.list_tools().await.map(|tools| json!({ "tools": tools })),
        ClientOp::CallTool { tool, arguments } => session
            .call_tool(&tool, arguments)
            .await
            .map(|value| json!({ "result": value })),
    };

    session.stop().await;
    Ok(result?)
}

async fn send_request(
    stream: &mut UnixStream,
    request: Value,
    timeout: Duration,
) -> std::io::Result<Value> {
    let mut line = serde_json::to_vec(&request)?;
    line.push(b'\n');
    tokio::time::timeout(timeout, stream.write_all(&line))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out"))??;
    stream.flush().await?;

    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let read_all = async {
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.contains(&b'\n') || buf.len() > MAX_FRAME_BYTES {
                break;
            }
        }
        Ok::<(), std::io::Error>(())
    };
    tokio::time::timeout(timeout, read_all)
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out"))??;

    if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        buf.truncate(pos);
    }
    serde_json::from_slice(&buf)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}

