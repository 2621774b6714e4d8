use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::{DispatchError, ErrorKind, PoolError};
use crate::id::ServerId;
use crate::pool::Pool;
use crate::spec::ServerSpec;
use crate::wire::{err, ok, Request, MAX_FRAME_BYTES};

/// Grace period given to in-flight connections after a `shutdown` command
/// before the listener loop gives up waiting for them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Serves the control socket: one task per accepted connection, line-delimited
/// JSON request/response, then close. Accept-loop shape is grounded on
/// `astrid-kernel/src/socket.rs` (stale-socket removal is the Supervisor's
/// job, not the Dispatcher's); the wire framing itself — newline-terminated,
/// one JSON object per message — is not astrid's length-prefixed binary
/// framing.
pub struct Dispatcher {
    pool: Arc<Pool>,
    shutdown: Arc<Notify>,
    accepting: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self {
            pool,
            shutdown: Arc::new(Notify::new()),
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    /// A handle that, when notified, stops the accept loop. Shared with the
    /// Supervisor's signal handlers so `SIGINT`/`SIGTERM` trigger the same
    /// graceful-shutdown path as the `shutdown` control command.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    pub async fn serve(&self, listener: UnixListener) {
        let mut connections: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            if !self.accepting.load(Ordering::Acquire) {
                                continue;
                            }
                            let pool = self.pool.clone();
                            let shutdown = self.shutdown.clone();
                            let accepting = self.accepting.clone();
                            connections.spawn(async move {
                                handle_connection(stream, pool, shutdown, accepting).await;
                            });
                        }
                        Err(err) => warn!(%err, "error accepting control-socket connection"),
                    }
                }
                _ = self.shutdown.notified() => {
                    self.accepting.store(false, Ordering::Release);
                    break;
                }
            }
        }

        info!("control socket no longer accepting; draining in-flight connections");
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        self.pool.stop_all().await;
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    pool: Arc<Pool>,
    shutdown: Arc<Notify>,
    accepting: Arc<AtomicBool>,
) {
    let frame = match read_frame(&mut stream).await {
        Ok(Some(frame)) => frame,
        Ok(None) => return,
        Err(DispatchError::Oversize) => {
            let response = err("oversize", ErrorKind::Oversize);
            let _ = write_response(&mut stream, &response).await;
            return;
        }
        Err(err) => {
            warn!(%err, "error reading control-socket frame");
            return;
        }
    };

    let response = match serde_json::from_slice::<Request>(&frame) {
        Ok(request) => handle_request(request, &pool, &shutdown, &accepting).await,
        Err(parse_err) => err(
            format!("malformed request: {parse_err}"),
            ErrorKind::BadRequest,
        ),
    };

    let _ = write_response(&mut stream, &response).await;
}

async fn handle_request(
    request: Request,
    pool: &Pool,
    shutdown: &Notify,
    accepting: &AtomicBool,
) -> Value {
    match request {
        Request::Start {
            server,
            server_command,
        } => match resolve_spec(server, Some(&server_command)) {
            Ok((id, spec)) => match pool.start(id, spec, false).await {
                Ok(_) => ok(json!({})),
                Err(pool_err) => pool_err_response(&pool_err),
            },
            Err(response) => response,
        },
        Request::Stop { server } => {
            pool.stop(&server).await;
            ok(json!({}))
        }
        Request::Call {
            server,
            server_command,
            tool,
            arguments,
            timeout_ms,
        } => match find_or_lazy_start(pool, server, server_command.as_deref()).await {
            Ok(session) => {
                let timeout = timeout_ms.map(Duration::from_millis);
                let result = match timeout {
                    Some(timeout) => session.call_tool_with_timeout(&tool, arguments, timeout).await,
                    None => session.call_tool(&tool, arguments).await,
                };
                match result {
                    Ok(value) => ok(json!({ "result": value })),
                    Err(session_err) => {
                        let kind = ErrorKind::from(&session_err);
                        err(session_err.to_string(), kind)
                    }
                }
            }
            Err(response) => response,
        },
        Request::List {
            server,
            server_command,
        } => match find_or_lazy_start(pool, server, server_command.as_deref()).await {
            Ok(session) => match session.list_tools().await {
                Ok(tools) => ok(json!({ "tools": tools })),
                Err(session_err) => {
                    let kind = ErrorKind::from(&session_err);
                    err(session_err.to_string(), kind)
                }
            },
            Err(response) => response,
        },
        Request::ListAll => {
            let ids = pool.list_ids().await;
            let mut servers = serde_json::Map::new();
            let mut total_tools = 0usize;
            for id in &ids {
                if let Some(session) = pool.get(id).await {
                    let tools = session.list_tools().await.unwrap_or_default();
                    let tool_count = tools.len();
                    total_tools += tool_count;
                    servers.insert(
                        id.as_str().to_string(),
                        json!({ "tools": tools, "tool_count": tool_count }),
                    );
                }
            }
            ok(json!({
                "servers": Value::Object(servers),
                "server_count": ids.len(),
                "total_tools": total_tools,
            }))
        }
        Request::Status => {
            let ids = pool.list_ids().await;
            let mut auto_started = Vec::new();
            let mut on_demand = Vec::new();
            for id in &ids {
                if pool.is_auto_started(id).await {
                    if let Some(session) = pool.get(id).await {
                        auto_started.push(json!({
                            "id": id,
                            "uptime_seconds": session.uptime().as_secs_f64(),
                        }));
                    }
                } else {
                    on_demand.push(id.clone());
                }
            }
            json!({
                "status": "running",
                "servers": ids,
                "server_count": ids.len(),
                "auto_started": auto_started,
                "on_demand": on_demand,
            })
        }
        Request::Shutdown => {
            accepting.store(false, Ordering::Release);
            shutdown.notify_waiters();
            ok(json!({}))
        }
    }
}

async fn find_or_lazy_start(
    pool: &Pool,
    server: Option<ServerId>,
    server_command: Option<&str>,
) -> Result<Arc<crate::session::MCPSession>, Value> {
    if let Some(id) = &server {
        if let Some(session) = pool.get(id).await {
            return Ok(session);
        }
    }
    let (id, spec) = resolve_spec(server, server_command)?;
    if let Some(session) = pool.get(&id).await {
        return Ok(session);
    }
    pool.start(id, spec, false)
        .await
        .map_err(|pool_err| pool_err_response(&pool_err))
}

fn resolve_spec(
    server: Option<ServerId>,
    server_command: Option<&str>,
) -> Result<(ServerId, ServerSpec), Value> {
    let Some(server_command) = server_command else {
        return match server {
            Some(id) => Err(err(
                format!("server {id} not found and no server_command supplied"),
                ErrorKind::NotFound,
            )),
            None => Err(err(
                "request is missing both `server` and `server_command`",
                ErrorKind::BadRequest,
            )),
        };
    };
    let spec = ServerSpec::from_command_line(server_command)
        .map_err(|e| err(format!("invalid server_command: {e}"), ErrorKind::BadRequest))?;
    let id = server.unwrap_or_else(|| ServerId::from_command(&spec.command, &spec.args));
    Ok((id, spec))
}

fn pool_err_response(pool_err: &PoolError) -> Value {
    let kind = ErrorKind::from(pool_err);
    err(pool_err.to_string(), kind)
}

async fn read_frame(stream: &mut UnixStream) -> Result<Option<Vec<u8>>, DispatchError> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return if buf.is_empty() { Ok(None) } else { Ok(Some(buf)) };
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            buf.truncate(pos);
            return Ok(Some(buf));
        }
        if buf.len() > MAX_FRAME_BYTES {
            return Err(DispatchError::Oversize);
        }
    }
}

async fn write_response(stream: &mut UnixStream, response: &Value) -> Result<(), DispatchError> {
    let mut line = serde_json::to_vec(response).map_err(|e| DispatchError::BadRequest(e.to_string()))?;
    line.push(b'\n');
    stream.write_all(&line).await?;
    stream.flush().await?;
    Ok(())
}
