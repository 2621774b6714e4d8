use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::SessionError;
use crate::id::ServerId;
use crate::jsonrpc::JsonRpcTransport;
use crate::spec::ServerSpec;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(10);
const STOP_GRACE: Duration = Duration::from_secs(3);

const PROTOCOL_VERSION: &str = "2024-11-05";
const CLIENT_NAME: &str = "mcpd";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Owns one spawned MCP server child process and exposes a typed
/// request/response RPC surface over its stdio. Concurrent callers are
/// independent and matched to responses strictly by request id; the only way
/// to cancel an in-flight call is to `stop()` the whole session.
pub struct MCPSession {
    id: ServerId,
    spec: ServerSpec,
    transport: JsonRpcTransport,
    initialized: AtomicBool,
    start_time: Instant,
}

impl MCPSession {
    /// Spawns the child and performs the `initialize` handshake. The session
    /// is only returned once the handshake has succeeded; a caller never
    /// observes a not-yet-initialized session.
    pub async fn start(id: ServerId, spec: ServerSpec) -> Result<Self, SessionError> {
        let transport = JsonRpcTransport::spawn(&spec.command, &spec.args, &spec.env)?;

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": { "name": CLIENT_NAME, "version": CLIENT_VERSION },
            "capabilities": {},
        });
        let rx = transport.request("initialize", params).await?;
        let result = tokio::time::timeout(HANDSHAKE_TIMEOUT, rx)
            .await
            .map_err(|_| SessionError::HandshakeTimeout {
                command: spec.command.clone(),
                timeout: HANDSHAKE_TIMEOUT,
            })?
            .map_err(|_| SessionError::ChannelClosed)?;

        if let Err(err) = result {
            return Err(SessionError::HandshakeRejected {
                message: err.to_string(),
            });
        }

        info!(id = %id, command = %spec.command, "mcp session initialized");
        Ok(Self {
            id,
            spec,
            transport,
            initialized: AtomicBool::new(true),
            start_time: Instant::now(),
        })
    }

    pub fn id(&self) -> &ServerId {
        &self.id
    }

    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Whether the reader task has observed the child exit. Sessions never
    /// transition back to alive on their own; Monitor is responsible for
    /// replacing a dead session with a fresh one.
    pub async fn is_alive(&self) -> bool {
        self.transport.is_child_alive().await
    }

    pub async fn list_tools(&self) -> Result<Vec<Value>, SessionError> {
        self.list_tools_with_timeout(DEFAULT_LIST_TIMEOUT).await
    }

    pub async fn list_tools_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Vec<Value>, SessionError> {
        let result = self.request_with_timeout("tools/list", Value::Null, timeout).await?;
        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| SessionError::Protocol("response missing `tools` array".into()))?;
        Ok(tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, SessionError> {
        self.call_tool_with_timeout(name, arguments, DEFAULT_CALL_TIMEOUT)
            .await
    }

    pub async fn call_tool_with_timeout(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, SessionError> {
        if !self.is_alive().await {
            return Err(SessionError::ChildDead);
        }
        let params = json!({ "name": name, "arguments": arguments });
        self.request_with_timeout("tools/call", params, timeout).await
    }

    async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, SessionError> {
        let rx = self.transport.request(method, params).await?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::ChannelClosed),
            Err(_) => Err(SessionError::Timeout(timeout)),
        }
    }

    /// Closes stdin, waits a short grace period, then kills and reaps the
    /// child. Idempotent: calling `stop()` on an already-stopped session is a
    /// no-op success.
    pub async fn stop(&self) {
        if let Err(err) = self.transport.stop(STOP_GRACE).await {
            warn!(id = %self.id, %err, "error while stopping mcp session");
        }
        self.initialized.store(false, Ordering::Release);
    }
}
