use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SessionError;

type PendingRequests = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, SessionError>>>>>;

/// Raw newline-delimited JSON-RPC transport over a child process's stdio.
///
/// A dedicated writer task serializes stdin writes (held only across a single
/// write by construction), a single reader task consumes `stdout` and
/// demultiplexes responses into `pending` by request id, and notifications
/// (no `"id"` field) are discarded rather than routed anywhere, since the MCP
/// child protocol this daemon speaks has no use for server push beyond stdout
/// logging.
pub struct JsonRpcTransport {
    writer: mpsc::UnboundedSender<String>,
    pending: PendingRequests,
    next_id: AtomicU64,
    child: Arc<Mutex<Option<Child>>>,
    command_label: String,
    _tasks: Vec<JoinHandle<()>>,
}

impl JsonRpcTransport {
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<Self, SessionError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, OsString::from(value));
        }

        let mut child = cmd.spawn().map_err(|source| SessionError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::MissingPipes {
                command: command.to_string(),
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::MissingPipes {
                command: command.to_string(),
            })?;
        let stderr = child.stderr.take();

        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = mpsc::unbounded_channel::<String>();

        let mut tasks = Vec::with_capacity(3);
        tasks.push(tokio::spawn(writer_task(stdin, rx)));
        tasks.push(tokio::spawn(reader_task(
            stdout,
            pending.clone(),
            command.to_string(),
        )));
        if let Some(stderr) = stderr {
            tasks.push(tokio::spawn(stderr_task(stderr, command.to_string())));
        }

        Ok(Self {
            writer: tx,
            pending,
            next_id: AtomicU64::new(1),
            child: Arc::new(Mutex::new(Some(child))),
            command_label: command.to_string(),
            _tasks: tasks,
        })
    }

    /// Sends a request and returns a receiver that completes when the
    /// matching response arrives, the transport observes the child exit, or
    /// the caller's own timeout (applied by `MCPSession`) expires. The slot is
    /// inserted into `pending` before the line is written so a fast child can
    /// never race ahead of the entry it will be matched against.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
    ) -> Result<oneshot::Receiver<Result<Value, SessionError>>, SessionError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let line = serde_json::to_string(&payload)?;

        if self.writer.send(line).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(SessionError::ChannelClosed);
        }
        Ok(rx)
    }

    /// True once the reader task has observed EOF or a terminal error and
    /// drained `pending` accordingly.
    pub async fn is_child_alive(&self) -> bool {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub async fn stop(&self, grace: std::time::Duration) -> Result<(), SessionError> {
        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return Ok(());
        };
        if matches!(child.try_wait(), Ok(Some(_))) {
            *guard = None;
            return Ok(());
        }
        let _ = child.start_kill();
        let _ = tokio::time::timeout(grace, child.wait()).await;
        *guard = None;
        Ok(())
    }

    pub fn command_label(&self) -> &str {
        &self.command_label
    }
}

async fn writer_task(mut stdin: tokio::process::ChildStdin, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        if stdin.write_all(line.as_bytes()).await.is_err() {
            break;
        }
        if stdin.write_all(b"\n").await.is_err() {
            break;
        }
        if stdin.flush().await.is_err() {
            break;
        }
    }
    let _ = stdin.shutdown().await;
}

async fn reader_task(
    stdout: tokio::process::ChildStdout,
    pending: PendingRequests,
    command_label: String,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(&line) {
                    Ok(value) => route_message(&pending, value).await,
                    Err(err) => {
                        warn!(command = %command_label, %err, "child emitted malformed JSON-RPC line");
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(command = %command_label, %err, "error reading from child stdout");
                break;
            }
        }
    }
    drain_pending(&pending).await;
}

async fn route_message(pending: &PendingRequests, value: Value) {
    let Some(id) = value.get("id").and_then(Value::as_u64) else {
        // Notification: no `id`. Per the MCP child protocol, these are
        // permitted and MUST be ignored by the session.
        debug!(method = ?value.get("method"), "ignoring child notification");
        return;
    };
    let sender = { pending.lock().await.remove(&id) };
    let Some(sender) = sender else {
        // Late response for a request we already timed out on; drop silently.
        return;
    };
    let result = if let Some(error) = value.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        Err(SessionError::Rpc { code, message })
    } else {
        Ok(value.get("result").cloned().unwrap_or(Value::Null))
    };
    let _ = sender.send(result);
}

async fn drain_pending(pending: &PendingRequests) {
    let mut guard = pending.lock().await;
    for (_, sender) in guard.drain() {
        let _ = sender.send(Err(SessionError::ChildDead));
    }
}

async fn stderr_task(stderr: tokio::process::ChildStderr, command_label: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(command = %command_label, stderr = %line, "child stderr");
    }
}
