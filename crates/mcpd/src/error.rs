use std::time::Duration;

use thiserror::Error;

use crate::id::ServerId;

/// Wire-stable error classification, shared by every response the daemon or the
/// transparent client can produce. Stable across versions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SpawnError,
    ProtocolError,
    ToolError,
    NotFound,
    ChildDead,
    Timeout,
    Oversize,
    AlreadyRunning,
    BadRequest,
}

/// Errors raised by an `MCPSession` while spawning or talking to its child.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("handshake with `{command}` timed out after {timeout:?}")]
    HandshakeTimeout { command: String, timeout: Duration },
    #[error("child returned a JSON-RPC error during handshake: {message}")]
    HandshakeRejected { message: String },
    #[error("child stdio pipes were not available for `{command}`")]
    MissingPipes { command: String },
    #[error("child process exited; session is dead")]
    ChildDead,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("child returned a JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed response from child: {0}")]
    Protocol(String),
    #[error("response channel closed before completion")]
    ChannelClosed,
    #[error("failed to serialize request: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<&SessionError> for ErrorKind {
    fn from(err: &SessionError) -> Self {
        match err {
            SessionError::Spawn { .. } => ErrorKind::SpawnError,
            SessionError::HandshakeTimeout { .. } | SessionError::HandshakeRejected { .. } => {
                ErrorKind::ProtocolError
            }
            SessionError::MissingPipes { .. } => ErrorKind::SpawnError,
            SessionError::ChildDead | SessionError::ChannelClosed => ErrorKind::ChildDead,
            SessionError::Timeout(_) => ErrorKind::Timeout,
            SessionError::Rpc { .. } => ErrorKind::ToolError,
            SessionError::Protocol(_) | SessionError::Serialization(_) => ErrorKind::ProtocolError,
        }
    }
}

/// Errors raised by the `Pool` itself, as opposed to the sessions it holds.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("server {0:?} is not running")]
    NotFound(ServerId),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<&PoolError> for ErrorKind {
    fn from(err: &PoolError) -> Self {
        match err {
            PoolError::NotFound(_) => ErrorKind::NotFound,
            PoolError::Session(source) => ErrorKind::from(source),
        }
    }
}

/// Errors raised while serving a single control-socket connection.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request frame exceeded the 1 MiB limit")]
    Oversize,
    #[error("malformed request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("i/o error on control socket: {0}")]
    Io(#[from] std::io::Error),
}

impl From<&DispatchError> for ErrorKind {
    fn from(err: &DispatchError) -> Self {
        match err {
            DispatchError::Oversize => ErrorKind::Oversize,
            DispatchError::BadRequest(_) => ErrorKind::BadRequest,
            DispatchError::Pool(source) => ErrorKind::from(source),
            DispatchError::Io(_) => ErrorKind::ProtocolError,
        }
    }
}

/// Errors raised while running the boot-time auto-start sequence.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("initialization exceeded the {0:?} deadline")]
    DeadlineExceeded(Duration),
    #[error("required server {name:?} failed to start: {reason}")]
    RequiredServerFailed { name: String, reason: String },
}

/// Errors raised by the daemon-process lifecycle.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("another daemon is already listening on this socket")]
    AlreadyRunning,
    #[error("failed to bind control socket at {path}: {source}")]
    Bind {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Init(#[from] InitError),
}

/// Errors raised by the transparent fallback client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("daemon response was malformed: {0}")]
    BadResponse(String),
    #[error("daemon reported an error: {message}")]
    Daemon { message: String, kind: ErrorKind },
    #[error("i/o error talking to daemon: {0}")]
    Io(#[from] std::io::Error),
}

impl From<&ClientError> for ErrorKind {
    fn from(err: &ClientError) -> Self {
        match err {
            ClientError::Session(source) => ErrorKind::from(source),
            ClientError::BadResponse(_) => ErrorKind::BadRequest,
            ClientError::Daemon { kind, .. } => *kind,
            ClientError::Io(_) => ErrorKind::ProtocolError,
        }
    }
}

/// Errors raised while resolving an entry from a server catalog (the
/// consumption side only; the file-format loader itself is external).
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("server entry {0:?} is not present in the catalog")]
    NotFound(String),
}
