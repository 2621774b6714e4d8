#![forbid(unsafe_code)]
//! A process pool and IPC dispatcher for Model Context Protocol servers.
//!
//! A single long-lived daemon owns one child process per distinct MCP server
//! command, speaks JSON-RPC 2.0 over each child's stdio, and exposes
//! `start`/`stop`/`call`/`list`/`list_all`/`status`/`shutdown` over a Unix
//! control socket. A transparent [`client::dispatch`] lets callers use the
//! daemon when it's running and fall back to spawning a server directly,
//! one-shot, when it isn't — both paths return byte-identical results.
//!
//! ## Layout
//! - [`id`] / [`spec`] — `ServerId` derivation and `ServerSpec`, the unit the
//!   rest of the crate passes around.
//! - [`jsonrpc`] / [`session`] — the per-child JSON-RPC transport and the
//!   typed `MCPSession` built on top of it.
//! - [`pool`] — `ServerId -> MCPSession` bookkeeping, auto-started vs.
//!   on-demand.
//! - [`catalog`] — the boundary an external config-file loader implements
//!   against (`CatalogSource`), plus `StaticCatalog` for tests/embedding.
//! - [`initializer`] / [`monitor`] — boot-time batch start and background
//!   health-check/restart.
//! - [`wire`] / [`dispatcher`] — the control-socket request/response types
//!   and the accept loop that serves them.
//! - [`supervisor`] — single-instance enforcement, signal handling, and
//!   process lifecycle.
//! - [`client`] — the transparent daemon-or-direct entrypoint for CLIs.
//! - [`settings`] — boot-time environment-derived scalars.
//! - [`error`] — the `ErrorKind` taxonomy shared by every layer.

pub mod catalog;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod id;
pub mod initializer;
pub mod jsonrpc;
pub mod logging;
pub mod monitor;
pub mod pool;
pub mod session;
pub mod settings;
pub mod spec;
pub mod supervisor;
pub mod wire;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use catalog::{CatalogSource, ServerCatalog, StaticCatalog};
pub use client::{dispatch, ClientOp, ClientOptions};
pub use error::ErrorKind;
pub use id::ServerId;
pub use pool::Pool;
pub use session::MCPSession;
pub use settings::{DaemonSettings, OnInitFailure};
pub use spec::ServerSpec;
pub use supervisor::Supervisor;
