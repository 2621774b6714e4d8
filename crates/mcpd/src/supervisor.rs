use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tracing::{error, info, warn};

use crate::catalog::ServerCatalog;
use crate::dispatcher::Dispatcher;
use crate::error::{InitError, SupervisorError};
use crate::initializer;
use crate::monitor::Monitor;
use crate::pool::Pool;
use crate::settings::{DaemonSettings, OnInitFailure};

const STALE_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Owns the daemon-process lifecycle: single-instance enforcement via a
/// stale-socket probe plus exclusive bind, signal handling for graceful
/// shutdown, and socket cleanup on exit.
///
/// This Supervisor does not perform a literal double-fork. Detaching from a
/// terminal is the responsibility of whatever spawns the daemon process (a
/// CLI invoking `current_exe() -- daemon ...` with
/// `Stdio::null()`/`kill_on_drop(false)`), not the daemon forking itself.
/// Supervisor therefore always runs in the foreground of whatever process
/// started it; a caller that wants a background daemon spawns this binary
/// and detaches it from the outside. This avoids adding a process-control
/// dependency (`nix`/`daemonize`) with no other use in this stack.
pub struct Supervisor;

impl Supervisor {
    pub async fn run(settings: DaemonSettings, catalog: ServerCatalog) -> ExitCode {
        match Self::try_run(settings, catalog).await {
            Ok(code) => code,
            Err(SupervisorError::AlreadyRunning) => {
                error!("another daemon is already responding on this socket");
                ExitCode::from(2)
            }
            Err(SupervisorError::Bind { path, source }) => {
                error!(path = %path.display(), %source, "failed to bind control socket");
                ExitCode::from(3)
            }
            Err(SupervisorError::Init(InitError::RequiredServerFailed { name, reason })) => {
                error!(server = %name, %reason, "required server failed to initialize");
                ExitCode::from(1)
            }
            Err(SupervisorError::Init(err)) => {
                error!(%err, "initialization error");
                ExitCode::from(1)
            }
        }
    }

    async fn try_run(
        settings: DaemonSettings,
        catalog: ServerCatalog,
    ) -> Result<ExitCode, SupervisorError> {
        let socket_path = settings.socket_path.clone();

        if socket_path.exists() {
            if probe_is_responding(&socket_path).await {
                return Err(SupervisorError::AlreadyRunning);
            }
            info!(path = %socket_path.display(), "removing stale control socket");
            let _ = std::fs::remove_file(&socket_path);
        }

        let listener = UnixListener::bind(&socket_path).map_err(|source| SupervisorError::Bind {
            path: socket_path.clone(),
            source,
        })?;
        set_owner_only_permissions(&socket_path);

        let pool = Arc::new(Pool::new());
        let dispatcher = Dispatcher::new(pool.clone());
        let shutdown = dispatcher.shutdown_handle();

        install_signal_handlers(shutdown.clone());

        let init_result = initializer::run(
            &catalog,
            &pool,
            settings.parallel_initialization,
            settings.initialization_timeout,
            settings.on_init_failure,
        )
        .await;

        match init_result {
            Ok(result) => {
                info!(
                    total = result.total,
                    successful = result.successful,
                    failed = result.failed,
                    "boot initialization complete"
                );
            }
            Err(err) => {
                if matches!(settings.on_init_failure, OnInitFailure::Fail) {
                    let _ = std::fs::remove_file(&socket_path);
                    return Err(SupervisorError::Init(err));
                }
                warn!(%err, "initialization error under non-fail policy; continuing");
            }
        }

        let monitor_handle = Monitor::spawn(pool.clone(), settings.health_check_interval, shutdown.clone());

        dispatcher.serve(listener).await;
        monitor_handle.abort();

        let _ = std::fs::remove_file(&socket_path);
        info!("daemon shut down cleanly");
        Ok(ExitCode::SUCCESS)
    }
}

async fn probe_is_responding(socket_path: &std::path::Path) -> bool {
    let Ok(connect) = tokio::time::timeout(STALE_PROBE_TIMEOUT, UnixStream::connect(socket_path)).await else {
        return false;
    };
    let Ok(mut stream) = connect else {
        return false;
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    if stream.write_all(b"{\"command\":\"status\"}\n").await.is_err() {
        return false;
    }
    let mut buf = [0u8; 256];
    matches!(
        tokio::time::timeout(STALE_PROBE_TIMEOUT, stream.read(&mut buf)).await,
        Ok(Ok(n)) if n > 0
    )
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mut perms = metadata.permissions();
        perms.set_mode(0o600);
        let _ = std::fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &std::path::Path) {}

#[cfg(unix)]
fn install_signal_handlers(shutdown: Arc<tokio::sync::Notify>) {
    use tokio::signal::unix::{signal, SignalKind};
    tokio::spawn(async move {
        let mut interrupt = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(err) => {
                warn!(%err, "failed to install SIGINT handler");
                return;
            }
        };
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(err) => {
                warn!(%err, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = interrupt.recv() => info!("received SIGINT"),
            _ = terminate.recv() => info!("received SIGTERM"),
        }
        shutdown.notify_waiters();
    });
}

#[cfg(not(unix))]
fn install_signal_handlers(_shutdown: Arc<tokio::sync::Notify>) {}
