use std::path::PathBuf;
use std::time::Duration;

/// Policy applied when one or more auto-start catalog entries fail.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OnInitFailure {
    Fail,
    Warn,
    Ignore,
}

impl Default for OnInitFailure {
    fn default() -> Self {
        OnInitFailure::Warn
    }
}

impl std::str::FromStr for OnInitFailure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail" => Ok(OnInitFailure::Fail),
            "warn" => Ok(OnInitFailure::Warn),
            "ignore" => Ok(OnInitFailure::Ignore),
            other => Err(format!("unknown on_init_failure policy: {other:?}")),
        }
    }
}

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/mcp-daemon.sock";

/// Boot-time scalar settings. Read once from environment variables — this is
/// boot-time settings plumbing, not config-file discovery; no file format is
/// parsed here.
#[derive(Clone, Debug)]
pub struct DaemonSettings {
    pub socket_path: PathBuf,
    pub initialization_timeout: Duration,
    pub parallel_initialization: usize,
    pub on_init_failure: OnInitFailure,
    pub health_check_interval: Duration,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            initialization_timeout: Duration::from_secs(60),
            parallel_initialization: 4,
            on_init_failure: OnInitFailure::Warn,
            health_check_interval: Duration::from_secs(30),
        }
    }
}

impl DaemonSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            socket_path: std::env::var("MCP_DAEMON_SOCKET")
                .map(PathBuf::from)
                .unwrap_or(defaults.socket_path),
            initialization_timeout: std::env::var("MCP_DAEMON_INIT_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.initialization_timeout),
            parallel_initialization: std::env::var("MCP_DAEMON_PARALLEL_INIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.parallel_initialization),
            on_init_failure: std::env::var("MCP_DAEMON_ON_INIT_FAILURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.on_init_failure),
            health_check_interval: std::env::var("MCP_DAEMON_HEALTH_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.health_check_interval),
        }
    }
}
