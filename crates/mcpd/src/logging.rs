use tracing_subscriber::EnvFilter;

/// Initializes the process-wide `tracing` subscriber. Called exactly once,
/// from the binary entrypoint only — library code never installs a
/// subscriber of its own.
pub fn init() {
    let filter = EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
