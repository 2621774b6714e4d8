use mcpd::catalog::StaticCatalog;
use mcpd::{logging, CatalogSource, DaemonSettings, Supervisor};

/// Daemon entrypoint. There is no config-file catalog loader here; the
/// catalog fed to the Supervisor is whatever entries `MCP_DAEMON_SERVERS`
/// names, one `server_command` per `;`-separated entry, each auto-started.
/// An empty/unset var boots with no auto-started servers and relies entirely
/// on lazy on-demand starts from `start`/`call`.
#[tokio::main]
async fn main() -> std::process::ExitCode {
    logging::init();

    let settings = DaemonSettings::from_env();
    let catalog = match load_catalog_from_env() {
        Ok(catalog) => catalog,
        Err(err) => {
            eprintln!("mcpd: invalid MCP_DAEMON_SERVERS entry: {err}");
            return std::process::ExitCode::from(3);
        }
    };

    Supervisor::run(settings, catalog).await
}

fn load_catalog_from_env() -> Result<mcpd::ServerCatalog, shell_words::ParseError> {
    let mut catalog = StaticCatalog::default();
    if let Ok(raw) = std::env::var("MCP_DAEMON_SERVERS") {
        for (index, entry) in raw.split(';').map(str::trim).filter(|s| !s.is_empty()).enumerate() {
            let spec = mcpd::ServerSpec::from_command_line(entry)?;
            catalog.insert(format!("server-{index}"), spec);
        }
    }
    Ok(catalog.load().expect("StaticCatalog::load never fails"))
}
