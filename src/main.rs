//! Connector configuration tool.
//!
//! Loads a connector configuration, builds and initializes the HTTP/1.1
//! protocol handler for it, and prints what the handler ended up with.
//! `watch` keeps the handler alive and applies file changes as they land.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use http::{Request, Response, StatusCode};
use serde_json::json;

use http11_negotiator::config::{load_config, ConfigWatcher, ServerConfig};
use http11_negotiator::observability::logging::init_logging;
use http11_negotiator::{Adapter, ConfigDiagnostic, Endpoint, Http11Protocol, NetEndpoint};

#[derive(Parser)]
#[command(name = "http11-negotiator")]
#[command(about = "Inspect and run an HTTP/1.1 connector configuration", long_about = None)]
struct Cli {
    /// Connector configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print the resulting handler state
    Check,
    /// Apply configuration file changes until Ctrl-C
    Watch,
}

fn not_found(_request: &Request<()>) -> Response<()> {
    let mut response = Response::new(());
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

fn summary(protocol: &Http11Protocol, diagnostics: &[ConfigDiagnostic]) -> serde_json::Value {
    let tls_hosts: Vec<String> = protocol
        .tls_identities()
        .hosts()
        .iter()
        .map(|host| host.host_name())
        .collect();

    json!({
        "endpoint": protocol.name(),
        "ssl_enabled": protocol.endpoint().is_ssl_enabled(),
        "alpn_supported": protocol.endpoint().is_alpn_supported(),
        "negotiated_protocols": protocol.endpoint().negotiated_protocols(),
        "limits": &*protocol.limits(),
        "http": &*protocol.settings(),
        "compression": protocol.compression().compression(),
        "allowed_trailer_headers": protocol.trailer_policy().snapshot(),
        "tls": {
            "default_host_name": protocol.default_host_name(),
            "hosts": tls_hosts,
        },
        "diagnostics": diagnostics.iter().map(ToString::to_string).collect::<Vec<_>>(),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    init_logging(&config.observability);

    tracing::info!(
        connector = %config.connector.name,
        ssl_enabled = config.connector.ssl_enabled,
        "Configuration loaded"
    );

    let endpoint: Arc<dyn Endpoint> = Arc::new(NetEndpoint::new(
        config.connector.name.clone(),
        config.connector.ssl_enabled,
    ));
    let adapter: Arc<dyn Adapter> = Arc::new(not_found);
    let mut protocol = Http11Protocol::from_config(&config, endpoint, adapter)?;
    let diagnostics = protocol.init();

    if config.connector.ssl_enabled {
        // Resolve the default identity up front so it shows in the summary.
        let identity = protocol.default_tls_identity();
        tracing::debug!(host = %identity.host_name(), "Default TLS identity ready");
    }

    println!("{}", serde_json::to_string_pretty(&summary(&protocol, &diagnostics))?);

    match cli.command {
        Commands::Check => Ok(()),
        Commands::Watch => {
            let Some(path) = cli.config else {
                return Err("watch requires --config".into());
            };
            let (watcher, mut updates) = ConfigWatcher::new(&path);
            let _watcher = watcher.run()?;

            loop {
                tokio::select! {
                    Some(new_config) = updates.recv() => {
                        if let Err(e) = protocol.apply_config(&new_config) {
                            tracing::error!(error = %e, "Reload rejected, keeping current configuration");
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                }
            }
            Ok(())
        }
    }
}
