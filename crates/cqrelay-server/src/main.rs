//! cqrelay: WebSocket relay between a chat-bot client and a OneBot backend.
//!
//! Outgoing commands that reference local files or inline base64 payloads are
//! rewritten to URLs served by an upload service before reaching the backend.

mod auth;
mod config;
mod logging;
mod media;
mod server;
mod session;
mod transport;

use clap::Parser;
use config::{Overrides, RelayConfig};
use server::RelayServer;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// cqrelay — OneBot WebSocket relay with media upload
#[derive(Parser, Debug)]
#[command(name = "cqrelay", version, about = "OneBot WebSocket relay with media upload")]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "cqrelay.toml")]
    config: String,

    /// Listen address (host:port)
    #[arg(long)]
    listen: Option<String>,

    /// WebSocket path clients connect to
    #[arg(long)]
    path: Option<String>,

    /// Upstream OneBot WebSocket URL
    #[arg(long)]
    upstream: Option<String>,

    /// Upload service endpoint
    #[arg(long)]
    upload_endpoint: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let overrides = Overrides {
        listen: cli.listen,
        path: cli.path,
        upstream_url: cli.upstream,
        upload_endpoint: cli.upload_endpoint,
        log_level: cli.log_level.clone(),
    };

    let config_path = PathBuf::from(&cli.config);
    let relay_config = match RelayConfig::load(Some(&config_path), overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            logging::init_default(cli.log_level.as_deref().unwrap_or("info"));
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    // Flushes the log file on drop.
    let _log_guard = match logging::init(&relay_config.log) {
        Ok(guard) => guard,
        Err(e) => {
            logging::init_default(&relay_config.log.level);
            error!(error = %e, "failed to initialize logging");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %relay_config.listen,
        "starting cqrelay"
    );

    let relay = RelayServer::new(relay_config);

    tokio::select! {
        result = relay.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("cqrelay stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
