//! termgate-server: SSH terminal gateway.
//!
//! Exposes a REST API for opening and closing SSH sessions and a WebSocket
//! endpoint that relays an interactive shell to the browser.

mod config;
mod http;
mod relay;
mod session;

use clap::Parser;
use config::ServerConfig;
use http::AppState;
use session::SessionRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// termgate-server — SSH terminal gateway
#[derive(Parser, Debug)]
#[command(name = "termgate-server", version, about = "SSH terminal gateway")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file path
    #[arg(long, default_value = "~/.termgate/config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    // Load server config (file + CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let config = match ServerConfig::load(Some(&config_path), cli.port) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        "starting termgate-server"
    );

    let registry = Arc::new(SessionRegistry::new());
    let state = AppState {
        registry: registry.clone(),
        connect_options: config.connect_options(),
    };
    let app = http::router(state, &config.allowed_origins);

    let bind = format!("{}:{}", config.bind_addr, config.port);
    let listener = match tokio::net::TcpListener::bind(&bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, bind = %bind, "failed to bind");
            std::process::exit(1);
        }
    };
    info!(bind = %bind, "listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    // Close live SSH connections before exiting.
    registry.disconnect_all().await;
    info!("termgate-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
        info!("received shutdown signal");
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received shutdown signal");
    }
}
