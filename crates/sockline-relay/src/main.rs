//! Sockline relay - WebSocket fan-out relay for the sockline frame protocol.

use anyhow::Result;
use axum::{routing::get, Router};
use clap::Parser;
use sockline_relay::{config, logging, routes, state, ws};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use logging::{LogConfig, LogFormat};

/// Sockline relay - broadcast relay for sockline clients.
#[derive(Parser, Debug)]
#[command(name = "sockline-relay")]
#[command(about = "WebSocket fan-out relay for the sockline frame protocol")]
#[command(version)]
struct Cli {
    /// Read settings from this file instead of config/default.toml
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen on this port, overriding the config file
    #[arg(short, long)]
    port: Option<u16>,

    /// More operational logging (INFO for most targets)
    #[arg(short, long)]
    verbose: bool,

    /// Detailed logging (DEBUG)
    #[arg(short, long)]
    debug: bool,

    /// Per-frame logging (TRACE for everything)
    #[arg(long)]
    trace: bool,

    /// Warnings and errors only
    #[arg(short, long)]
    quiet: bool,

    /// Pin a log level for one target (e.g. "hub=debug" or "ws=trace").
    /// May be repeated. Bare names get the "sockline::" prefix.
    #[arg(long = "log", value_name = "TARGET=LEVEL")]
    log_overrides: Vec<String>,

    /// Emit logs as plain text or JSON
    #[arg(long = "log-format", value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,
}

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging comes up first so config loading can report problems.
    let log_config = LogConfig::from_cli(
        cli.verbose,
        cli.debug,
        cli.trace,
        cli.quiet,
        cli.log_overrides,
        cli.log_format,
    );
    logging::init(&log_config);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // CLI flags beat the file.
    if let Some(port) = cli.port {
        config.port = port;
    }

    tracing::info!(target: "sockline::startup", "Loaded configuration (port: {})", config.port);

    let state = Arc::new(AppState::new(config.clone()));
    tracing::info!(target: "sockline::startup",
        "Initialized relay state (max {} clients, {} messages retained)",
        config.max_connections, config.history_limit);

    let api_routes = Router::new()
        .route("/health", get(routes::health))
        .route("/stats", get(routes::stats));

    let app = Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws::upgrade))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let host: IpAddr = config.host.parse()?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(target: "sockline::startup", "Starting relay on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
