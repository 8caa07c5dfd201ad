//! netmond - Network monitor daemon
//!
//! HTTP server exposing local network diagnostics.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use netmon::config::{AppState, Config, DEFAULT_CONFIG_PATH};
use netmon::routes;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "netmond")]
#[command(about = "Network monitor - local network diagnostics over HTTP")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "NETMOND_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Address to bind the HTTP server to
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Interface used when a request does not name one
    #[arg(short, long)]
    interface: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(interface) = args.interface {
        config.default_interface = interface;
    }

    let _guard = init_logging(&config);

    tracing::info!("Starting netmond");
    tracing::info!("Config path: {:?}", args.config);
    tracing::info!(
        "Capture tool: {} (wrapper: {:?}), reachability tool: {}",
        config.capture_tool,
        config.privilege_command,
        config.ping_tool
    );

    let addr = SocketAddr::from((config.bind_address, config.port));
    let state = AppState::new(config).context("Failed to initialize application state")?;
    let app = routes::create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {}", addr))?;
    tracing::info!("HTTP server listening on {}", addr);

    // Set up signal handlers
    let shutdown = Arc::new(Notify::new());
    let shutdown_clone = shutdown.clone();

    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, shutting down");
            }
        }

        shutdown_clone.notify_one();
    });

    // ConnectInfo<SocketAddr> feeds the client address into request logging
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            shutdown.notified().await;
        })
        .await
        .context("HTTP server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Log to stdout, or to `<log_dir>/netmond.log` when a log directory is set.
fn init_logging(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    match &config.log_dir {
        Some(dir) => {
            let file_appender = rolling::never(dir, "netmond.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(non_blocking)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    }
}
