use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gatekeeper::config::GatekeeperConfig;
use gatekeeper::http::{HttpServer, HttpUpstream};
use gatekeeper::ratelimit::{SystemClock, TieredLimiter, TracingObserver};

/// Tiered rate-limiting gateway for a completion API.
#[derive(Parser, Debug)]
#[command(name = "gatekeeper", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Upstream completion URL, overriding the configuration
    #[arg(long)]
    upstream_url: Option<String>,

    /// Key callers on X-Forwarded-For/X-Real-IP (only behind a trusted proxy)
    #[arg(long)]
    trust_forwarded_headers: bool,

    /// Sweep interval in seconds, overriding the configuration
    #[arg(long)]
    sweep_interval_secs: Option<u64>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    info!("Starting Gatekeeper admission gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => GatekeeperConfig::from_file(path)?,
        None => GatekeeperConfig::default(),
    };
    if let Some(addr) = args.listen {
        config.server.http_addr = addr;
    }
    if let Some(url) = args.upstream_url {
        config.upstream.url = url;
    }
    if args.trust_forwarded_headers {
        config.server.trust_forwarded_headers = true;
    }
    if let Some(secs) = args.sweep_interval_secs {
        config.rate_limiting.sweep_interval_secs = secs;
    }
    config.validate()?;
    info!(http_addr = %config.server.http_addr, "Configuration loaded");

    // Build the tiers; misconfiguration stops startup here
    let limiter = TieredLimiter::from_config(
        &config.rate_limiting.tiers,
        Arc::new(SystemClock),
        Arc::new(TracingObserver),
    )?;
    let sweeper = limiter.spawn_sweeper(config.rate_limiting.sweep_interval())?;

    let upstream = HttpUpstream::new(config.upstream.url.clone(), config.upstream.timeout())?;
    info!(url = %upstream.url(), "Upstream configured");

    let server = HttpServer::new(
        config.server.http_addr,
        Arc::new(limiter),
        Arc::new(upstream),
    )
    .trust_forwarded_headers(config.server.trust_forwarded_headers);

    // Run the server with graceful shutdown on Ctrl+C
    let served = server.serve_with_shutdown(shutdown_signal()).await;

    sweeper.stop().await;
    served?;

    info!("Gatekeeper stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
