use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use serde_json::{json, Value};
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use tierlimit::config::AppConfig;
use tierlimit::http::{ClientIp, RateLimitLayer};
use tierlimit::ratelimit::{now_millis, RateLimiter};
use tierlimit::store::{Backend, Provider};

/// Demo server with rate limited `/api` routes.
#[derive(Debug, Parser)]
#[command(name = "tierlimit", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address, overriding the configuration
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Remote counter backend, overriding the configuration
    #[arg(long, value_parser = parse_provider)]
    provider: Option<Provider>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn parse_provider(value: &str) -> Result<Provider, String> {
    match value {
        "upstash" | "primary" => Ok(Provider::Upstash),
        "vercel_kv" | "vercel" | "secondary" => Ok(Provider::VercelKv),
        other => Err(format!("unknown provider: {other}")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting tierlimit");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.http_addr = addr;
    }
    if let Some(provider) = args.provider {
        config.rate_limiting.provider = provider;
    }
    info!(
        http_addr = %config.server.http_addr,
        provider = %config.rate_limiting.provider,
        "Configuration loaded"
    );

    let backend = Backend::from_env(config.rate_limiting.provider)?;
    let limiter = RateLimiter::from_backend(config.rate_limiting.clone(), backend)?;
    info!("Rate limiter initialized");

    spawn_cache_purge(limiter.clone());

    let app = Router::new()
        .route("/api/hello", get(hello))
        .layer(RateLimitLayer::new(limiter, ClientIp))
        .route("/health", get(|| async { "OK" }));

    let listener = tokio::net::TcpListener::bind(config.server.http_addr).await?;
    info!("Listening on {}", config.server.http_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("tierlimit stopped");
    Ok(())
}

async fn hello() -> Json<Value> {
    Json(json!({ "message": "hello" }))
}

/// Periodically drop cache entries whose window has closed.
fn spawn_cache_purge(limiter: RateLimiter) {
    let period = limiter.config().window();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period.max(Duration::from_secs(1)));
        loop {
            interval.tick().await;
            let purged = limiter.cache().purge_expired(now_millis());
            if purged > 0 {
                debug!(purged, "Purged expired cache entries");
            }
        }
    });
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
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
