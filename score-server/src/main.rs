use anyhow::Context;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use score_core::{JsonFileCache, LocalCache, MemoryCache, ScoreAggregator, SystemClock};
use score_persistence::{connection::connect_and_migrate, repositories::ScoreRepository};
use score_server::{auth::AuthService, config::Config, create_routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting carbon score server...");

    let config = Config::from_env()?;

    let db = connect_and_migrate(&config.database_url)
        .await
        .context("Failed to connect to database and run migrations")?;
    let clock = Arc::new(SystemClock);
    let store = Arc::new(ScoreRepository::with_clock(db, clock.clone()));

    let cache: Arc<dyn LocalCache> = match &config.score_cache_path {
        Some(path) => {
            info!("Persisting score cache to {}", path);
            Arc::new(JsonFileCache::open_or_empty(path))
        }
        None => Arc::new(MemoryCache::new()),
    };

    let aggregator = Arc::new(ScoreAggregator::new(
        store,
        cache,
        clock,
        config.aggregator_config(),
    ));

    let auth_service = if config.auth_dev_mode {
        info!("Starting in development authentication mode - JWT validation disabled");
        Arc::new(AuthService::new_dev_mode())
    } else {
        if config.jwt_secret.is_empty() {
            anyhow::bail!("JWT_SECRET must be set unless AUTH_DEV_MODE=true");
        }
        Arc::new(AuthService::new(&config.jwt_secret))
    };

    if config.admin_token.is_none() {
        info!("ADMIN_TOKEN not set; score overwrites are disabled");
    }

    let host: std::net::IpAddr = config
        .host
        .parse()
        .with_context(|| format!("Invalid HOST '{}'", config.host))?;
    let port = config.port;

    let routes = create_routes(aggregator, auth_service, Arc::new(config));

    info!("Server starting on {}:{}", host, port);

    let (addr, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown((host, port), shutdown_signal())
        .context("Failed to bind server address")?;

    info!(
        "Server started successfully on {}. Press Ctrl+C to stop.",
        addr
    );
    server.await;
    info!("Server shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    // Wait for SIGINT (Ctrl+C) or SIGTERM
    #[cfg(unix)]
    {
        use signal::unix::{SignalKind, signal};

        let (Ok(mut sigint), Ok(mut sigterm)) = (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) else {
            tracing::error!("Failed to install signal handlers");
            return std::future::pending().await;
        };

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
            return std::future::pending().await;
        }
        info!("Received Ctrl+C, shutting down gracefully...");
    }
}
