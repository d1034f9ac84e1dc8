//! Server startup, shutdown, and worker spawning logic.
//!
//! `run_server` wires the store, the optional snapshot cache, the redirect
//! engine and its background worker, then serves HTTP until a shutdown
//! signal arrives. Queued access records are flushed before it returns.

use crate::cache::{Cache, CachedLinkStore};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, AppResult};
use crate::jobs::{create_job_channel, Worker, WorkerConfig};
use crate::rate_limit::AttemptLimiter;
use crate::routes;
use crate::services::access_gate::AccessGate;
use crate::services::access_recorder::AccessRecorder;
use crate::services::credentials::BcryptHasher;
use crate::services::geo::build_geo_lookup;
use crate::services::resolver::RedirectResolver;
use crate::state;
use crate::store::LinkStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Run the web server with the given configuration.
///
/// # Errors
///
/// Fails if the database is unreachable, migrations fail, or the address
/// cannot be bound. An unreachable cache only disables caching.
pub async fn run_server(config: Config, addr: String, should_migrate: bool) -> AppResult<()> {
    info!("Starting linkgate server...");

    // Initialize database connection pool
    info!("Connecting to database...");
    let repository = Repository::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
        config.database.acquire_timeout_seconds,
    )
    .await?;

    // Run migrations if requested
    if should_migrate {
        info!("Running database migrations...");
        repository.run_migrations().await?;
        info!("Migrations completed successfully");
    }

    let cache = connect_cache(&config).await;
    let store: Arc<dyn LinkStore> = match &cache {
        Some(cache) => Arc::new(CachedLinkStore::new(Arc::new(repository), cache.clone())),
        None => Arc::new(repository),
    };

    let hasher = Arc::new(BcryptHasher::new(config.security.bcrypt_cost));
    let geo = build_geo_lookup(&config.geoip);
    info!("Geo lookup provider: {}", geo.name());

    // Create background job worker
    let (job_sender, job_receiver) = create_job_channel();
    let recorder = AccessRecorder::new(store.clone(), geo);
    let worker = Worker::new(store.clone(), recorder, job_receiver)
        .with_config(WorkerConfig::from(&config.worker));

    // Start background worker in separate task
    let worker_handle = tokio::spawn(worker.run());

    let resolver = Arc::new(RedirectResolver::new(
        store.clone(),
        AccessGate::new(hasher),
        job_sender,
    ));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let attempt_limiter = Arc::new(AttemptLimiter::from_config(&config.attempts));
    let sweeper_handle = attempt_limiter.clone().spawn_sweeper(
        Duration::from_secs(config.attempts.sweep_interval_seconds),
        clock.clone(),
    );

    let state = Arc::new(state::AppState {
        store,
        cache,
        resolver,
        attempt_limiter,
        clock,
    });

    // Create router
    let app = routes::create_router(state, config.cors.allowed_origins, config.rate_limit)?;

    // Start server
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to bind to address {}: {}", addr, e)))?;

    info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(create_shutdown_signal())
        .await
        .map_err(|e| AppError::Internal(format!("Server error: {}", e)))?;

    sweeper_handle.abort();

    // The router owned the last job sender; the worker exits once the queue drains
    if let Err(e) = worker_handle.await {
        error!("Worker task failed: {:?}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Connect the snapshot cache if enabled and reachable
async fn connect_cache(config: &Config) -> Option<Cache> {
    if !config.cache.enabled {
        info!("Cache disabled");
        return None;
    }

    info!("Connecting to cache...");
    let cache = match Cache::new(
        &config.cache.url,
        config.cache.max_connections,
        config.cache.default_ttl_seconds,
    )
    .await
    {
        Ok(cache) => cache,
        Err(e) => {
            warn!("Cache setup failed: {}. Continuing without cache.", e);
            return None;
        }
    };

    // Ping cache to verify connection
    match cache.ping().await {
        Ok(_) => {
            info!("Cache connection verified");
            Some(cache)
        }
        Err(e) => {
            warn!("Cache ping failed: {}. Continuing without cache.", e);
            None
        }
    }
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn create_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    #[cfg(not(unix))]
    ctrl_c.await;

    info!("Shutdown signal received");
}
