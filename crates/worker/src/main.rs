use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_cache::{CacheBackend, CacheStore, MemoryBackend, RedisBackend};
use relay_queue::{Dispatcher, DispatcherConfig, HandlerRegistry, PgQueueStore, QueueStore};
use relay_worker::auth::TokenService;
use relay_worker::config::WorkerConfig;
use relay_worker::jobs::MaintenanceJobs;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_worker=debug,relay_queue=debug,relay_cache=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env();
    tracing::info!(
        env = %config.env,
        worker = config.worker,
        concurrency = config.concurrency,
        "Loaded worker configuration"
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = relay_queue::create_pool(&database_url, config.concurrency as u32)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    relay_queue::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Cache ---
    let backend: Arc<dyn CacheBackend> = match config.redis.host.as_deref() {
        Some(host) => Arc::new(
            RedisBackend::connect(host, config.redis.port)
                .await
                .expect("Failed to connect to Redis"),
        ),
        None => {
            tracing::warn!("REDIS_HOST not set, using in-process cache");
            Arc::new(MemoryBackend::new())
        }
    };
    let cache = CacheStore::new(backend, config.env.clone());

    // --- Services ---
    let tokens = Arc::new(TokenService::new(&config.jwt_secret, cache.clone()));

    let registry = Arc::new(HandlerRegistry::new());
    registry
        .register(MaintenanceJobs::new(Arc::clone(&tokens)))
        .await;
    tracing::info!(handlers = registry.len().await, "Handlers registered");

    // --- Dispatcher ---
    let store = Arc::new(PgQueueStore::new(pool.clone())) as Arc<dyn QueueStore>;
    let dispatcher = Dispatcher::new(
        store,
        Arc::clone(&registry),
        DispatcherConfig {
            concurrency: config.concurrency,
            ..Default::default()
        },
    );

    if config.worker {
        dispatcher.start();
        tracing::info!("Queue worker enabled");
    } else {
        tracing::info!("Worker mode disabled; this process only submits jobs");
    }

    // --- Run until signalled ---
    shutdown_signal().await;

    // --- Post-shutdown cleanup ---
    // Stop dequeuing first and let in-flight jobs run to completion, then
    // release the storage connection.
    dispatcher.drain_and_stop().await;
    pool.close().await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the worker shuts
/// down cleanly whether stopped interactively or by a process manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
