use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use talkvid_core::store::TaskStore;
use talkvid_db::{MemoryTaskStore, PgTaskStore};
use talkvid_worker::{Supervisor, SupervisorConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use talkvid_api::background::task_retention;
use talkvid_api::config::ServerConfig;
use talkvid_api::router::build_app_router;
use talkvid_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let supervisor_config = SupervisorConfig::from_env();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "talkvid_api=debug,talkvid_worker=debug,tower_http=debug".into());
    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");
    tracing::info!(
        max_concurrent = supervisor_config.max_concurrent,
        log_dir = %supervisor_config.paths.log_dir.display(),
        output_dir = %supervisor_config.paths.output_dir.display(),
        "Loaded supervisor configuration"
    );

    // --- Task store ---
    let (store, pool) = match &config.database_url {
        Some(database_url) => {
            let pool = talkvid_db::create_pool(database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connection pool created");

            talkvid_db::health_check(&pool)
                .await
                .expect("Database health check failed");
            tracing::info!("Database health check passed");

            talkvid_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");

            let store: Arc<dyn TaskStore> = Arc::new(PgTaskStore::new(pool.clone()));
            (store, Some(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, tasks are kept in memory only");
            let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
            (store, None)
        }
    };

    // --- Supervisor ---
    let shutdown = CancellationToken::new();
    let supervisor = Arc::new(Supervisor::new(store.clone(), supervisor_config));
    let scheduler_handle = supervisor.start(shutdown.clone());

    // --- Retention ---
    let retention_handle = tokio::spawn(task_retention::run(
        store.clone(),
        config.task_retention_days,
        config.retention_interval,
        shutdown.clone(),
    ));

    // --- App state ---
    let state = AppState {
        supervisor,
        store,
        pool,
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Running generator jobs are detached and keep going; the next start
    // adopts them.
    shutdown.cancel();
    if let Some(handle) = scheduler_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), retention_handle).await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or SIGTERM.
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
