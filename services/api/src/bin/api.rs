//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, HttpPushAdapter, LogOnlyPushAdapter, PgRateLimiter},
    config::Config,
    error::ApiError,
    web::{build_router, Adapters, AppState},
};
use reading_log_core::memory::{InMemoryRateLimiter, InMemoryStore};
use reading_log_core::ports::NotificationService;
use reading_log_core::SystemClock;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Initialize Push Delivery ---
    let notifier: Arc<dyn NotificationService> = match &config.push {
        Some(push) => {
            info!(endpoint = %push.endpoint, timeout = ?push.timeout, "Push delivery enabled");
            Arc::new(HttpPushAdapter::from_config(push.clone())?)
        }
        None => {
            warn!("PUSH_ENDPOINT not set, notifications will be logged and dropped");
            Arc::new(LogOnlyPushAdapter)
        }
    };
    let clock = Arc::new(SystemClock);

    // --- 3. Connect to Database & Run Migrations ---
    let adapters = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(database_url)
                .await?;
            let db_adapter = Arc::new(DbAdapter::new(db_pool.clone()));
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");

            Adapters {
                db: db_adapter.clone(),
                audit: db_adapter,
                rate_limiter: Arc::new(PgRateLimiter::new(db_pool, config.verify_rate_limit)),
                notifier,
                clock,
            }
        }
        None => {
            warn!("DATABASE_URL not set, running on the in-memory store; data is lost on exit");
            let store = Arc::new(InMemoryStore::new());
            Adapters {
                db: store.clone(),
                audit: store,
                rate_limiter: Arc::new(InMemoryRateLimiter::new(config.verify_rate_limit)),
                notifier,
                clock,
            }
        }
    };

    // --- 4. Build the Shared AppState and Router ---
    let bind_address = config.bind_address;
    let app_state = Arc::new(AppState::new(config, adapters));
    let app = build_router(app_state)?;

    // --- 5. Start the Server ---
    info!("Starting server on {}", bind_address);
    info!("Swagger UI available at http://{}/swagger-ui", bind_address);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
