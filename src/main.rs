use anyhow::Result;
use axum::{
    Router,
    http::{Method, header},
    routing::get,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod db;
mod middleware;
mod models;
mod scheduler;
mod utils;

use crate::api::AppState;
use crate::config::Config;
use crate::middleware::rate_limit;
use crate::scheduler::Scheduler;

/// How often stale rate-limit keys are swept, and how old a key's newest
/// entry must be before the sweep drops it.
const LIMITER_CLEANUP_INTERVAL: Duration = Duration::from_secs(600);
const LIMITER_KEY_MAX_AGE: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "rentora_api=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    // Database connection
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .connect(&config.database_url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    // Run migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::info!("Database migrations completed");

    // Background scheduler: fixed maintenance job table, one loop per process
    let scheduler = Scheduler::with_default_jobs(pool.clone(), config.log_retention_days);
    scheduler.start();

    let state = AppState::new(pool, config.clone(), scheduler.clone());

    // Periodic sweep of stale rate-limit keys to bound limiter memory
    {
        let limiter = state.rate_limiter.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(LIMITER_CLEANUP_INTERVAL);
            loop {
                tick.tick().await;
                limiter.cleanup(LIMITER_KEY_MAX_AGE);
            }
        });
    }

    // Configure CORS - supports a comma-separated list of dashboard origins
    let frontend_url =
        std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000".into());

    let origins: Vec<header::HeaderValue> = frontend_url
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600));

    tracing::info!("CORS configured for origins: {}", frontend_url);

    // Build router. The global per-IP rate limit wraps everything, including
    // the auth endpoints; authorization happens per-handler behind it.
    let app = Router::new()
        .route("/ping", get(api::health::ping))
        .route("/health", get(api::health::health_check))
        .nest("/v1", api::routes::v1_routes())
        .with_state(state.clone())
        .layer(axum::middleware::from_fn_with_state(
            state,
            rate_limit::global_rate_limit,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    scheduler.stop();

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
