use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dirpay::api::AppState;
use dirpay::config::Config;
use dirpay::providers::ProviderRegistry;
use dirpay::services::mailer::Mailer;
use dirpay::{api, db, jobs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dirpay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting dirpay server...");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    let registry = Arc::new(ProviderRegistry::from_config(&config));
    let mailer = Mailer::from_config(&config);

    // Pending-transaction sweeper: only scheduled when a TTL policy is
    // configured.
    if let Some(ttl_hours) = config.pending_ttl_hours {
        let scheduler = JobScheduler::new().await?;
        let sweep_pool = pool.clone();
        let job = Job::new_async(config.pending_sweep_schedule.as_str(), move |_id, _l| {
            let pool = sweep_pool.clone();
            Box::pin(async move {
                if let Err(e) = jobs::pending_sweeper::sweep_stale_pending(&pool, ttl_hours).await {
                    tracing::error!(error = %e, "Pending-transaction sweep failed");
                }
            })
        })?;
        scheduler.add(job).await?;
        scheduler.start().await?;
        tracing::info!(
            ttl_hours = ttl_hours,
            schedule = %config.pending_sweep_schedule,
            "Pending-transaction sweeper scheduled"
        );
    } else {
        tracing::info!("No pending TTL configured, sweeper disabled");
    }

    // Build application state
    let state = AppState {
        pool: pool.clone(),
        config: config.clone(),
        registry,
        mailer,
    };

    // Build router
    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(api::webhooks::router())
        .merge(api::checkout::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::new(config.host.parse()?, config.port);
    tracing::info!("Listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    tracing::info!("Shutdown signal received, cleaning up...");
}
