use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;

use rental_scheduler::config::AppConfig;
use rental_scheduler::db;
use rental_scheduler::handlers;
use rental_scheduler::services::collaborators::gateway::HttpGateway;
use rental_scheduler::services::coordination::RedisStore;
use rental_scheduler::services::scheduler::Scheduler;
use rental_scheduler::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    let store = RedisStore::connect(&config.redis_url).await?;
    tracing::info!("connected to coordination store at {}", config.redis_url);

    if config.gateway_api_key.is_empty() {
        tracing::warn!("GATEWAY_API_KEY is not set, collaborator calls will be unauthenticated");
    }
    let gateway = Arc::new(HttpGateway::new(
        config.gateway_url.clone(),
        config.gateway_api_key.clone(),
    ));

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        notifier: gateway.clone(),
        locks: gateway.clone(),
        chats: gateway.clone(),
        payments: gateway,
    });

    let scheduler = Scheduler::new(state, Arc::new(store));
    scheduler.start();

    let app = handlers::router(scheduler.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting diagnostics server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await?;

    Ok(())
}

async fn shutdown_signal(scheduler: Scheduler) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    scheduler.stop();
}
