//! Storefront order engine service

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_orders::config::Config;
use storefront_orders::http::{router, AppState};
use storefront_orders::publisher::{EventPublisher, LogPublisher, NatsPublisher};
use storefront_orders::store::{PgStore, Repositories};
use storefront_orders::OrderEngine;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let store = PgStore::connect(&config.database_url, config.database_max_connections).await?;
    sqlx::migrate!("./migrations").run(store.pool()).await.context("running migrations")?;

    let publisher: Arc<dyn EventPublisher> = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Arc::new(NatsPublisher::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, events will only be logged");
                Arc::new(LogPublisher)
            }
        },
        None => Arc::new(LogPublisher),
    };

    let engine = OrderEngine::new(Repositories::from_backend(Arc::new(store)), config.engine.clone(), publisher);
    let app = router(AppState { engine: Arc::new(engine) });

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("storefront-orders listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, app).await?;
    Ok(())
}
