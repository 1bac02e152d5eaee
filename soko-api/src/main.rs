use std::net::SocketAddr;
use std::sync::Arc;

use soko_api::{app, AppState};
use soko_catalog::InventoryLedger;
use soko_momo::{MomoClient, MomoConfig};
use soko_order::{CartStore, CheckoutOrchestrator, DraftStore, OrderLedger};
use soko_store::{
    notification_worker, NotificationQueue, PgInventoryLedger, PgOrderLedger, RedisDraftStore,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "soko_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = soko_store::Config::load()?;
    tracing::info!("Starting Soko API on port {}", config.server.port);

    let db = soko_store::Db::new(&config.database.url).await?;
    db.migrate().await?;

    let redis = Arc::new(soko_store::RedisClient::new(
        &config.redis.url,
        config.redis.cart_ttl_seconds,
    )?);

    let gateway = Arc::new(MomoClient::new(MomoConfig {
        subscription_key: config.gateway.subscription_key.clone(),
        api_user: config.gateway.api_user.clone(),
        api_key: config.gateway.api_key.clone(),
        environment: config.gateway.environment,
    })?);

    let inventory: Arc<dyn InventoryLedger> = Arc::new(PgInventoryLedger::new(db.pool.clone()));
    let orders: Arc<dyn OrderLedger> = Arc::new(PgOrderLedger::new(db.pool.clone()));
    let carts: Arc<dyn CartStore> = redis.clone();
    // Drafts live beside the carts in Redis so any instance can settle a
    // poll for a payment initiated elsewhere.
    let drafts: Arc<dyn DraftStore> = Arc::new(RedisDraftStore::new(
        redis.as_ref().clone(),
        config.business_rules.draft_ttl_seconds,
    ));

    let (queue, queue_rx) = NotificationQueue::new();
    tokio::spawn(notification_worker(queue_rx));

    let orchestrator = Arc::new(CheckoutOrchestrator::new(
        gateway,
        orders.clone(),
        drafts,
        carts.clone(),
        inventory.clone(),
        Arc::new(queue),
        config.business_rules.checkout_rules(),
    ));

    let state = AppState {
        orchestrator,
        orders,
        inventory,
        carts,
        redis: Some(redis),
        rate_limit: config.rate_limit.clone(),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}
