use std::sync::Arc;

use soko_catalog::InventoryLedger;
use soko_order::{CartStore, CheckoutOrchestrator, OrderLedger};
use soko_store::app_config::RateLimitConfig;
use soko_store::RedisClient;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<CheckoutOrchestrator>,
    pub orders: Arc<dyn OrderLedger>,
    pub inventory: Arc<dyn InventoryLedger>,
    pub carts: Arc<dyn CartStore>,
    /// Absent in tests and single-process runs; the rate limiter fails open
    /// without it.
    pub redis: Option<Arc<RedisClient>>,
    pub rate_limit: RateLimitConfig,
}
