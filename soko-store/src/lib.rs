pub mod app_config;
pub mod database;
pub mod events;
pub mod inventory_repo;
pub mod order_repo;
pub mod redis_repo;

pub use app_config::Config;
pub use database::Db;
pub use events::{notification_worker, NotificationQueue};
pub use inventory_repo::PgInventoryLedger;
pub use order_repo::PgOrderLedger;
pub use redis_repo::{RedisClient, RedisDraftStore};
