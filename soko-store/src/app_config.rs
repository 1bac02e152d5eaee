use serde::Deserialize;
use std::env;

use soko_core::payment::Environment;
use soko_order::CheckoutRules;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub gateway: GatewayConfig,
    pub business_rules: BusinessRules,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_cart_ttl")]
    pub cart_ttl_seconds: u64,
}

/// Collections API credentials. The environment also decides the currency
/// orders are priced in (EUR in sandbox, RWF in production).
#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    pub subscription_key: String,
    pub api_user: String,
    pub api_key: String,
    pub environment: Environment,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    pub delivery_fee: i64,
    pub tax_rate: f64,
    #[serde(default = "default_draft_ttl")]
    pub draft_ttl_seconds: u64,
    #[serde(default = "default_allow_negative_stock")]
    pub allow_negative_stock: bool,
}

impl BusinessRules {
    pub fn checkout_rules(&self) -> CheckoutRules {
        CheckoutRules {
            delivery_fee: self.delivery_fee,
            tax_rate: self.tax_rate,
            draft_ttl_seconds: self.draft_ttl_seconds,
            allow_negative_stock: self.allow_negative_stock,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub requests: i64,
    pub window_seconds: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 60,
            window_seconds: 60,
        }
    }
}

fn default_cart_ttl() -> u64 {
    6 * 3600
}

fn default_draft_ttl() -> u64 {
    3600
}

fn default_allow_negative_stock() -> bool {
    true
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, not checked in.
            .add_source(config::File::with_name("config/local").required(false))
            // E.g. SOKO__DATABASE__URL overrides database.url.
            .add_source(config::Environment::with_prefix("SOKO").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
