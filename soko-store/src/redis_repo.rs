use async_trait::async_trait;
use redis::{AsyncCommands, RedisResult};
use uuid::Uuid;

use soko_core::CheckoutError;
use soko_order::{Cart, CartStore, DraftStore, OrderDraft};

fn persistence(err: redis::RedisError) -> CheckoutError {
    CheckoutError::Persistence(err.to_string())
}

/// Redis session store: carts as JSON blobs with an hours-scale TTL, plus
/// the counter used by the API rate-limit middleware.
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
    cart_ttl_seconds: u64,
}

impl RedisClient {
    pub fn new(connection_string: &str, cart_ttl_seconds: u64) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self {
            client,
            cart_ttl_seconds,
        })
    }

    fn cart_key(session: &str) -> String {
        format!("cart:{session}")
    }

    /// Fixed-window counter: INCR + EXPIRE in one atomic pipeline. Returns
    /// whether the caller is still under `limit` for the current window.
    pub async fn check_rate_limit(
        &self,
        key: &str,
        limit: i64,
        window_seconds: i64,
    ) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, window_seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count <= limit)
    }
}

#[async_trait]
impl CartStore for RedisClient {
    async fn load(&self, session: &str) -> Result<Cart, CheckoutError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(persistence)?;
        let raw: Option<String> = conn
            .get(Self::cart_key(session))
            .await
            .map_err(persistence)?;
        match raw {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| CheckoutError::Persistence(format!("unreadable cart: {e}"))),
            None => Ok(Cart::new()),
        }
    }

    async fn save(&self, session: &str, cart: &Cart) -> Result<(), CheckoutError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(persistence)?;
        let json = serde_json::to_string(cart)
            .map_err(|e| CheckoutError::Persistence(e.to_string()))?;
        conn.set_ex::<_, _, ()>(Self::cart_key(session), json, self.cart_ttl_seconds)
            .await
            .map_err(persistence)?;
        Ok(())
    }

    async fn clear(&self, session: &str) -> Result<(), CheckoutError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(persistence)?;
        conn.del::<_, ()>(Self::cart_key(session))
            .await
            .map_err(persistence)?;
        Ok(())
    }
}

/// Pending-payment order drafts in the shared Redis instance, so a poll can
/// settle on any API instance, not just the one that initiated the payment.
/// Keys expire with the configured draft TTL.
#[derive(Clone)]
pub struct RedisDraftStore {
    redis: RedisClient,
    ttl_seconds: u64,
}

impl RedisDraftStore {
    pub fn new(redis: RedisClient, ttl_seconds: u64) -> Self {
        Self { redis, ttl_seconds }
    }

    fn draft_key(external_ref: Uuid) -> String {
        format!("draft:{external_ref}")
    }
}

#[async_trait]
impl DraftStore for RedisDraftStore {
    async fn put(&self, draft: OrderDraft) -> Result<(), CheckoutError> {
        let Some(external_ref) = draft.external_ref else {
            return Err(CheckoutError::Persistence(
                "draft without external ref".into(),
            ));
        };
        let json = serde_json::to_string(&draft)
            .map_err(|e| CheckoutError::Persistence(e.to_string()))?;
        let mut conn = self
            .redis
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(persistence)?;
        conn.set_ex::<_, _, ()>(Self::draft_key(external_ref), json, self.ttl_seconds)
            .await
            .map_err(persistence)?;
        Ok(())
    }

    async fn get(&self, external_ref: Uuid) -> Result<Option<OrderDraft>, CheckoutError> {
        let mut conn = self
            .redis
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(persistence)?;
        let raw: Option<String> = conn
            .get(Self::draft_key(external_ref))
            .await
            .map_err(persistence)?;
        raw.map(|json| {
            serde_json::from_str(&json)
                .map_err(|e| CheckoutError::Persistence(format!("unreadable draft: {e}")))
        })
        .transpose()
    }

    async fn discard(&self, external_ref: Uuid) -> Result<(), CheckoutError> {
        let mut conn = self
            .redis
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(persistence)?;
        conn.del::<_, ()>(Self::draft_key(external_ref))
            .await
            .map_err(persistence)?;
        Ok(())
    }
}
