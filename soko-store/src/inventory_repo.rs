use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use soko_catalog::{InventoryLedger, LedgerError, Product, Tier, VariantSelector};

/// Row the three-step selector resolution landed on. Mirrors the in-memory
/// fallback chain: attribute -> visual -> product.
pub(crate) enum StockTarget {
    Product,
    Visual(Uuid),
    Attribute(Uuid),
}

impl StockTarget {
    fn tier(&self) -> Tier {
        match self {
            StockTarget::Product => Tier::Product,
            StockTarget::Visual(_) => Tier::Visual,
            StockTarget::Attribute(_) => Tier::Attribute,
        }
    }
}

/// Resolve a selector against the variant tables. `Ok(None)` means the
/// product itself does not exist; any variant miss degrades to a coarser
/// tier instead.
pub(crate) async fn resolve_target(
    conn: &mut PgConnection,
    product_id: Uuid,
    selector: &VariantSelector,
) -> Result<Option<StockTarget>, sqlx::Error> {
    let exists = sqlx::query_scalar::<_, Uuid>("SELECT id FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_optional(&mut *conn)
        .await?;
    if exists.is_none() {
        return Ok(None);
    }

    let (kind, label, attr_value) = match selector {
        VariantSelector::None => return Ok(Some(StockTarget::Product)),
        VariantSelector::Visual { kind, label } => (kind, label, None),
        VariantSelector::VisualAndAttribute {
            kind,
            label,
            attr_value,
        } => (kind, label, Some(attr_value)),
    };

    let visual_id = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM visual_variants WHERE product_id = $1 AND kind = $2 AND label = $3",
    )
    .bind(product_id)
    .bind(kind.as_str())
    .bind(label)
    .fetch_optional(&mut *conn)
    .await?;
    let Some(visual_id) = visual_id else {
        return Ok(Some(StockTarget::Product));
    };

    if let Some(value) = attr_value {
        let attr_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM attribute_variants WHERE visual_variant_id = $1 AND value = $2",
        )
        .bind(visual_id)
        .bind(value)
        .fetch_optional(&mut *conn)
        .await?;
        if let Some(attr_id) = attr_id {
            return Ok(Some(StockTarget::Attribute(attr_id)));
        }
    }

    Ok(Some(StockTarget::Visual(visual_id)))
}

/// Apply a signed stock delta at the resolved tier. Counters are allowed to
/// go negative; `stock = stock + delta` with no floor.
pub(crate) async fn adjust_stock(
    conn: &mut PgConnection,
    product_id: Uuid,
    delta: i64,
    selector: &VariantSelector,
) -> Result<Tier, LedgerError> {
    let target = resolve_target(conn, product_id, selector)
        .await
        .map_err(storage)?
        .ok_or(LedgerError::UnknownProduct(product_id))?;

    let result = match &target {
        StockTarget::Product => {
            sqlx::query("UPDATE products SET stock = stock + $1 WHERE id = $2")
                .bind(delta)
                .bind(product_id)
                .execute(&mut *conn)
                .await
        }
        StockTarget::Visual(id) => {
            sqlx::query("UPDATE visual_variants SET stock = stock + $1 WHERE id = $2")
                .bind(delta)
                .bind(id)
                .execute(&mut *conn)
                .await
        }
        StockTarget::Attribute(id) => {
            sqlx::query("UPDATE attribute_variants SET stock = stock + $1 WHERE id = $2")
                .bind(delta)
                .bind(id)
                .execute(&mut *conn)
                .await
        }
    };
    result.map_err(storage)?;

    let tier = target.tier();
    tracing::debug!(%product_id, delta, tier = tier.as_str(), "stock adjusted");
    Ok(tier)
}

pub(crate) async fn stock_at(
    conn: &mut PgConnection,
    product_id: Uuid,
    selector: &VariantSelector,
) -> Result<i64, LedgerError> {
    let target = resolve_target(conn, product_id, selector)
        .await
        .map_err(storage)?
        .ok_or(LedgerError::UnknownProduct(product_id))?;

    let stock = match &target {
        StockTarget::Product => {
            sqlx::query_scalar::<_, i64>("SELECT stock FROM products WHERE id = $1")
                .bind(product_id)
                .fetch_one(&mut *conn)
                .await
        }
        StockTarget::Visual(id) => {
            sqlx::query_scalar::<_, i64>("SELECT stock FROM visual_variants WHERE id = $1")
                .bind(id)
                .fetch_one(&mut *conn)
                .await
        }
        StockTarget::Attribute(id) => {
            sqlx::query_scalar::<_, i64>("SELECT stock FROM attribute_variants WHERE id = $1")
                .bind(id)
                .fetch_one(&mut *conn)
                .await
        }
    };
    stock.map_err(storage)
}

fn storage(err: sqlx::Error) -> LedgerError {
    LedgerError::Storage(err.to_string())
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    base_price: i64,
    stock: i64,
    discount_percent: i16,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: row.id,
            name: row.name,
            base_price: row.base_price,
            stock: row.stock,
            discount_percent: row.discount_percent.clamp(0, 100) as u8,
            created_at: row.created_at,
        }
    }
}

/// Postgres-backed inventory ledger. The resolution helpers are free
/// functions over a connection so the order repository can run the same
/// logic inside its transaction.
pub struct PgInventoryLedger {
    pool: PgPool,
}

impl PgInventoryLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InventoryLedger for PgInventoryLedger {
    async fn deduct(
        &self,
        product_id: Uuid,
        quantity: i64,
        selector: &VariantSelector,
    ) -> Result<Tier, LedgerError> {
        let mut conn = self.pool.acquire().await.map_err(storage)?;
        adjust_stock(&mut conn, product_id, -quantity, selector).await
    }

    async fn restore(
        &self,
        product_id: Uuid,
        quantity: i64,
        selector: &VariantSelector,
    ) -> Result<Tier, LedgerError> {
        let mut conn = self.pool.acquire().await.map_err(storage)?;
        adjust_stock(&mut conn, product_id, quantity, selector).await
    }

    async fn available(
        &self,
        product_id: Uuid,
        selector: &VariantSelector,
    ) -> Result<i64, LedgerError> {
        let mut conn = self.pool.acquire().await.map_err(storage)?;
        stock_at(&mut conn, product_id, selector).await
    }

    async fn product(&self, product_id: Uuid) -> Result<Option<Product>, LedgerError> {
        let row = sqlx::query_as::<_, ProductRow>(
            "SELECT id, name, base_price, stock, discount_percent, created_at \
             FROM products WHERE id = $1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        Ok(row.map(Product::from))
    }
}
