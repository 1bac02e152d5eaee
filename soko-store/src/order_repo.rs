use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use soko_catalog::{Tier, VariantSelector};
use soko_order::{
    Order, OrderDraft, OrderLine, OrderLedger, OrderLedgerError, OrderStatus, PaymentAttempt,
    PaymentAttemptStatus, Purchaser,
};

use crate::inventory_repo;

const ORDER_COLUMNS: &str = "id, user_id, guest_email, full_name, address_line, city, \
     delivery_phone, provider, momo_number, notes, latitude, longitude, subtotal, \
     total_amount, currency, status, external_ref, created_at, updated_at";

/// Postgres order ledger. Order row, lines and stock deductions commit in
/// one transaction; the unique index on `orders.external_ref` backs the
/// application-level duplicate check under concurrency.
pub struct PgOrderLedger {
    pool: PgPool,
}

impl PgOrderLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Option<Uuid>,
    guest_email: Option<String>,
    full_name: String,
    address_line: String,
    city: String,
    delivery_phone: String,
    provider: Option<String>,
    momo_number: Option<String>,
    notes: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    subtotal: i64,
    total_amount: i64,
    currency: String,
    status: String,
    external_ref: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct LineRow {
    id: Uuid,
    order_id: Uuid,
    product_id: Uuid,
    product_name: String,
    selector: serde_json::Value,
    descriptor: String,
    quantity: i64,
    unit_price: i64,
    subtotal: i64,
    tier: String,
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    id: Uuid,
    external_ref: Uuid,
    order_id: Option<Uuid>,
    amount: i64,
    currency: String,
    status: String,
    provider: Option<String>,
    payer_number: Option<String>,
    created_at: DateTime<Utc>,
}

fn storage(err: sqlx::Error) -> OrderLedgerError {
    OrderLedgerError::Storage(err.to_string())
}

fn corrupt(what: &str, value: &str) -> OrderLedgerError {
    OrderLedgerError::Storage(format!("unreadable {what} in row: {value}"))
}

impl TryFrom<LineRow> for OrderLine {
    type Error = OrderLedgerError;

    fn try_from(row: LineRow) -> Result<Self, Self::Error> {
        let tier = Tier::parse(&row.tier).ok_or_else(|| corrupt("tier", &row.tier))?;
        let selector: VariantSelector = serde_json::from_value(row.selector)
            .map_err(|e| OrderLedgerError::Storage(format!("unreadable selector: {e}")))?;
        Ok(OrderLine {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            product_name: row.product_name,
            selector,
            descriptor: row.descriptor,
            quantity: row.quantity,
            unit_price: row.unit_price,
            subtotal: row.subtotal,
            tier,
        })
    }
}

fn order_from(row: OrderRow, lines: Vec<OrderLine>) -> Result<Order, OrderLedgerError> {
    let status = OrderStatus::parse(&row.status).ok_or_else(|| corrupt("status", &row.status))?;
    let purchaser = match row.user_id {
        Some(id) => Purchaser::User { id },
        None => Purchaser::Guest {
            email: row.guest_email.unwrap_or_default(),
        },
    };
    Ok(Order {
        id: row.id,
        purchaser,
        full_name: row.full_name,
        address_line: row.address_line,
        city: row.city,
        delivery_phone: row.delivery_phone,
        provider: row.provider,
        momo_number: row.momo_number,
        notes: row.notes,
        latitude: row.latitude,
        longitude: row.longitude,
        subtotal: row.subtotal,
        total_amount: row.total_amount,
        currency: row.currency,
        status,
        external_ref: row.external_ref,
        lines,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn attempt_from(row: AttemptRow) -> Result<PaymentAttempt, OrderLedgerError> {
    let status =
        PaymentAttemptStatus::parse(&row.status).ok_or_else(|| corrupt("status", &row.status))?;
    Ok(PaymentAttempt {
        id: row.id,
        external_ref: row.external_ref,
        order_id: row.order_id,
        amount: row.amount,
        currency: row.currency,
        status,
        provider: row.provider,
        payer_number: row.payer_number,
        created_at: row.created_at,
    })
}

async fn load_lines(
    conn: &mut PgConnection,
    order_id: Uuid,
) -> Result<Vec<OrderLine>, OrderLedgerError> {
    let rows = sqlx::query_as::<_, LineRow>(
        "SELECT id, order_id, product_id, product_name, selector, descriptor, quantity, \
         unit_price, subtotal, tier FROM order_lines WHERE order_id = $1 ORDER BY id",
    )
    .bind(order_id)
    .fetch_all(conn)
    .await
    .map_err(storage)?;
    rows.into_iter().map(OrderLine::try_from).collect()
}

async fn fetch_order(
    conn: &mut PgConnection,
    order_id: Uuid,
) -> Result<Option<Order>, OrderLedgerError> {
    let row = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
    ))
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(storage)?;
    let Some(row) = row else {
        return Ok(None);
    };
    let lines = load_lines(conn, row.id).await?;
    Ok(Some(order_from(row, lines)?))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

#[async_trait]
impl OrderLedger for PgOrderLedger {
    async fn create_order(
        &self,
        draft: &OrderDraft,
        status: OrderStatus,
    ) -> Result<Order, OrderLedgerError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        if let Some(external_ref) = draft.external_ref {
            let existing =
                sqlx::query_scalar::<_, Uuid>("SELECT id FROM orders WHERE external_ref = $1")
                    .bind(external_ref)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(storage)?;
            if let Some(order_id) = existing {
                return Err(OrderLedgerError::DuplicateRef {
                    external_ref,
                    order_id,
                });
            }
        }

        let order_id = Uuid::new_v4();
        let (user_id, guest_email) = match &draft.purchaser {
            Purchaser::User { id } => (Some(*id), None),
            Purchaser::Guest { email } => (None, Some(email.clone())),
        };
        let insert = sqlx::query(
            "INSERT INTO orders (id, user_id, guest_email, full_name, address_line, city, \
             delivery_phone, provider, momo_number, notes, latitude, longitude, subtotal, \
             total_amount, currency, status, external_ref) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(order_id)
        .bind(user_id)
        .bind(guest_email)
        .bind(&draft.full_name)
        .bind(&draft.address_line)
        .bind(&draft.city)
        .bind(&draft.delivery_phone)
        .bind(&draft.provider)
        .bind(&draft.momo_number)
        .bind(&draft.notes)
        .bind(draft.latitude)
        .bind(draft.longitude)
        .bind(draft.subtotal)
        .bind(draft.total_amount)
        .bind(&draft.currency)
        .bind(status.as_str())
        .bind(draft.external_ref)
        .execute(&mut *tx)
        .await;

        if let Err(err) = insert {
            // Concurrent poller won the unique index race on external_ref.
            if is_unique_violation(&err) {
                if let Some(external_ref) = draft.external_ref {
                    drop(tx);
                    let existing = sqlx::query_scalar::<_, Uuid>(
                        "SELECT id FROM orders WHERE external_ref = $1",
                    )
                    .bind(external_ref)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(storage)?;
                    if let Some(order_id) = existing {
                        return Err(OrderLedgerError::DuplicateRef {
                            external_ref,
                            order_id,
                        });
                    }
                }
            }
            return Err(storage(err));
        }

        let mut lines = Vec::with_capacity(draft.lines.len());
        for line in &draft.lines {
            // Deduction and line insert share the transaction: a failure
            // anywhere rolls every counter back.
            let tier = inventory_repo::adjust_stock(
                &mut *tx,
                line.product_id,
                -line.quantity,
                &line.selector,
            )
            .await?;
            let selector_json = serde_json::to_value(&line.selector)
                .map_err(|e| OrderLedgerError::Storage(e.to_string()))?;
            let line_id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO order_lines (id, order_id, product_id, product_name, selector, \
                 descriptor, quantity, unit_price, subtotal, tier) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(line_id)
            .bind(order_id)
            .bind(line.product_id)
            .bind(&line.product_name)
            .bind(&selector_json)
            .bind(line.selector.to_string())
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.unit_price * line.quantity)
            .bind(tier.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
            lines.push(OrderLine {
                id: line_id,
                order_id,
                product_id: line.product_id,
                product_name: line.product_name.clone(),
                selector: line.selector.clone(),
                descriptor: line.selector.to_string(),
                quantity: line.quantity,
                unit_price: line.unit_price,
                subtotal: line.unit_price * line.quantity,
                tier,
            });
        }

        tx.commit().await.map_err(storage)?;
        tracing::info!(%order_id, status = status.as_str(), lines = lines.len(), "order created");

        let now = Utc::now();
        Ok(Order {
            id: order_id,
            purchaser: draft.purchaser.clone(),
            full_name: draft.full_name.clone(),
            address_line: draft.address_line.clone(),
            city: draft.city.clone(),
            delivery_phone: draft.delivery_phone.clone(),
            provider: draft.provider.clone(),
            momo_number: draft.momo_number.clone(),
            notes: draft.notes.clone(),
            latitude: draft.latitude,
            longitude: draft.longitude,
            subtotal: draft.subtotal,
            total_amount: draft.total_amount,
            currency: draft.currency.clone(),
            status,
            external_ref: draft.external_ref,
            lines,
            created_at: now,
            updated_at: now,
        })
    }

    async fn cancel_order(
        &self,
        order_id: Uuid,
        requester: &Purchaser,
    ) -> Result<Order, OrderLedgerError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage)?
        .ok_or(OrderLedgerError::NotFound(order_id))?;

        let lines = load_lines(&mut *tx, order_id).await?;
        let mut order = order_from(row, lines)?;

        if order.purchaser != *requester {
            return Err(OrderLedgerError::NotOwner);
        }
        if !order.status.cancellable() {
            return Err(OrderLedgerError::InvalidTransition(order.status));
        }

        for line in &order.lines {
            let tier = inventory_repo::adjust_stock(
                &mut *tx,
                line.product_id,
                line.quantity,
                &line.selector,
            )
            .await?;
            tracing::info!(
                %order_id,
                product = %line.product_name,
                quantity = line.quantity,
                tier = tier.as_str(),
                "stock restored on cancellation"
            );
        }

        sqlx::query("UPDATE orders SET status = 'cancelled', updated_at = now() WHERE id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        tx.commit().await.map_err(storage)?;

        order.status = OrderStatus::Cancelled;
        order.updated_at = Utc::now();
        Ok(order)
    }

    async fn record_payment(&self, attempt: PaymentAttempt) -> Result<(), OrderLedgerError> {
        sqlx::query(
            "INSERT INTO payment_attempts (id, external_ref, order_id, amount, currency, \
             status, provider, payer_number, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(attempt.id)
        .bind(attempt.external_ref)
        .bind(attempt.order_id)
        .bind(attempt.amount)
        .bind(&attempt.currency)
        .bind(attempt.status.as_str())
        .bind(&attempt.provider)
        .bind(&attempt.payer_number)
        .bind(attempt.created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                OrderLedgerError::Storage(format!(
                    "payment attempt {} already recorded",
                    attempt.external_ref
                ))
            } else {
                storage(err)
            }
        })?;
        Ok(())
    }

    async fn finalize_payment(
        &self,
        external_ref: Uuid,
        status: PaymentAttemptStatus,
        order_id: Option<Uuid>,
    ) -> Result<bool, OrderLedgerError> {
        // Terminal attempts are never mutated: the WHERE clause only matches
        // the INITIATED row, so a second finalization is a no-op that
        // reports `false`.
        let updated = sqlx::query(
            "UPDATE payment_attempts SET status = $1, order_id = $2 \
             WHERE external_ref = $3 AND status = 'INITIATED'",
        )
        .bind(status.as_str())
        .bind(order_id)
        .bind(external_ref)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        if updated.rows_affected() == 0 {
            let exists = sqlx::query_scalar::<_, Uuid>(
                "SELECT id FROM payment_attempts WHERE external_ref = $1",
            )
            .bind(external_ref)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
            if exists.is_none() {
                return Err(OrderLedgerError::Storage(format!(
                    "no payment attempt for {external_ref}"
                )));
            }
            return Ok(false);
        }
        Ok(true)
    }

    async fn payment_attempt(
        &self,
        external_ref: Uuid,
    ) -> Result<Option<PaymentAttempt>, OrderLedgerError> {
        let row = sqlx::query_as::<_, AttemptRow>(
            "SELECT id, external_ref, order_id, amount, currency, status, provider, \
             payer_number, created_at FROM payment_attempts WHERE external_ref = $1",
        )
        .bind(external_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        row.map(attempt_from).transpose()
    }

    async fn find_by_external_ref(
        &self,
        external_ref: Uuid,
    ) -> Result<Option<Order>, OrderLedgerError> {
        let mut conn = self.pool.acquire().await.map_err(storage)?;
        let id = sqlx::query_scalar::<_, Uuid>("SELECT id FROM orders WHERE external_ref = $1")
            .bind(external_ref)
            .fetch_optional(&mut *conn)
            .await
            .map_err(storage)?;
        match id {
            Some(id) => fetch_order(&mut *conn, id).await,
            None => Ok(None),
        }
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, OrderLedgerError> {
        let mut conn = self.pool.acquire().await.map_err(storage)?;
        fetch_order(&mut *conn, order_id).await
    }

    async fn list_orders(&self, purchaser: &Purchaser) -> Result<Vec<Order>, OrderLedgerError> {
        let mut conn = self.pool.acquire().await.map_err(storage)?;
        let rows = match purchaser {
            Purchaser::User { id } => {
                sqlx::query_as::<_, OrderRow>(&format!(
                    "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 \
                     ORDER BY created_at DESC"
                ))
                .bind(id)
                .fetch_all(&mut *conn)
                .await
            }
            Purchaser::Guest { email } => {
                sqlx::query_as::<_, OrderRow>(&format!(
                    "SELECT {ORDER_COLUMNS} FROM orders \
                     WHERE user_id IS NULL AND guest_email = $1 ORDER BY created_at DESC"
                ))
                .bind(email)
                .fetch_all(&mut *conn)
                .await
            }
        }
        .map_err(storage)?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let lines = load_lines(&mut *conn, row.id).await?;
            orders.push(order_from(row, lines)?);
        }
        Ok(orders)
    }

    async fn set_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<(), OrderLedgerError> {
        let updated =
            sqlx::query("UPDATE orders SET status = $1, updated_at = now() WHERE id = $2")
                .bind(status.as_str())
                .bind(order_id)
                .execute(&self.pool)
                .await
                .map_err(storage)?;
        if updated.rows_affected() == 0 {
            return Err(OrderLedgerError::NotFound(order_id));
        }
        Ok(())
    }
}
