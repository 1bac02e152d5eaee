use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use soko_catalog::{InventoryLedger, LedgerError};

use crate::models::{
    Order, OrderDraft, OrderLine, OrderStatus, PaymentAttempt, PaymentAttemptStatus, Purchaser,
};

#[derive(Debug, thiserror::Error)]
pub enum OrderLedgerError {
    #[error("order not found: {0}")]
    NotFound(Uuid),

    #[error("not authorized for this order")]
    NotOwner,

    #[error("order cannot be changed from status '{}'", .0.as_str())]
    InvalidTransition(OrderStatus),

    /// An order already references this payment external ref. Signals the
    /// idempotent no-op path, not a failure to report to the shopper.
    #[error("an order already exists for payment reference {external_ref}")]
    DuplicateRef { external_ref: Uuid, order_id: Uuid },

    #[error(transparent)]
    Inventory(#[from] LedgerError),

    #[error("order storage failure: {0}")]
    Storage(String),
}

/// Durable store of orders, lines and payment attempts.
///
/// `create_order` is all-or-nothing: order row, every line, and one
/// inventory deduction per line at the line's resolved tier, with line
/// insertion and deduction serialized per order. Calling it twice with the
/// same external ref yields exactly one order (`DuplicateRef` on the
/// second call).
#[async_trait]
pub trait OrderLedger: Send + Sync {
    async fn create_order(
        &self,
        draft: &OrderDraft,
        status: OrderStatus,
    ) -> Result<Order, OrderLedgerError>;

    /// Owner-restricted cancellation: restores every line's quantity at the
    /// tier recorded at deduction time, then sets `cancelled`. Rejected once
    /// the order is cancelled or delivered.
    async fn cancel_order(
        &self,
        order_id: Uuid,
        requester: &Purchaser,
    ) -> Result<Order, OrderLedgerError>;

    /// Append a payment attempt row.
    async fn record_payment(&self, attempt: PaymentAttempt) -> Result<(), OrderLedgerError>;

    /// Move an attempt to a terminal status, linking the order on success.
    /// Returns whether this call performed the transition; `false` means the
    /// attempt was already terminal and was left untouched.
    async fn finalize_payment(
        &self,
        external_ref: Uuid,
        status: PaymentAttemptStatus,
        order_id: Option<Uuid>,
    ) -> Result<bool, OrderLedgerError>;

    async fn payment_attempt(
        &self,
        external_ref: Uuid,
    ) -> Result<Option<PaymentAttempt>, OrderLedgerError>;

    async fn find_by_external_ref(
        &self,
        external_ref: Uuid,
    ) -> Result<Option<Order>, OrderLedgerError>;

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, OrderLedgerError>;

    async fn list_orders(&self, purchaser: &Purchaser) -> Result<Vec<Order>, OrderLedgerError>;

    async fn set_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<(), OrderLedgerError>;
}

/// In-memory order ledger for tests and single-process runs. The Postgres
/// implementation in the store crate carries the same contract inside one
/// transaction, with a unique constraint on the external ref as the
/// concurrency backstop.
pub struct MemoryOrderLedger {
    inventory: Arc<dyn InventoryLedger>,
    orders: Mutex<Vec<Order>>,
    attempts: Mutex<Vec<PaymentAttempt>>,
}

impl MemoryOrderLedger {
    pub fn new(inventory: Arc<dyn InventoryLedger>) -> Self {
        Self {
            inventory,
            orders: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().expect("order lock").len()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().expect("attempt lock").len()
    }
}

#[async_trait]
impl OrderLedger for MemoryOrderLedger {
    async fn create_order(
        &self,
        draft: &OrderDraft,
        status: OrderStatus,
    ) -> Result<Order, OrderLedgerError> {
        if let Some(external_ref) = draft.external_ref {
            if let Some(existing) = self.find_by_external_ref(external_ref).await? {
                return Err(OrderLedgerError::DuplicateRef {
                    external_ref,
                    order_id: existing.id,
                });
            }
        }

        let order_id = Uuid::new_v4();
        let mut lines = Vec::with_capacity(draft.lines.len());
        for (ix, line) in draft.lines.iter().enumerate() {
            let tier = match self
                .inventory
                .deduct(line.product_id, line.quantity, &line.selector)
                .await
            {
                Ok(tier) => tier,
                Err(err) => {
                    // Undo the deductions already applied for this order.
                    for done in &draft.lines[..ix] {
                        let _ = self
                            .inventory
                            .restore(done.product_id, done.quantity, &done.selector)
                            .await;
                    }
                    return Err(err.into());
                }
            };
            tracing::info!(
                %order_id,
                product = %line.product_name,
                quantity = line.quantity,
                tier = tier.as_str(),
                "stock deducted for order line"
            );
            lines.push(OrderLine {
                id: Uuid::new_v4(),
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

        let now = Utc::now();
        let order = Order {
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
        };

        let mut orders = self.orders.lock().expect("order lock");
        orders.push(order.clone());
        Ok(order)
    }

    async fn cancel_order(
        &self,
        order_id: Uuid,
        requester: &Purchaser,
    ) -> Result<Order, OrderLedgerError> {
        let order = {
            let orders = self.orders.lock().expect("order lock");
            orders
                .iter()
                .find(|o| o.id == order_id)
                .cloned()
                .ok_or(OrderLedgerError::NotFound(order_id))?
        };

        if order.purchaser != *requester {
            return Err(OrderLedgerError::NotOwner);
        }
        if !order.status.cancellable() {
            return Err(OrderLedgerError::InvalidTransition(order.status));
        }

        for line in &order.lines {
            let tier = self
                .inventory
                .restore(line.product_id, line.quantity, &line.selector)
                .await?;
            tracing::info!(
                %order_id,
                product = %line.product_name,
                quantity = line.quantity,
                tier = tier.as_str(),
                "stock restored on cancellation"
            );
        }

        let mut orders = self.orders.lock().expect("order lock");
        let stored = orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or(OrderLedgerError::NotFound(order_id))?;
        stored.status = OrderStatus::Cancelled;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn record_payment(&self, attempt: PaymentAttempt) -> Result<(), OrderLedgerError> {
        let mut attempts = self.attempts.lock().expect("attempt lock");
        if attempts.iter().any(|a| a.external_ref == attempt.external_ref) {
            return Err(OrderLedgerError::Storage(format!(
                "payment attempt {} already recorded",
                attempt.external_ref
            )));
        }
        attempts.push(attempt);
        Ok(())
    }

    async fn finalize_payment(
        &self,
        external_ref: Uuid,
        status: PaymentAttemptStatus,
        order_id: Option<Uuid>,
    ) -> Result<bool, OrderLedgerError> {
        let mut attempts = self.attempts.lock().expect("attempt lock");
        let Some(attempt) = attempts.iter_mut().find(|a| a.external_ref == external_ref) else {
            return Err(OrderLedgerError::Storage(format!(
                "no payment attempt for {external_ref}"
            )));
        };
        if attempt.status.is_terminal() {
            return Ok(false);
        }
        attempt.status = status;
        attempt.order_id = order_id;
        Ok(true)
    }

    async fn payment_attempt(
        &self,
        external_ref: Uuid,
    ) -> Result<Option<PaymentAttempt>, OrderLedgerError> {
        let attempts = self.attempts.lock().expect("attempt lock");
        Ok(attempts
            .iter()
            .find(|a| a.external_ref == external_ref)
            .cloned())
    }

    async fn find_by_external_ref(
        &self,
        external_ref: Uuid,
    ) -> Result<Option<Order>, OrderLedgerError> {
        let orders = self.orders.lock().expect("order lock");
        Ok(orders
            .iter()
            .find(|o| o.external_ref == Some(external_ref))
            .cloned())
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, OrderLedgerError> {
        let orders = self.orders.lock().expect("order lock");
        Ok(orders.iter().find(|o| o.id == order_id).cloned())
    }

    async fn list_orders(&self, purchaser: &Purchaser) -> Result<Vec<Order>, OrderLedgerError> {
        let orders = self.orders.lock().expect("order lock");
        Ok(orders
            .iter()
            .filter(|o| o.purchaser == *purchaser)
            .cloned()
            .collect())
    }

    async fn set_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<(), OrderLedgerError> {
        let mut orders = self.orders.lock().expect("order lock");
        let order = orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or(OrderLedgerError::NotFound(order_id))?;
        order.status = status;
        order.updated_at = Utc::now();
        Ok(())
    }
}
