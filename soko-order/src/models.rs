use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use soko_catalog::{Tier, VariantSelector};

use crate::cart::CartLine;

/// Order lifecycle. Created as `Pending` (cash on delivery) or `Paid`
/// (confirmed mobile-money payment); progressed by status transitions only,
/// never hard-deleted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Cancelled,
    Delivered,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Delivered => "delivered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "paid" => Some(OrderStatus::Paid),
            "cancelled" => Some(OrderStatus::Cancelled),
            "delivered" => Some(OrderStatus::Delivered),
            _ => None,
        }
    }

    /// Cancellation is rejected once an order is cancelled or delivered.
    pub fn cancellable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Paid)
    }
}

/// Who placed the order: a registered account or a guest identified by
/// email. The account store itself is an external collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Purchaser {
    User { id: Uuid },
    Guest { email: String },
}

impl Purchaser {
    pub fn email(&self) -> Option<&str> {
        match self {
            Purchaser::User { .. } => None,
            Purchaser::Guest { email } => Some(email),
        }
    }
}

/// Durable purchase record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub purchaser: Purchaser,
    pub full_name: String,
    pub address_line: String,
    pub city: String,
    pub delivery_phone: String,
    pub provider: Option<String>,
    pub momo_number: Option<String>,
    pub notes: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub subtotal: i64,
    pub total_amount: i64,
    pub currency: String,
    pub status: OrderStatus,
    /// Payment idempotency key; absent for cash-on-delivery orders.
    pub external_ref: Option<Uuid>,
    pub lines: Vec<OrderLine>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One purchased line, immutable once the order is paid. `tier` records
/// where inventory was deducted so a cancellation restores the same counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub selector: VariantSelector,
    /// Canonical descriptor rendering for display and audit.
    pub descriptor: String,
    pub quantity: i64,
    pub unit_price: i64,
    pub subtotal: i64,
    pub tier: Tier,
}

/// Payment attempt lifecycle: created `Initiated` when the gateway accepts a
/// request-to-pay, finalized exactly once with a terminal status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentAttemptStatus {
    Initiated,
    Successful,
    Failed,
    Rejected,
    Expired,
}

impl PaymentAttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentAttemptStatus::Initiated => "INITIATED",
            PaymentAttemptStatus::Successful => "SUCCESSFUL",
            PaymentAttemptStatus::Failed => "FAILED",
            PaymentAttemptStatus::Rejected => "REJECTED",
            PaymentAttemptStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INITIATED" => Some(PaymentAttemptStatus::Initiated),
            "SUCCESSFUL" => Some(PaymentAttemptStatus::Successful),
            "FAILED" => Some(PaymentAttemptStatus::Failed),
            "REJECTED" => Some(PaymentAttemptStatus::Rejected),
            "EXPIRED" => Some(PaymentAttemptStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentAttemptStatus::Initiated)
    }
}

impl From<soko_core::payment::PollStatus> for PaymentAttemptStatus {
    fn from(status: soko_core::payment::PollStatus) -> Self {
        use soko_core::payment::PollStatus;
        match status {
            PollStatus::Pending => PaymentAttemptStatus::Initiated,
            PollStatus::Successful => PaymentAttemptStatus::Successful,
            PollStatus::Failed => PaymentAttemptStatus::Failed,
            PollStatus::Rejected => PaymentAttemptStatus::Rejected,
            PollStatus::Expired => PaymentAttemptStatus::Expired,
        }
    }
}

/// Append-only payment record. `external_ref` is globally unique and is the
/// sole idempotency key for order creation; `order_id` stays empty until a
/// success links the two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub id: Uuid,
    pub external_ref: Uuid,
    pub order_id: Option<Uuid>,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentAttemptStatus,
    pub provider: Option<String>,
    pub payer_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentAttempt {
    pub fn initiated(
        external_ref: Uuid,
        amount: i64,
        currency: impl Into<String>,
        provider: Option<String>,
        payer_number: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_ref,
            order_id: None,
            amount,
            currency: currency.into(),
            status: PaymentAttemptStatus::Initiated,
            provider,
            payer_number,
            created_at: Utc::now(),
        }
    }
}

/// Not-yet-committed order payload held while a mobile-money collection is
/// pending approval. Keyed by `external_ref`; discarded on any terminal
/// outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDraft {
    pub external_ref: Option<Uuid>,
    pub session: String,
    pub purchaser: Purchaser,
    pub full_name: String,
    pub address_line: String,
    pub city: String,
    pub delivery_phone: String,
    pub provider: Option<String>,
    pub momo_number: Option<String>,
    pub notes: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub subtotal: i64,
    pub total_amount: i64,
    pub currency: String,
    pub lines: Vec<CartLine>,
    pub created_at: DateTime<Utc>,
}
