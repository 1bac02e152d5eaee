use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outbound notifications emitted by the purchase workflow. Dispatch (mail,
/// messaging) happens outside this system; the orchestrator only hands the
/// event off without blocking the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    OrderConfirmed {
        order_id: Uuid,
        recipient: Option<String>,
        full_name: String,
        total_amount: i64,
    },
    OrderStatusChanged {
        order_id: Uuid,
        recipient: Option<String>,
        status: String,
    },
    PaymentFailed {
        external_ref: Uuid,
        status: String,
        reason: Option<String>,
    },
    /// Operator alert: payment confirmed with no matching draft or order.
    /// Must never be dropped silently.
    ReconciliationAlert {
        external_ref: Uuid,
        amount: i64,
        currency: String,
    },
}

/// Non-blocking hand-off to the outbound notification queue. Implementations
/// guarantee at-least-once delivery to the drain worker, decoupled from
/// request latency.
pub trait Notifier: Send + Sync {
    fn enqueue(&self, notification: Notification);
}

/// Drops every notification; test stand-in.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn enqueue(&self, _notification: Notification) {}
}
