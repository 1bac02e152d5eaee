use tokio::sync::mpsc;
use tracing::{error, info};

use soko_core::notify::{Notification, Notifier};

/// Sender half of the outbound notification queue. `enqueue` never blocks
/// the request path; the paired worker drains and dispatches.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for NotificationQueue {
    fn enqueue(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            error!("notification worker is gone; event dropped");
        }
    }
}

/// Drains the queue for the lifetime of the process. Dispatch is currently
/// structured logging; mail and SMS providers hang off this single point.
pub async fn notification_worker(mut rx: mpsc::UnboundedReceiver<Notification>) {
    while let Some(event) = rx.recv().await {
        match &event {
            Notification::OrderConfirmed {
                order_id,
                total_amount,
                ..
            } => {
                info!(%order_id, total_amount, "dispatching order confirmation");
            }
            Notification::OrderStatusChanged {
                order_id, status, ..
            } => {
                info!(%order_id, %status, "dispatching order status update");
            }
            Notification::PaymentFailed {
                external_ref,
                status,
                ..
            } => {
                info!(%external_ref, %status, "dispatching payment failure notice");
            }
            Notification::ReconciliationAlert {
                external_ref,
                amount,
                currency,
            } => {
                // Operator-facing: money moved without a matching order.
                error!(
                    %external_ref,
                    amount,
                    %currency,
                    "RECONCILIATION REQUIRED: confirmed payment has no order"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn enqueue_reaches_the_worker_side() {
        let (queue, mut rx) = NotificationQueue::new();
        queue.enqueue(Notification::PaymentFailed {
            external_ref: Uuid::new_v4(),
            status: "EXPIRED".into(),
            reason: None,
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Notification::PaymentFailed { .. }));
    }
}
