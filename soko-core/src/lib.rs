pub mod notify;
pub mod payment;

use uuid::Uuid;

/// Failure taxonomy for the purchase workflow. Variants map one-to-one onto
/// the user-visible outcomes: validation lists, out-of-stock notices,
/// retryable gateway outages, terminal gateway decisions, the fatal
/// payment-without-order case, and transactional write failures.
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("'{product}' is out of stock")]
    OutOfStock { product: String, available: i64 },

    /// Network-level failure talking to the gateway. Retryable; never an
    /// order, never conflated with a gateway-issued rejection.
    #[error("payment service unavailable: {0}")]
    GatewayUnavailable(String),

    /// Terminal decision issued by the provider. The cart is preserved so
    /// the shopper can retry with another method or number.
    #[error("payment rejected ({code}): {user_message}")]
    GatewayRejected { code: String, user_message: String },

    /// Payment confirmed but the order draft is gone. Must reach an operator
    /// channel with enough detail for manual recovery and is never presented
    /// as success.
    #[error("payment {external_ref} for {amount} succeeded but no order draft was found; manual reconciliation required")]
    Reconciliation { external_ref: Uuid, amount: i64 },

    #[error("storage failure: {0}")]
    Persistence(String),
}

pub type CoreResult<T> = Result<T, CheckoutError>;
