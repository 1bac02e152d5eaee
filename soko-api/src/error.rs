use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use soko_catalog::LedgerError;
use soko_core::CheckoutError;
use soko_order::OrderLedgerError;

#[derive(Debug)]
pub enum AppError {
    Validation(Vec<String>),
    NotFound(String),
    Forbidden(String),
    Conflict(String),
    /// Provider declined the collection; the message is shopper-facing.
    PaymentRequired(String),
    ServiceUnavailable(String),
    /// 500 with a shopper-facing message (payment received, order missing).
    Support(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Validation(problems) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "validation failed", "details": problems }),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, json!({ "error": msg })),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::PaymentRequired(msg) => {
                (StatusCode::PAYMENT_REQUIRED, json!({ "error": msg }))
            }
            AppError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": msg }))
            }
            AppError::Support(msg) => {
                tracing::error!("support-path failure: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg }))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal Server Error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<CheckoutError> for AppError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::Validation(problems) => AppError::Validation(problems),
            CheckoutError::OutOfStock { .. } => AppError::Conflict(err.to_string()),
            CheckoutError::GatewayUnavailable(_) => AppError::ServiceUnavailable(
                "Payment service is unavailable. Please try again shortly.".into(),
            ),
            CheckoutError::GatewayRejected { user_message, .. } => {
                AppError::PaymentRequired(user_message)
            }
            CheckoutError::Reconciliation { external_ref, .. } => AppError::Support(format!(
                "Your payment was received but the order could not be completed. \
                 Contact support with reference {external_ref}."
            )),
            CheckoutError::Persistence(msg) => AppError::Internal(msg),
        }
    }
}

impl From<OrderLedgerError> for AppError {
    fn from(err: OrderLedgerError) -> Self {
        match err {
            OrderLedgerError::NotFound(id) => AppError::NotFound(format!("order not found: {id}")),
            OrderLedgerError::NotOwner => {
                AppError::Forbidden("You are not allowed to modify this order.".into())
            }
            OrderLedgerError::InvalidTransition(status) => AppError::Conflict(format!(
                "order cannot be cancelled from status '{}'",
                status.as_str()
            )),
            OrderLedgerError::DuplicateRef { order_id, .. } => {
                AppError::Conflict(format!("an order already exists: {order_id}"))
            }
            OrderLedgerError::Inventory(e) => AppError::Internal(e.to_string()),
            OrderLedgerError::Storage(msg) => AppError::Internal(msg),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UnknownProduct(id) => {
                AppError::NotFound(format!("product not found: {id}"))
            }
            LedgerError::Storage(msg) => AppError::Internal(msg),
        }
    }
}
