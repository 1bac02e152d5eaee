use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use soko_core::payment::PollStatus;
use soko_order::{CheckoutOutcome, CheckoutRequest};

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/checkout", post(checkout))
        .route("/v1/checkout/poll/{external_ref}", get(poll))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub session: String,
    #[serde(flatten)]
    pub request: CheckoutRequest,
}

/// Uniform checkout/poll envelope the storefront polls against.
#[derive(Debug, Serialize)]
pub struct CheckoutEnvelope {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<Uuid>,
    pub message: String,
}

fn envelope(outcome: CheckoutOutcome) -> CheckoutEnvelope {
    match outcome {
        CheckoutOutcome::Confirmed { order_id } => CheckoutEnvelope {
            status: "successful",
            order_id: Some(order_id),
            external_ref: None,
            message: "Order placed successfully.".into(),
        },
        CheckoutOutcome::PaymentPending {
            external_ref,
            message,
        } => CheckoutEnvelope {
            status: "pending",
            order_id: None,
            external_ref: Some(external_ref),
            message,
        },
        CheckoutOutcome::PaymentFailed { status, reason } => CheckoutEnvelope {
            status: "failed",
            order_id: None,
            external_ref: None,
            message: reason.unwrap_or_else(|| failure_message(status).into()),
        },
    }
}

fn failure_message(status: PollStatus) -> &'static str {
    match status {
        PollStatus::Rejected => "Payment was rejected. Your cart is unchanged.",
        PollStatus::Expired => "The payment request expired. Your cart is unchanged.",
        _ => "Payment failed. Your cart is unchanged.",
    }
}

async fn checkout(
    State(state): State<AppState>,
    Json(body): Json<CheckoutBody>,
) -> Result<Json<CheckoutEnvelope>, AppError> {
    let outcome = state
        .orchestrator
        .checkout(&body.session, &body.request)
        .await?;
    Ok(Json(envelope(outcome)))
}

async fn poll(
    State(state): State<AppState>,
    Path(external_ref): Path<Uuid>,
) -> Result<Json<CheckoutEnvelope>, AppError> {
    let outcome = state.orchestrator.poll(external_ref).await?;
    Ok(Json(envelope(outcome)))
}
