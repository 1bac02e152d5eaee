use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use soko_order::{Order, Purchaser};

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/orders", get(list_orders))
        .route("/v1/orders/{id}", get(get_order))
        .route("/v1/orders/{id}/cancel", post(cancel_order))
}

/// Caller identity. Account sessions pass `user_id`; guest lookups pass the
/// email used at checkout.
#[derive(Debug, Deserialize)]
pub struct Identity {
    pub user_id: Option<Uuid>,
    pub guest_email: Option<String>,
}

impl Identity {
    fn purchaser(self) -> Result<Purchaser, AppError> {
        match (self.user_id, self.guest_email) {
            (Some(id), _) => Ok(Purchaser::User { id }),
            (None, Some(email)) if !email.trim().is_empty() => Ok(Purchaser::Guest {
                email: email.trim().to_string(),
            }),
            _ => Err(AppError::Validation(vec![
                "user_id or guest_email is required".into(),
            ])),
        }
    }
}

async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .orders
        .get_order(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order not found: {id}")))?;
    Ok(Json(order))
}

async fn list_orders(
    State(state): State<AppState>,
    Query(identity): Query<Identity>,
) -> Result<Json<Vec<Order>>, AppError> {
    let purchaser = identity.purchaser()?;
    let orders = state.orders.list_orders(&purchaser).await?;
    Ok(Json(orders))
}

async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(identity): Json<Identity>,
) -> Result<Json<Order>, AppError> {
    let requester = identity.purchaser()?;
    let order = state.orders.cancel_order(id, &requester).await?;
    tracing::info!(order_id = %id, "order cancelled by purchaser");
    Ok(Json(order))
}
