use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use soko_catalog::VariantSelector;
use soko_order::{Cart, CartLine};

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/cart/{session}", get(view_cart))
        .route("/v1/cart/{session}", delete(clear_cart))
        .route("/v1/cart/{session}/items", post(add_item).patch(update_item))
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    /// Variant descriptor, e.g. "color:Red, size:41". Absent or unparseable
    /// keys fall back to product-tier stock.
    #[serde(default)]
    pub descriptor: Option<String>,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub key: String,
    pub quantity: Option<i64>,
    #[serde(default)]
    pub remove: bool,
}

#[derive(Debug, Serialize)]
pub struct CartLineView {
    pub key: String,
    pub product_id: Uuid,
    pub product_name: String,
    pub descriptor: String,
    pub quantity: i64,
    pub unit_price: i64,
    pub line_total: i64,
}

#[derive(Debug, Serialize)]
pub struct CartView {
    pub lines: Vec<CartLineView>,
    pub subtotal: i64,
    /// Set when the last mutation stored less than was asked for.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub clamped: bool,
}

fn view(cart: &Cart, clamped: bool) -> CartView {
    CartView {
        lines: cart
            .lines()
            .iter()
            .map(|line| CartLineView {
                key: line.key(),
                product_id: line.product_id,
                product_name: line.product_name.clone(),
                descriptor: line.selector.to_string(),
                quantity: line.quantity,
                unit_price: line.unit_price,
                line_total: line.line_total(),
            })
            .collect(),
        subtotal: cart.subtotal(),
        clamped,
    }
}

async fn view_cart(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<Json<CartView>, AppError> {
    let cart = state.carts.load(&session).await?;
    Ok(Json(view(&cart, false)))
}

async fn add_item(
    State(state): State<AppState>,
    Path(session): Path<String>,
    Json(req): Json<AddItemRequest>,
) -> Result<Json<CartView>, AppError> {
    if req.quantity < 1 {
        return Err(AppError::Validation(vec![
            "quantity must be at least 1".into(),
        ]));
    }
    let selector = VariantSelector::parse(req.descriptor.as_deref().unwrap_or(""));
    let product = state
        .inventory
        .product(req.product_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("product not found: {}", req.product_id)))?;
    let available = state.inventory.available(req.product_id, &selector).await?;

    let mut cart = state.carts.load(&session).await?;
    let outcome = cart.add(
        CartLine {
            product_id: product.id,
            product_name: product.name.clone(),
            selector,
            quantity: req.quantity,
            unit_price: product.discounted_price(),
        },
        available,
    )?;
    state.carts.save(&session, &cart).await?;
    Ok(Json(view(&cart, outcome.clamped)))
}

async fn update_item(
    State(state): State<AppState>,
    Path(session): Path<String>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<Json<CartView>, AppError> {
    let mut cart = state.carts.load(&session).await?;

    if req.remove {
        cart.remove(&req.key)?;
        state.carts.save(&session, &cart).await?;
        return Ok(Json(view(&cart, false)));
    }

    let quantity = req.quantity.ok_or_else(|| {
        AppError::Validation(vec!["quantity is required unless removing".into()])
    })?;
    let line = cart
        .find(&req.key)
        .ok_or_else(|| AppError::NotFound(format!("cart line not found: {}", req.key)))?;
    // Quantity is re-validated against the stock as it is now, not as it
    // was when the line was added.
    let available = state
        .inventory
        .available(line.product_id, &line.selector)
        .await?;
    let outcome = cart.update(&req.key, quantity, available)?;
    state.carts.save(&session, &cart).await?;
    Ok(Json(view(&cart, outcome.clamped)))
}

async fn clear_cart(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<Json<CartView>, AppError> {
    state.carts.clear(&session).await?;
    Ok(Json(view(&Cart::new(), false)))
}
