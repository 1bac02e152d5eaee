use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use soko_api::{app, AppState};
use soko_catalog::{AttributeVariant, MemoryInventory, Product, VisualKind, VisualVariant};
use soko_core::notify::NullNotifier;
use soko_core::payment::{
    CollectionGateway, CollectionRequest, Environment, GatewayDecision, GatewayError, PollStatus,
};
use soko_order::{
    CheckoutOrchestrator, CheckoutRules, MemoryCartStore, MemoryDraftStore, MemoryOrderLedger,
};
use soko_store::app_config::RateLimitConfig;

struct ScriptedGateway {
    polls: Mutex<VecDeque<PollStatus>>,
}

impl ScriptedGateway {
    fn new() -> Self {
        Self {
            polls: Mutex::new(VecDeque::new()),
        }
    }

    fn script_poll(&self, status: PollStatus) {
        self.polls.lock().unwrap().push_back(status);
    }
}

#[async_trait::async_trait]
impl CollectionGateway for ScriptedGateway {
    async fn request_to_pay(
        &self,
        request: &CollectionRequest,
    ) -> Result<GatewayDecision, GatewayError> {
        Ok(GatewayDecision::Accepted {
            gateway_ref: request.external_ref,
        })
    }

    async fn poll_status(&self, _external_ref: Uuid) -> Result<PollStatus, GatewayError> {
        Ok(self
            .polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PollStatus::Pending))
    }

    fn environment(&self) -> Environment {
        Environment::Sandbox
    }
}

struct Backend {
    app: Router,
    product_id: Uuid,
    gateway: Arc<ScriptedGateway>,
}

fn backend() -> Backend {
    let inventory = Arc::new(MemoryInventory::new());
    let product = Product::new("Trail Runner", 12000, 10);
    let product_id = product.id;
    inventory.insert_product(product);
    let red = VisualVariant::new(product_id, VisualKind::Color, "Red", 5);
    let red_id = red.id;
    inventory.insert_visual(red);
    inventory.insert_attribute(AttributeVariant::new(product_id, Some(red_id), "size", "41", 2));

    let carts = Arc::new(MemoryCartStore::new());
    let orders = Arc::new(MemoryOrderLedger::new(inventory.clone()));
    let gateway = Arc::new(ScriptedGateway::new());

    let orchestrator = Arc::new(CheckoutOrchestrator::new(
        gateway.clone(),
        orders.clone(),
        Arc::new(MemoryDraftStore::default()),
        carts.clone(),
        inventory.clone(),
        Arc::new(NullNotifier),
        CheckoutRules::default(),
    ));

    let state = AppState {
        orchestrator,
        orders,
        inventory,
        carts,
        redis: None,
        rate_limit: RateLimitConfig::default(),
    };

    Backend {
        app: app(state),
        product_id,
        gateway,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(json_body) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(json_body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn cod_checkout_body(session: &str) -> Value {
    json!({
        "session": session,
        "guest_email": "shopper@example.com",
        "full_name": "Ange U.",
        "address_line": "KG 11 Ave 42",
        "city": "Kigali",
        "delivery_phone": "0781234567",
        "payment_method": "cod",
    })
}

#[tokio::test]
async fn health_reports_ok() {
    let b = backend();
    let (status, body) = send(&b.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn cart_to_cod_order_to_cancellation() {
    let b = backend();

    // Requesting 3 of a size-41 variant with only 2 in stock clamps the line.
    let (status, body) = send(
        &b.app,
        "POST",
        "/v1/cart/s1/items",
        Some(json!({
            "product_id": b.product_id,
            "descriptor": "color:Red, size:41",
            "quantity": 3,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["clamped"], true);
    assert_eq!(body["lines"][0]["quantity"], 2);
    assert_eq!(body["subtotal"], 24000);

    let (status, body) = send(
        &b.app,
        "POST",
        "/v1/checkout",
        Some(cod_checkout_body("s1")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "successful");
    let order_id = body["order_id"].as_str().unwrap().to_string();

    let (status, body) = send(&b.app, "GET", &format!("/v1/orders/{order_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["total_amount"], 24000 + 1500 + 4320);

    // The cart was cleared by the successful checkout.
    let (status, body) = send(&b.app, "GET", "/v1/cart/s1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["lines"].as_array().unwrap().is_empty());

    // A stranger cannot cancel.
    let (status, _) = send(
        &b.app,
        "POST",
        &format!("/v1/orders/{order_id}/cancel"),
        Some(json!({ "guest_email": "someone-else@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &b.app,
        "POST",
        &format!("/v1/orders/{order_id}/cancel"),
        Some(json!({ "guest_email": "shopper@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    // Second cancel is rejected.
    let (status, _) = send(
        &b.app,
        "POST",
        &format!("/v1/orders/{order_id}/cancel"),
        Some(json!({ "guest_email": "shopper@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn momo_checkout_polls_to_confirmation() {
    let b = backend();

    let (status, _) = send(
        &b.app,
        "POST",
        "/v1/cart/s2/items",
        Some(json!({
            "product_id": b.product_id,
            "descriptor": "color:Red",
            "quantity": 1,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let mut body = cod_checkout_body("s2");
    body["payment_method"] = json!("momo");
    body["momo_number"] = json!("0781234567");
    body["provider"] = json!("mtn");
    let (status, body) = send(&b.app, "POST", "/v1/checkout", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    let external_ref = body["external_ref"].as_str().unwrap().to_string();

    // Gateway still pending on the first poll.
    let (status, body) = send(
        &b.app,
        "GET",
        &format!("/v1/checkout/poll/{external_ref}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");

    b.gateway.script_poll(PollStatus::Successful);
    let (status, body) = send(
        &b.app,
        "GET",
        &format!("/v1/checkout/poll/{external_ref}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "successful");
    let order_id = body["order_id"].as_str().unwrap().to_string();

    let (status, body) = send(&b.app, "GET", &format!("/v1/orders/{order_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "paid");
}

#[tokio::test]
async fn momo_rejection_keeps_the_cart() {
    let b = backend();

    send(
        &b.app,
        "POST",
        "/v1/cart/s3/items",
        Some(json!({ "product_id": b.product_id, "quantity": 1 })),
    )
    .await;

    let mut body = cod_checkout_body("s3");
    body["payment_method"] = json!("momo");
    body["momo_number"] = json!("0781234567");
    body["provider"] = json!("mtn");
    let (_, body) = send(&b.app, "POST", "/v1/checkout", Some(body)).await;
    let external_ref = body["external_ref"].as_str().unwrap().to_string();

    b.gateway.script_poll(PollStatus::Rejected);
    let (status, body) = send(
        &b.app,
        "GET",
        &format!("/v1/checkout/poll/{external_ref}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");

    let (_, body) = send(&b.app, "GET", "/v1/cart/s3", None).await;
    assert_eq!(body["lines"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn checkout_validation_problems_are_detailed() {
    let b = backend();
    send(
        &b.app,
        "POST",
        "/v1/cart/s4/items",
        Some(json!({ "product_id": b.product_id, "quantity": 1 })),
    )
    .await;

    let (status, body) = send(
        &b.app,
        "POST",
        "/v1/checkout",
        Some(json!({
            "session": "s4",
            "full_name": "",
            "address_line": "",
            "city": "Kigali",
            "delivery_phone": "abc",
            "payment_method": "cod",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["details"].as_array().unwrap().len() >= 3);
}

#[tokio::test]
async fn adding_an_unknown_product_is_a_404() {
    let b = backend();
    let (status, _) = send(
        &b.app,
        "POST",
        "/v1/cart/s5/items",
        Some(json!({ "product_id": Uuid::new_v4(), "quantity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn out_of_stock_add_is_a_409() {
    let b = backend();
    // Drain the size-41 counter first.
    send(
        &b.app,
        "POST",
        "/v1/cart/s6/items",
        Some(json!({
            "product_id": b.product_id,
            "descriptor": "color:Red, size:41",
            "quantity": 2,
        })),
    )
    .await;
    // Merging past current stock is refused.
    let (status, _) = send(
        &b.app,
        "POST",
        "/v1/cart/s6/items",
        Some(json!({
            "product_id": b.product_id,
            "descriptor": "color:Red, size:41",
            "quantity": 1,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}
