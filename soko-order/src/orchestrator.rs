use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use soko_catalog::InventoryLedger;
use soko_core::notify::{Notification, Notifier};
use soko_core::payment::{CollectionGateway, CollectionRequest, GatewayDecision, PollStatus};
use soko_core::{CheckoutError, CoreResult};

use crate::cart::CartStore;
use crate::draft::DraftStore;
use crate::ledger::{OrderLedger, OrderLedgerError};
use crate::models::{OrderDraft, OrderStatus, PaymentAttempt, PaymentAttemptStatus, Purchaser};

/// Business knobs for the checkout flow. Wired from configuration in the
/// binary; defaults mirror the storefront's launch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRules {
    /// Flat delivery fee, whole currency units.
    pub delivery_fee: i64,
    /// Tax applied to the cart subtotal only, never to the delivery fee.
    pub tax_rate: f64,
    pub draft_ttl_seconds: u64,
    /// When false, checkout pre-checks availability and refuses lines the
    /// counters cannot cover. When true (the default), races may drive
    /// counters negative and the deduction proceeds regardless.
    pub allow_negative_stock: bool,
}

impl Default for CheckoutRules {
    fn default() -> Self {
        Self {
            delivery_fee: 1500,
            tax_rate: 0.18,
            draft_ttl_seconds: 3600,
            allow_negative_stock: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cod,
    Momo,
}

/// Checkout submission as received from the HTTP layer, pre-normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: Option<Uuid>,
    pub guest_email: Option<String>,
    pub full_name: String,
    pub address_line: String,
    pub city: String,
    pub delivery_phone: String,
    pub payment_method: PaymentMethod,
    pub momo_number: Option<String>,
    pub provider: Option<String>,
    #[serde(default)]
    pub notes: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Priced checkout breakdown. Tax is charged on the subtotal; the delivery
/// fee is added untaxed.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: i64,
    pub delivery_fee: i64,
    pub tax_amount: i64,
    pub total: i64,
}

impl Totals {
    pub fn compute(subtotal: i64, rules: &CheckoutRules) -> Self {
        let tax_amount = (subtotal as f64 * rules.tax_rate).round() as i64;
        Self {
            subtotal,
            delivery_fee: rules.delivery_fee,
            tax_amount,
            total: subtotal + rules.delivery_fee + tax_amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutOutcome {
    /// An order exists in the ledger.
    Confirmed { order_id: Uuid },
    /// A collection request was accepted; the shopper must approve on their
    /// handset and the client should poll with `external_ref`.
    PaymentPending { external_ref: Uuid, message: String },
    /// The collection reached a terminal non-success status. The cart is
    /// intact and the shopper may retry.
    PaymentFailed {
        status: PollStatus,
        reason: Option<String>,
    },
}

/// Drives a cart through validation, pricing, payment and order creation.
/// Every collaborator sits behind a trait so the whole flow runs unchanged
/// against the in-memory stores in tests.
pub struct CheckoutOrchestrator {
    gateway: Arc<dyn CollectionGateway>,
    orders: Arc<dyn OrderLedger>,
    drafts: Arc<dyn DraftStore>,
    carts: Arc<dyn CartStore>,
    inventory: Arc<dyn InventoryLedger>,
    notifier: Arc<dyn Notifier>,
    rules: CheckoutRules,
}

impl CheckoutOrchestrator {
    pub fn new(
        gateway: Arc<dyn CollectionGateway>,
        orders: Arc<dyn OrderLedger>,
        drafts: Arc<dyn DraftStore>,
        carts: Arc<dyn CartStore>,
        inventory: Arc<dyn InventoryLedger>,
        notifier: Arc<dyn Notifier>,
        rules: CheckoutRules,
    ) -> Self {
        Self {
            gateway,
            orders,
            drafts,
            carts,
            inventory,
            notifier,
            rules,
        }
    }

    pub fn rules(&self) -> &CheckoutRules {
        &self.rules
    }

    /// Validate, price and either commit (cash on delivery) or initiate a
    /// mobile-money collection for the session's cart.
    pub async fn checkout(
        &self,
        session: &str,
        request: &CheckoutRequest,
    ) -> CoreResult<CheckoutOutcome> {
        let errors = validate(request);
        if !errors.is_empty() {
            return Err(CheckoutError::Validation(errors));
        }

        let cart = self.carts.load(session).await?;
        if cart.is_empty() {
            return Err(CheckoutError::Validation(vec!["cart is empty".into()]));
        }
        let subtotal = cart.subtotal();
        if subtotal <= 0 {
            return Err(CheckoutError::Validation(vec![
                "cart total must be positive".into(),
            ]));
        }

        if !self.rules.allow_negative_stock {
            for line in cart.lines() {
                let available = self
                    .inventory
                    .available(line.product_id, &line.selector)
                    .await
                    .map_err(|e| CheckoutError::Persistence(e.to_string()))?;
                if available < line.quantity {
                    return Err(CheckoutError::OutOfStock {
                        product: line.product_name.clone(),
                        available,
                    });
                }
            }
        }

        let totals = Totals::compute(subtotal, &self.rules);
        let purchaser = match (request.user_id, &request.guest_email) {
            (Some(id), _) => Purchaser::User { id },
            // validate() guarantees the guest email is present here.
            (None, Some(email)) => Purchaser::Guest {
                email: email.clone(),
            },
            (None, None) => {
                return Err(CheckoutError::Validation(vec![
                    "guest email is required".into(),
                ]))
            }
        };
        let currency = self.gateway.environment().currency().to_string();

        let mut draft = OrderDraft {
            external_ref: None,
            session: session.to_string(),
            purchaser,
            full_name: request.full_name.trim().to_string(),
            address_line: request.address_line.trim().to_string(),
            city: request.city.trim().to_string(),
            delivery_phone: normalize_delivery_phone(&request.delivery_phone),
            provider: request.provider.clone(),
            momo_number: request.momo_number.clone(),
            notes: request.notes.trim().to_string(),
            latitude: request.latitude,
            longitude: request.longitude,
            subtotal: totals.subtotal,
            total_amount: totals.total,
            currency,
            lines: cart.lines().to_vec(),
            created_at: chrono::Utc::now(),
        };

        match request.payment_method {
            PaymentMethod::Cod => self.commit_cod(session, draft).await,
            PaymentMethod::Momo => {
                let external_ref = Uuid::new_v4();
                draft.external_ref = Some(external_ref);
                self.initiate_momo(draft, external_ref).await
            }
        }
    }

    async fn commit_cod(&self, session: &str, draft: OrderDraft) -> CoreResult<CheckoutOutcome> {
        let order = self
            .orders
            .create_order(&draft, OrderStatus::Pending)
            .await
            .map_err(ledger_to_checkout)?;
        tracing::info!(order_id = %order.id, total = order.total_amount, "cash-on-delivery order created");
        self.notifier.enqueue(Notification::OrderConfirmed {
            order_id: order.id,
            recipient: order.purchaser.email().map(str::to_string),
            full_name: order.full_name.clone(),
            total_amount: order.total_amount,
        });
        self.carts.clear(session).await?;
        Ok(CheckoutOutcome::Confirmed { order_id: order.id })
    }

    async fn initiate_momo(
        &self,
        draft: OrderDraft,
        external_ref: Uuid,
    ) -> CoreResult<CheckoutOutcome> {
        // The draft goes in before the gateway call so a crash between the
        // two leaves a resumable pending payment, not a paid-but-lost cart.
        let amount = draft.total_amount;
        let currency = draft.currency.clone();
        let payer = draft.momo_number.clone().unwrap_or_default();
        let provider = draft.provider.clone();
        self.drafts.put(draft).await?;

        let collection = CollectionRequest {
            amount,
            currency: currency.clone(),
            external_ref,
            payer_msisdn: payer.clone(),
            payer_message: "Payment for your order".into(),
        };
        match self.gateway.request_to_pay(&collection).await {
            Ok(GatewayDecision::Accepted { gateway_ref }) => {
                tracing::info!(%external_ref, %gateway_ref, amount, "collection request accepted");
                self.orders
                    .record_payment(PaymentAttempt::initiated(
                        external_ref,
                        amount,
                        currency,
                        provider,
                        Some(payer),
                    ))
                    .await
                    .map_err(ledger_to_checkout)?;
                Ok(CheckoutOutcome::PaymentPending {
                    external_ref,
                    message: "Payment request sent. Approve it on your phone, then wait \
                              while we confirm."
                        .into(),
                })
            }
            Ok(GatewayDecision::Rejected { code, user_message }) => {
                tracing::warn!(%external_ref, %code, "collection request rejected");
                self.drafts.discard(external_ref).await?;
                Err(CheckoutError::GatewayRejected { code, user_message })
            }
            Err(err) => {
                tracing::error!(%external_ref, error = %err, "collection request failed");
                self.drafts.discard(external_ref).await?;
                Err(CheckoutError::GatewayUnavailable(err.to_string()))
            }
        }
    }

    /// Check a pending collection and settle it. Safe to call any number of
    /// times for the same `external_ref`: at most one order is ever created.
    pub async fn poll(&self, external_ref: Uuid) -> CoreResult<CheckoutOutcome> {
        let status = self
            .gateway
            .poll_status(external_ref)
            .await
            .map_err(|e| CheckoutError::GatewayUnavailable(e.to_string()))?;

        match status {
            PollStatus::Pending => Ok(CheckoutOutcome::PaymentPending {
                external_ref,
                message: "Still waiting for approval.".into(),
            }),
            PollStatus::Successful => self.settle_success(external_ref).await,
            PollStatus::Failed | PollStatus::Rejected | PollStatus::Expired => {
                self.settle_failure(external_ref, status).await
            }
        }
    }

    async fn settle_success(&self, external_ref: Uuid) -> CoreResult<CheckoutOutcome> {
        // A prior poll may already have committed; report the same order.
        if let Some(order) = self
            .orders
            .find_by_external_ref(external_ref)
            .await
            .map_err(ledger_to_checkout)?
        {
            return Ok(CheckoutOutcome::Confirmed { order_id: order.id });
        }

        let Some(draft) = self.drafts.get(external_ref).await? else {
            // Money moved but the draft is gone (expired or lost). Flag for
            // manual reconciliation instead of silently dropping the payment.
            let (amount, currency) = match self
                .orders
                .payment_attempt(external_ref)
                .await
                .map_err(ledger_to_checkout)?
            {
                Some(attempt) => (attempt.amount, attempt.currency),
                None => (0, self.gateway.environment().currency().to_string()),
            };
            tracing::error!(%external_ref, amount, "successful payment without an order draft");
            self.notifier.enqueue(Notification::ReconciliationAlert {
                external_ref,
                amount,
                currency,
            });
            return Err(CheckoutError::Reconciliation {
                external_ref,
                amount,
            });
        };

        let order = match self.orders.create_order(&draft, OrderStatus::Paid).await {
            Ok(order) => order,
            Err(OrderLedgerError::DuplicateRef { order_id, .. }) => {
                // Lost the race with a concurrent poll. The winner owns the
                // cleanup below too, but repeating it is harmless.
                self.drafts.discard(external_ref).await?;
                return Ok(CheckoutOutcome::Confirmed { order_id });
            }
            Err(err) => {
                tracing::error!(%external_ref, error = %err, "order creation failed after successful payment");
                self.notifier.enqueue(Notification::ReconciliationAlert {
                    external_ref,
                    amount: draft.total_amount,
                    currency: draft.currency.clone(),
                });
                return Err(CheckoutError::Persistence(
                    "payment succeeded but the order could not be recorded; \
                     please contact support"
                        .into(),
                ));
            }
        };

        if let Err(err) = self
            .orders
            .finalize_payment(external_ref, PaymentAttemptStatus::Successful, Some(order.id))
            .await
        {
            tracing::warn!(%external_ref, error = %err, "could not finalize payment attempt");
        }
        tracing::info!(order_id = %order.id, %external_ref, "mobile-money order confirmed");
        self.notifier.enqueue(Notification::OrderConfirmed {
            order_id: order.id,
            recipient: order.purchaser.email().map(str::to_string),
            full_name: order.full_name.clone(),
            total_amount: order.total_amount,
        });
        self.carts.clear(&draft.session).await?;
        self.drafts.discard(external_ref).await?;
        Ok(CheckoutOutcome::Confirmed { order_id: order.id })
    }

    async fn settle_failure(
        &self,
        external_ref: Uuid,
        status: PollStatus,
    ) -> CoreResult<CheckoutOutcome> {
        // Only the poll that performs the terminal transition notifies;
        // repeated polls of a settled collection stay quiet.
        let transitioned = match self
            .orders
            .finalize_payment(external_ref, status.into(), None)
            .await
        {
            Ok(transitioned) => transitioned,
            Err(err) => {
                tracing::warn!(%external_ref, error = %err, "could not finalize payment attempt");
                false
            }
        };
        if transitioned {
            tracing::info!(%external_ref, status = ?status, "collection ended without payment");
            self.notifier.enqueue(Notification::PaymentFailed {
                external_ref,
                status: format!("{status:?}").to_ascii_uppercase(),
                reason: None,
            });
        }
        // The cart is untouched so the shopper can retry; only the draft
        // tied to this ref is dropped.
        self.drafts.discard(external_ref).await?;
        Ok(CheckoutOutcome::PaymentFailed {
            status,
            reason: None,
        })
    }
}

fn ledger_to_checkout(err: OrderLedgerError) -> CheckoutError {
    CheckoutError::Persistence(err.to_string())
}

/// Collect every validation problem instead of failing on the first one.
fn validate(request: &CheckoutRequest) -> Vec<String> {
    let mut errors = Vec::new();
    if request.full_name.trim().is_empty() {
        errors.push("full name is required".into());
    }
    if request.address_line.trim().is_empty() {
        errors.push("address is required".into());
    }
    if request.city.trim().is_empty() {
        errors.push("city is required".into());
    }
    if !phone_shape_ok(&request.delivery_phone) {
        errors.push("delivery phone must be 10 to 15 digits".into());
    }
    if request.payment_method == PaymentMethod::Momo {
        if request
            .momo_number
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .is_empty()
        {
            errors.push("mobile money number is required".into());
        }
        if request
            .provider
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .is_empty()
        {
            errors.push("mobile money provider is required".into());
        }
    }
    if request.user_id.is_none() {
        match request.guest_email.as_deref().map(str::trim) {
            None | Some("") => errors.push("guest email is required".into()),
            Some(email) if !email.contains('@') || !email.contains('.') => {
                errors.push("guest email looks invalid".into())
            }
            _ => {}
        }
    }
    errors
}

fn phone_shape_ok(raw: &str) -> bool {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
    (10..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

/// Canonicalize a Rwandan delivery phone to `+250…` international form.
/// Inputs that match no known shape pass through unchanged.
fn normalize_delivery_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('+') {
        return trimmed.to_string();
    }
    if trimmed.starts_with("07") || trimmed.starts_with("78") {
        return format!("+250{}", trimmed.trim_start_matches('0'));
    }
    if trimmed.starts_with("250") {
        return format!("+{trimmed}");
    }
    trimmed.to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use soko_catalog::{
        AttributeVariant, MemoryInventory, Product, Tier, VariantSelector, VisualKind,
        VisualVariant,
    };
    use soko_core::payment::{Environment, GatewayError};

    use crate::cart::{CartLine, MemoryCartStore};
    use crate::draft::MemoryDraftStore;
    use crate::ledger::MemoryOrderLedger;

    struct MockGateway {
        decisions: Mutex<VecDeque<Result<GatewayDecision, GatewayError>>>,
        polls: Mutex<VecDeque<PollStatus>>,
    }

    impl MockGateway {
        fn new() -> Self {
            Self {
                decisions: Mutex::new(VecDeque::new()),
                polls: Mutex::new(VecDeque::new()),
            }
        }

        fn script_decision(&self, decision: Result<GatewayDecision, GatewayError>) {
            self.decisions.lock().unwrap().push_back(decision);
        }

        fn script_polls(&self, statuses: &[PollStatus]) {
            self.polls.lock().unwrap().extend(statuses.iter().copied());
        }
    }

    #[async_trait::async_trait]
    impl CollectionGateway for MockGateway {
        async fn request_to_pay(
            &self,
            _request: &CollectionRequest,
        ) -> Result<GatewayDecision, GatewayError> {
            self.decisions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(GatewayDecision::Accepted {
                    gateway_ref: Uuid::new_v4(),
                }))
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

    #[derive(Default)]
    struct CaptureNotifier {
        events: Mutex<Vec<Notification>>,
    }

    impl Notifier for CaptureNotifier {
        fn enqueue(&self, notification: Notification) {
            self.events.lock().unwrap().push(notification);
        }
    }

    struct Harness {
        orchestrator: CheckoutOrchestrator,
        inventory: Arc<MemoryInventory>,
        carts: Arc<MemoryCartStore>,
        drafts: Arc<MemoryDraftStore>,
        orders: Arc<MemoryOrderLedger>,
        gateway: Arc<MockGateway>,
        notifier: Arc<CaptureNotifier>,
        product_id: Uuid,
    }

    fn harness() -> Harness {
        let inventory = Arc::new(MemoryInventory::new());
        let product = Product::new("Trail Runner", 12000, 10);
        let product_id = product.id;
        inventory.insert_product(product);
        let red = VisualVariant::new(product_id, VisualKind::Color, "Red", 5);
        let red_id = red.id;
        inventory.insert_visual(red);
        inventory.insert_attribute(AttributeVariant::new(
            product_id,
            Some(red_id),
            "size",
            "41",
            2,
        ));

        let carts = Arc::new(MemoryCartStore::new());
        let drafts = Arc::new(MemoryDraftStore::default());
        let orders = Arc::new(MemoryOrderLedger::new(inventory.clone()));
        let gateway = Arc::new(MockGateway::new());
        let notifier = Arc::new(CaptureNotifier::default());
        let orchestrator = CheckoutOrchestrator::new(
            gateway.clone(),
            orders.clone(),
            drafts.clone(),
            carts.clone(),
            inventory.clone(),
            notifier.clone(),
            CheckoutRules::default(),
        );
        Harness {
            orchestrator,
            inventory,
            carts,
            drafts,
            orders,
            gateway,
            notifier,
            product_id,
        }
    }

    async fn fill_cart(h: &Harness, selector: VariantSelector, requested: i64) {
        let available = h
            .inventory
            .available(h.product_id, &selector)
            .await
            .unwrap();
        let mut cart = h.carts.load("s1").await.unwrap();
        cart.add(
            CartLine {
                product_id: h.product_id,
                product_name: "Trail Runner".into(),
                selector,
                quantity: requested,
                unit_price: 12000,
            },
            available,
        )
        .unwrap();
        h.carts.save("s1", &cart).await.unwrap();
    }

    fn request(method: PaymentMethod) -> CheckoutRequest {
        CheckoutRequest {
            user_id: None,
            guest_email: Some("shopper@example.com".into()),
            full_name: "Ange U.".into(),
            address_line: "KG 11 Ave 42".into(),
            city: "Kigali".into(),
            delivery_phone: "0781234567".into(),
            payment_method: method,
            momo_number: Some("0781234567".into()),
            provider: Some("mtn".into()),
            notes: String::new(),
            latitude: None,
            longitude: None,
        }
    }

    #[tokio::test]
    async fn cod_checkout_clamps_quantity_and_deducts_attribute_tier() {
        let h = harness();
        // Only 2 in the size-41 counter; a request for 3 is clamped at add.
        let selector = VariantSelector::parse("color:Red, size:41");
        fill_cart(&h, selector.clone(), 3).await;

        let outcome = h
            .orchestrator
            .checkout("s1", &request(PaymentMethod::Cod))
            .await
            .unwrap();
        let CheckoutOutcome::Confirmed { order_id } = outcome else {
            panic!("expected confirmed outcome");
        };

        let order = h.orders.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.lines.len(), 1);
        assert_eq!(order.lines[0].quantity, 2);
        assert_eq!(order.lines[0].tier, Tier::Attribute);
        assert_eq!(order.subtotal, 24000);
        assert_eq!(order.total_amount, 24000 + 1500 + 4320);

        // Attribute counter drained, coarser tiers untouched.
        assert_eq!(h.inventory.available(h.product_id, &selector).await.unwrap(), 0);
        assert_eq!(
            h.inventory
                .available(h.product_id, &VariantSelector::parse("color:Red"))
                .await
                .unwrap(),
            5
        );
        assert_eq!(
            h.inventory
                .available(h.product_id, &VariantSelector::None)
                .await
                .unwrap(),
            10
        );
        assert!(h.carts.load("s1").await.unwrap().is_empty());
        assert!(matches!(
            h.notifier.events.lock().unwrap().as_slice(),
            [Notification::OrderConfirmed { .. }]
        ));
    }

    #[tokio::test]
    async fn momo_success_creates_one_order_across_repeated_polls() {
        let h = harness();
        fill_cart(&h, VariantSelector::parse("color:Red"), 1).await;

        let outcome = h
            .orchestrator
            .checkout("s1", &request(PaymentMethod::Momo))
            .await
            .unwrap();
        let CheckoutOutcome::PaymentPending { external_ref, .. } = outcome else {
            panic!("expected pending outcome");
        };
        // No order yet, only the draft and the initiated attempt.
        assert_eq!(h.orders.order_count(), 0);
        assert!(h.drafts.get(external_ref).await.unwrap().is_some());

        h.gateway.script_polls(&[
            PollStatus::Pending,
            PollStatus::Pending,
            PollStatus::Successful,
            PollStatus::Successful,
        ]);

        for _ in 0..2 {
            let pending = h.orchestrator.poll(external_ref).await.unwrap();
            assert!(matches!(pending, CheckoutOutcome::PaymentPending { .. }));
        }

        let CheckoutOutcome::Confirmed { order_id } =
            h.orchestrator.poll(external_ref).await.unwrap()
        else {
            panic!("expected confirmed outcome");
        };
        // A duplicate poll lands on the same order.
        let CheckoutOutcome::Confirmed { order_id: again } =
            h.orchestrator.poll(external_ref).await.unwrap()
        else {
            panic!("expected confirmed outcome");
        };
        assert_eq!(order_id, again);
        assert_eq!(h.orders.order_count(), 1);

        let order = h.orders.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.external_ref, Some(external_ref));

        let attempt = h
            .orders
            .payment_attempt(external_ref)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.status, PaymentAttemptStatus::Successful);
        assert_eq!(attempt.order_id, Some(order_id));
        assert!(h.carts.load("s1").await.unwrap().is_empty());
        assert!(h.drafts.get(external_ref).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn momo_rejection_keeps_cart_and_creates_no_order() {
        let h = harness();
        fill_cart(&h, VariantSelector::None, 2).await;

        let CheckoutOutcome::PaymentPending { external_ref, .. } = h
            .orchestrator
            .checkout("s1", &request(PaymentMethod::Momo))
            .await
            .unwrap()
        else {
            panic!("expected pending outcome");
        };

        h.gateway.script_polls(&[PollStatus::Rejected]);
        let outcome = h.orchestrator.poll(external_ref).await.unwrap();
        assert!(matches!(
            outcome,
            CheckoutOutcome::PaymentFailed {
                status: PollStatus::Rejected,
                ..
            }
        ));

        assert_eq!(h.orders.order_count(), 0);
        let attempt = h
            .orders
            .payment_attempt(external_ref)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.status, PaymentAttemptStatus::Rejected);
        assert_eq!(attempt.order_id, None);
        // Stock never moved and the cart survives for a retry.
        assert_eq!(
            h.inventory
                .available(h.product_id, &VariantSelector::None)
                .await
                .unwrap(),
            10
        );
        assert!(!h.carts.load("s1").await.unwrap().is_empty());
        assert!(h.drafts.get(external_ref).await.unwrap().is_none());
        assert!(matches!(
            h.notifier.events.lock().unwrap().as_slice(),
            [Notification::PaymentFailed { .. }]
        ));
    }

    #[tokio::test]
    async fn repeated_polls_of_a_failed_collection_notify_once() {
        let h = harness();
        fill_cart(&h, VariantSelector::None, 1).await;

        let CheckoutOutcome::PaymentPending { external_ref, .. } = h
            .orchestrator
            .checkout("s1", &request(PaymentMethod::Momo))
            .await
            .unwrap()
        else {
            panic!("expected pending outcome");
        };

        h.gateway.script_polls(&[PollStatus::Expired, PollStatus::Expired]);
        for _ in 0..2 {
            let outcome = h.orchestrator.poll(external_ref).await.unwrap();
            assert!(matches!(outcome, CheckoutOutcome::PaymentFailed { .. }));
        }

        let failures = h
            .notifier
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, Notification::PaymentFailed { .. }))
            .count();
        assert_eq!(failures, 1);
        let attempt = h
            .orders
            .payment_attempt(external_ref)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.status, PaymentAttemptStatus::Expired);
    }

    #[tokio::test]
    async fn cancellation_restores_the_deducted_tier() {
        let h = harness();
        let selector = VariantSelector::parse("color:Red, size:41");
        fill_cart(&h, selector.clone(), 2).await;

        let CheckoutOutcome::Confirmed { order_id } = h
            .orchestrator
            .checkout("s1", &request(PaymentMethod::Cod))
            .await
            .unwrap()
        else {
            panic!("expected confirmed outcome");
        };
        assert_eq!(h.inventory.available(h.product_id, &selector).await.unwrap(), 0);

        let requester = Purchaser::Guest {
            email: "shopper@example.com".into(),
        };
        let cancelled = h.orders.cancel_order(order_id, &requester).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(h.inventory.available(h.product_id, &selector).await.unwrap(), 2);

        // Delivered orders cannot be cancelled.
        h.orders
            .set_status(order_id, OrderStatus::Delivered)
            .await
            .unwrap();
        let err = h
            .orders
            .cancel_order(order_id, &requester)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderLedgerError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn cancellation_requires_the_owner() {
        let h = harness();
        fill_cart(&h, VariantSelector::None, 1).await;
        let CheckoutOutcome::Confirmed { order_id } = h
            .orchestrator
            .checkout("s1", &request(PaymentMethod::Cod))
            .await
            .unwrap()
        else {
            panic!("expected confirmed outcome");
        };

        let stranger = Purchaser::Guest {
            email: "someone-else@example.com".into(),
        };
        let err = h.orders.cancel_order(order_id, &stranger).await.unwrap_err();
        assert!(matches!(err, OrderLedgerError::NotOwner));
    }

    #[tokio::test]
    async fn validation_problems_are_collected() {
        let h = harness();
        fill_cart(&h, VariantSelector::None, 1).await;

        let mut req = request(PaymentMethod::Momo);
        req.full_name = "  ".into();
        req.delivery_phone = "123".into();
        req.momo_number = None;
        req.guest_email = Some("not-an-email".into());

        let err = h.orchestrator.checkout("s1", &req).await.unwrap_err();
        let CheckoutError::Validation(problems) = err else {
            panic!("expected validation error");
        };
        assert_eq!(problems.len(), 4);
    }

    #[tokio::test]
    async fn empty_cart_is_rejected() {
        let h = harness();
        let err = h
            .orchestrator
            .checkout("s1", &request(PaymentMethod::Cod))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));
    }

    #[tokio::test]
    async fn totals_tax_the_subtotal_but_not_the_delivery_fee() {
        let totals = Totals::compute(24000, &CheckoutRules::default());
        assert_eq!(
            totals,
            Totals {
                subtotal: 24000,
                delivery_fee: 1500,
                tax_amount: 4320,
                total: 29820,
            }
        );
    }

    #[tokio::test]
    async fn successful_payment_without_a_draft_raises_reconciliation() {
        let h = harness();
        fill_cart(&h, VariantSelector::None, 1).await;

        let CheckoutOutcome::PaymentPending { external_ref, .. } = h
            .orchestrator
            .checkout("s1", &request(PaymentMethod::Momo))
            .await
            .unwrap()
        else {
            panic!("expected pending outcome");
        };
        // Draft evaporates (TTL or restart) before the payment settles.
        h.drafts.discard(external_ref).await.unwrap();

        h.gateway.script_polls(&[PollStatus::Successful]);
        let err = h.orchestrator.poll(external_ref).await.unwrap_err();
        let CheckoutError::Reconciliation { amount, .. } = err else {
            panic!("expected reconciliation error");
        };
        // Amount recovered from the initiated attempt row.
        assert_eq!(amount, 12000 + 1500 + 2160);
        assert!(matches!(
            h.notifier.events.lock().unwrap().as_slice(),
            [Notification::ReconciliationAlert { .. }]
        ));
        assert_eq!(h.orders.order_count(), 0);
    }

    #[tokio::test]
    async fn gateway_outage_at_initiation_discards_the_draft() {
        let h = harness();
        fill_cart(&h, VariantSelector::None, 1).await;
        h.gateway
            .script_decision(Err(GatewayError::Unavailable("connect timeout".into())));

        let err = h
            .orchestrator
            .checkout("s1", &request(PaymentMethod::Momo))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::GatewayUnavailable(_)));
        assert_eq!(h.orders.attempt_count(), 0);
        assert!(!h.carts.load("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn out_of_stock_precheck_when_negative_stock_disallowed() {
        let inventory = Arc::new(MemoryInventory::new());
        let product = Product::new("Trail Runner", 12000, 1);
        let product_id = product.id;
        inventory.insert_product(product);

        let carts = Arc::new(MemoryCartStore::new());
        let orders = Arc::new(MemoryOrderLedger::new(inventory.clone()));
        let orchestrator = CheckoutOrchestrator::new(
            Arc::new(MockGateway::new()),
            orders,
            Arc::new(MemoryDraftStore::default()),
            carts.clone(),
            inventory.clone(),
            Arc::new(CaptureNotifier::default()),
            CheckoutRules {
                allow_negative_stock: false,
                ..CheckoutRules::default()
            },
        );

        // The cart line was added when stock was 1; stock then drained.
        let mut cart = carts.load("s1").await.unwrap();
        cart.add(
            CartLine {
                product_id,
                product_name: "Trail Runner".into(),
                selector: VariantSelector::None,
                quantity: 1,
                unit_price: 12000,
            },
            1,
        )
        .unwrap();
        carts.save("s1", &cart).await.unwrap();
        inventory
            .deduct(product_id, 1, &VariantSelector::None)
            .await
            .unwrap();

        let err = orchestrator
            .checkout("s1", &request(PaymentMethod::Cod))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::OutOfStock { available: 0, .. }));
    }

    #[test]
    fn delivery_phone_normalization() {
        assert_eq!(normalize_delivery_phone("0781234567"), "+250781234567");
        assert_eq!(normalize_delivery_phone("781234567"), "+250781234567");
        assert_eq!(normalize_delivery_phone("250781234567"), "+250781234567");
        assert_eq!(normalize_delivery_phone("+250781234567"), "+250781234567");
        // Unknown shapes pass through untouched.
        assert_eq!(normalize_delivery_phone("0123"), "0123");
    }
}
