use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use soko_catalog::VariantSelector;
use soko_core::CheckoutError;
use uuid::Uuid;

/// One cart line, keyed by (product, selector). `unit_price` is snapshotted
/// when the line is added; `update` re-validates quantity against *current*
/// stock, not the stock seen at add time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub selector: VariantSelector,
    pub quantity: i64,
    pub unit_price: i64,
}

impl CartLine {
    /// Stable line key used by update/remove calls.
    pub fn key(&self) -> String {
        if self.selector.is_none() {
            self.product_id.to_string()
        } else {
            format!("{}::{}", self.product_id, self.selector)
        }
    }

    pub fn line_total(&self) -> i64 {
        self.unit_price * self.quantity
    }
}

/// Result of an add or update, reporting whether the requested quantity was
/// clamped to the available stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantityOutcome {
    pub quantity: i64,
    pub clamped: bool,
}

/// Session cart. Purely ephemeral: no inventory side effects until checkout
/// commits the lines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines in insertion order.
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn subtotal(&self) -> i64 {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    pub fn find(&self, key: &str) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.key() == key)
    }

    /// Add a line, merging with an existing (product, selector) line.
    /// Rejected outright when the resolved stock is not positive; otherwise
    /// the stored quantity is `min(requested, available)`.
    pub fn add(&mut self, line: CartLine, available: i64) -> Result<QuantityOutcome, CheckoutError> {
        if available <= 0 {
            return Err(CheckoutError::OutOfStock {
                product: line.product_name,
                available,
            });
        }

        let key = line.key();
        if let Some(existing) = self.lines.iter_mut().find(|l| l.key() == key) {
            let wanted = existing.quantity + line.quantity;
            if available <= existing.quantity {
                return Err(CheckoutError::OutOfStock {
                    product: existing.product_name.clone(),
                    available,
                });
            }
            let quantity = wanted.min(available);
            let clamped = quantity < wanted;
            existing.quantity = quantity;
            return Ok(QuantityOutcome { quantity, clamped });
        }

        let quantity = line.quantity.min(available);
        let clamped = quantity < line.quantity;
        self.lines.push(CartLine { quantity, ..line });
        Ok(QuantityOutcome { quantity, clamped })
    }

    /// Set a line's quantity, clamped to `max(1, min(requested, available))`.
    pub fn update(
        &mut self,
        key: &str,
        requested: i64,
        available: i64,
    ) -> Result<QuantityOutcome, CheckoutError> {
        let line = self
            .lines
            .iter_mut()
            .find(|l| l.key() == key)
            .ok_or_else(|| CheckoutError::Validation(vec![format!("cart line not found: {key}")]))?;
        let quantity = requested.min(available).max(1);
        let clamped = quantity < requested;
        line.quantity = quantity;
        Ok(QuantityOutcome { quantity, clamped })
    }

    pub fn remove(&mut self, key: &str) -> Result<(), CheckoutError> {
        let before = self.lines.len();
        self.lines.retain(|l| l.key() != key);
        if self.lines.len() == before {
            return Err(CheckoutError::Validation(vec![format!(
                "cart line not found: {key}"
            )]));
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

/// Session-keyed cart persistence. The Redis-backed implementation in the
/// store crate gives carts an hours-scale TTL.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn load(&self, session: &str) -> Result<Cart, CheckoutError>;
    async fn save(&self, session: &str, cart: &Cart) -> Result<(), CheckoutError>;
    async fn clear(&self, session: &str) -> Result<(), CheckoutError>;
}

/// In-memory cart store for tests and single-process runs.
#[derive(Default)]
pub struct MemoryCartStore {
    carts: Mutex<HashMap<String, Cart>>,
}

impl MemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CartStore for MemoryCartStore {
    async fn load(&self, session: &str) -> Result<Cart, CheckoutError> {
        let carts = self.carts.lock().expect("cart lock");
        Ok(carts.get(session).cloned().unwrap_or_default())
    }

    async fn save(&self, session: &str, cart: &Cart) -> Result<(), CheckoutError> {
        let mut carts = self.carts.lock().expect("cart lock");
        carts.insert(session.to_string(), cart.clone());
        Ok(())
    }

    async fn clear(&self, session: &str) -> Result<(), CheckoutError> {
        let mut carts = self.carts.lock().expect("cart lock");
        carts.remove(session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(name: &str, qty: i64, price: i64) -> CartLine {
        CartLine {
            product_id: Uuid::new_v4(),
            product_name: name.into(),
            selector: VariantSelector::None,
            quantity: qty,
            unit_price: price,
        }
    }

    #[test]
    fn add_clamps_to_available_stock() {
        let mut cart = Cart::new();
        let outcome = cart.add(line("Runner", 5, 1000), 2).unwrap();
        assert_eq!(outcome, QuantityOutcome { quantity: 2, clamped: true });
        assert_eq!(cart.subtotal(), 2000);
    }

    #[test]
    fn add_rejects_zero_stock() {
        let mut cart = Cart::new();
        let err = cart.add(line("Runner", 1, 1000), 0).unwrap_err();
        assert!(matches!(err, CheckoutError::OutOfStock { available: 0, .. }));
        assert!(cart.is_empty());
    }

    #[test]
    fn add_merges_same_product_and_selector() {
        let mut cart = Cart::new();
        let l = line("Runner", 1, 1000);
        cart.add(l.clone(), 10).unwrap();
        let outcome = cart.add(l, 10).unwrap();
        assert_eq!(outcome.quantity, 2);
        assert_eq!(cart.lines().len(), 1);
    }

    #[test]
    fn merge_cannot_exceed_current_stock() {
        let mut cart = Cart::new();
        let l = line("Runner", 3, 1000);
        cart.add(l.clone(), 3).unwrap();
        let err = cart.add(l, 3).unwrap_err();
        assert!(matches!(err, CheckoutError::OutOfStock { .. }));
        assert_eq!(cart.lines()[0].quantity, 3);
    }

    #[test]
    fn update_revalidates_against_current_stock() {
        let mut cart = Cart::new();
        let l = line("Runner", 2, 1000);
        let key = l.key();
        cart.add(l, 10).unwrap();
        // Stock dropped to 4 since the line was added.
        let outcome = cart.update(&key, 9, 4).unwrap();
        assert_eq!(outcome, QuantityOutcome { quantity: 4, clamped: true });
        // Quantity floor is 1.
        let outcome = cart.update(&key, 0, 4).unwrap();
        assert_eq!(outcome.quantity, 1);
    }

    #[test]
    fn remove_unknown_key_is_an_error() {
        let mut cart = Cart::new();
        assert!(cart.remove("missing").is_err());
    }

    #[test]
    fn distinct_selectors_make_distinct_lines() {
        let mut cart = Cart::new();
        let product_id = Uuid::new_v4();
        let mut red = line("Runner", 1, 1000);
        red.product_id = product_id;
        red.selector = VariantSelector::parse("color:Red");
        let mut blue = red.clone();
        blue.selector = VariantSelector::parse("color:Blue");
        cart.add(red, 5).unwrap();
        cart.add(blue, 5).unwrap();
        assert_eq!(cart.lines().len(), 2);
    }
}
