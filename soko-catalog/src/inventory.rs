use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::product::{AttributeVariant, Product, VisualVariant};
use crate::selector::VariantSelector;

/// Inventory tier a deduction or restoration landed on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Product,
    Visual,
    Attribute,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Product => "product",
            Tier::Visual => "visual",
            Tier::Attribute => "attribute",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "product" => Some(Tier::Product),
            "visual" => Some(Tier::Visual),
            "attribute" => Some(Tier::Attribute),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("unknown product: {0}")]
    UnknownProduct(Uuid),

    #[error("inventory storage failure: {0}")]
    Storage(String),
}

/// Per-tier stock counters with hierarchy resolution.
///
/// Any lookup miss degrades to the next coarser tier instead of erroring:
/// availability over precision, reproduced from the system this replaces.
/// Counters may go negative under races; readers must treat a non-positive
/// value as sold out and never clamp it back.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Deduct `quantity` at the tier the selector resolves to and report
    /// which tier was affected.
    async fn deduct(
        &self,
        product_id: Uuid,
        quantity: i64,
        selector: &VariantSelector,
    ) -> Result<Tier, LedgerError>;

    /// Dual of `deduct`: restore `quantity` at the resolved tier.
    async fn restore(
        &self,
        product_id: Uuid,
        quantity: i64,
        selector: &VariantSelector,
    ) -> Result<Tier, LedgerError>;

    /// Raw stock counter at the resolved tier. May be negative.
    async fn available(
        &self,
        product_id: Uuid,
        selector: &VariantSelector,
    ) -> Result<i64, LedgerError>;

    /// Product snapshot for pricing and display.
    async fn product(&self, product_id: Uuid) -> Result<Option<Product>, LedgerError>;
}

enum Resolved {
    Product,
    Visual(usize),
    Attribute(usize),
}

struct Entry {
    product: Product,
    visuals: Vec<VisualVariant>,
    attributes: Vec<AttributeVariant>,
}

impl Entry {
    /// Deterministic fallback chain: attribute → visual → product.
    fn resolve(&self, selector: &VariantSelector) -> Resolved {
        let (kind, label, attr_value) = match selector {
            VariantSelector::None => return Resolved::Product,
            VariantSelector::Visual { kind, label } => (kind, label, None),
            VariantSelector::VisualAndAttribute {
                kind,
                label,
                attr_value,
            } => (kind, label, Some(attr_value)),
        };

        let Some(visual_ix) = self
            .visuals
            .iter()
            .position(|v| v.kind == *kind && v.label == *label)
        else {
            return Resolved::Product;
        };

        if let Some(value) = attr_value {
            let visual_id = self.visuals[visual_ix].id;
            if let Some(attr_ix) = self
                .attributes
                .iter()
                .position(|a| a.visual_variant_id == Some(visual_id) && a.value == *value)
            {
                return Resolved::Attribute(attr_ix);
            }
        }

        Resolved::Visual(visual_ix)
    }

    fn counter_mut(&mut self, resolved: &Resolved) -> &mut i64 {
        match resolved {
            Resolved::Product => &mut self.product.stock,
            Resolved::Visual(ix) => &mut self.visuals[*ix].stock,
            Resolved::Attribute(ix) => &mut self.attributes[*ix].stock,
        }
    }

    fn counter(&self, resolved: &Resolved) -> i64 {
        match resolved {
            Resolved::Product => self.product.stock,
            Resolved::Visual(ix) => self.visuals[*ix].stock,
            Resolved::Attribute(ix) => self.attributes[*ix].stock,
        }
    }
}

impl From<&Resolved> for Tier {
    fn from(resolved: &Resolved) -> Self {
        match resolved {
            Resolved::Product => Tier::Product,
            Resolved::Visual(_) => Tier::Visual,
            Resolved::Attribute(_) => Tier::Attribute,
        }
    }
}

/// In-memory ledger backing tests and single-process deployments. The
/// Postgres ledger in the store crate applies the same resolution as
/// atomic `stock = stock ± n` updates.
pub struct MemoryInventory {
    inner: Mutex<HashMap<Uuid, Entry>>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert_product(&self, product: Product) {
        let mut inner = self.inner.lock().expect("inventory lock");
        inner.insert(
            product.id,
            Entry {
                product,
                visuals: Vec::new(),
                attributes: Vec::new(),
            },
        );
    }

    pub fn insert_visual(&self, variant: VisualVariant) {
        let mut inner = self.inner.lock().expect("inventory lock");
        if let Some(entry) = inner.get_mut(&variant.product_id) {
            entry.visuals.push(variant);
        }
    }

    pub fn insert_attribute(&self, variant: AttributeVariant) {
        let mut inner = self.inner.lock().expect("inventory lock");
        if let Some(entry) = inner.get_mut(&variant.product_id) {
            entry.attributes.push(variant);
        }
    }

    fn apply(
        &self,
        product_id: Uuid,
        delta: i64,
        selector: &VariantSelector,
    ) -> Result<Tier, LedgerError> {
        let mut inner = self.inner.lock().expect("inventory lock");
        let entry = inner
            .get_mut(&product_id)
            .ok_or(LedgerError::UnknownProduct(product_id))?;
        let resolved = entry.resolve(selector);
        let tier = Tier::from(&resolved);
        *entry.counter_mut(&resolved) += delta;
        tracing::debug!(%product_id, delta, tier = tier.as_str(), "stock adjusted");
        Ok(tier)
    }
}

impl Default for MemoryInventory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InventoryLedger for MemoryInventory {
    async fn deduct(
        &self,
        product_id: Uuid,
        quantity: i64,
        selector: &VariantSelector,
    ) -> Result<Tier, LedgerError> {
        self.apply(product_id, -quantity, selector)
    }

    async fn restore(
        &self,
        product_id: Uuid,
        quantity: i64,
        selector: &VariantSelector,
    ) -> Result<Tier, LedgerError> {
        self.apply(product_id, quantity, selector)
    }

    async fn available(
        &self,
        product_id: Uuid,
        selector: &VariantSelector,
    ) -> Result<i64, LedgerError> {
        let inner = self.inner.lock().expect("inventory lock");
        let entry = inner
            .get(&product_id)
            .ok_or(LedgerError::UnknownProduct(product_id))?;
        Ok(entry.counter(&entry.resolve(selector)))
    }

    async fn product(&self, product_id: Uuid) -> Result<Option<Product>, LedgerError> {
        let inner = self.inner.lock().expect("inventory lock");
        Ok(inner.get(&product_id).map(|e| e.product.clone()))
    }
}
