use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Visual variant kind. A product carries at most one kind of visual
/// variation (colorways or style cuts), selected by label.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VisualKind {
    Color,
    Style,
}

impl VisualKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisualKind::Color => "color",
            VisualKind::Style => "style",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "color" => Some(VisualKind::Color),
            "style" => Some(VisualKind::Style),
            _ => None,
        }
    }
}

/// Root of the variant hierarchy. `stock` is the product-tier counter used
/// when no finer tier resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub base_price: i64,
    pub stock: i64,
    pub discount_percent: u8,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn new(name: impl Into<String>, base_price: i64, stock: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            base_price,
            stock,
            discount_percent: 0,
            created_at: Utc::now(),
        }
    }

    /// Price after the product-level discount, rounded down to a whole unit.
    pub fn discounted_price(&self) -> i64 {
        if self.discount_percent == 0 {
            return self.base_price;
        }
        let pct = i64::from(self.discount_percent.min(100));
        self.base_price - self.base_price * pct / 100
    }
}

/// Tier-1 variant: one colorway or style of a product, with its own stock
/// counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualVariant {
    pub id: Uuid,
    pub product_id: Uuid,
    pub kind: VisualKind,
    pub label: String,
    pub stock: i64,
}

impl VisualVariant {
    pub fn new(product_id: Uuid, kind: VisualKind, label: impl Into<String>, stock: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            kind,
            label: label.into(),
            stock,
        }
    }
}

/// Tier-2 variant: a named attribute (typically a size) optionally scoped to
/// one visual variant, with its own stock counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeVariant {
    pub id: Uuid,
    pub product_id: Uuid,
    pub visual_variant_id: Option<Uuid>,
    pub name: String,
    pub value: String,
    pub stock: i64,
}

impl AttributeVariant {
    pub fn new(
        product_id: Uuid,
        visual_variant_id: Option<Uuid>,
        name: impl Into<String>,
        value: impl Into<String>,
        stock: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            visual_variant_id,
            name: name.into(),
            value: value.into(),
            stock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discounted_price_rounds_down() {
        let mut p = Product::new("Sneaker", 9999, 10);
        p.discount_percent = 15;
        assert_eq!(p.discounted_price(), 9999 - 9999 * 15 / 100);

        p.discount_percent = 0;
        assert_eq!(p.discounted_price(), 9999);
    }
}
