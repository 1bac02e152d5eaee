use serde::{Deserialize, Serialize};
use std::fmt;

use crate::product::VisualKind;

/// Which variant a cart line targets, parsed once when the line is added and
/// carried as a typed value from then on. The resolved inventory tier is
/// determined solely by which parts are present: both → attribute tier,
/// visual only → visual tier, neither → product tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum VariantSelector {
    #[default]
    None,
    Visual {
        kind: VisualKind,
        label: String,
    },
    VisualAndAttribute {
        kind: VisualKind,
        label: String,
        attr_value: String,
    },
}

impl VariantSelector {
    /// Parse a comma-separated `key:value` descriptor, e.g.
    /// `"color:Red, size:41"`. Keys are case-insensitive; malformed tokens
    /// are skipped rather than failing the parse. A size-like key with no
    /// color/style key yields `None` — the original resolves such lines at
    /// the product tier and that policy is kept.
    pub fn parse(descriptor: &str) -> Self {
        let mut visual: Option<(VisualKind, String)> = None;
        let mut size: Option<String> = None;

        for token in descriptor.split(',') {
            let Some((key, value)) = token.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            if let Some(kind) = VisualKind::parse(&key) {
                visual.get_or_insert((kind, value.to_string()));
            } else if key == "size" {
                size.get_or_insert(value.to_string());
            }
        }

        match (visual, size) {
            (Some((kind, label)), Some(attr_value)) => VariantSelector::VisualAndAttribute {
                kind,
                label,
                attr_value,
            },
            (Some((kind, label)), None) => VariantSelector::Visual { kind, label },
            (None, _) => VariantSelector::None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, VariantSelector::None)
    }
}

/// Canonical descriptor rendering, stored on order lines for display and
/// audit. Round-trips through `parse`.
impl fmt::Display for VariantSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantSelector::None => Ok(()),
            VariantSelector::Visual { kind, label } => write!(f, "{}:{}", kind.as_str(), label),
            VariantSelector::VisualAndAttribute {
                kind,
                label,
                attr_value,
            } => write!(f, "{}:{}, size:{}", kind.as_str(), label, attr_value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_color_and_size() {
        let sel = VariantSelector::parse("color:Red, size:41");
        assert_eq!(
            sel,
            VariantSelector::VisualAndAttribute {
                kind: VisualKind::Color,
                label: "Red".into(),
                attr_value: "41".into(),
            }
        );
    }

    #[test]
    fn keys_are_case_insensitive() {
        let sel = VariantSelector::parse("Color:Red, SIZE:41");
        assert!(matches!(sel, VariantSelector::VisualAndAttribute { .. }));
    }

    #[test]
    fn style_counts_as_visual() {
        let sel = VariantSelector::parse("style:Slim");
        assert_eq!(
            sel,
            VariantSelector::Visual {
                kind: VisualKind::Style,
                label: "Slim".into(),
            }
        );
    }

    #[test]
    fn size_alone_targets_product_tier() {
        assert_eq!(VariantSelector::parse("size:41"), VariantSelector::None);
    }

    #[test]
    fn malformed_tokens_are_skipped() {
        let sel = VariantSelector::parse("garbage, color:Red, :, size:");
        assert_eq!(
            sel,
            VariantSelector::Visual {
                kind: VisualKind::Color,
                label: "Red".into(),
            }
        );
        assert_eq!(VariantSelector::parse(""), VariantSelector::None);
        assert_eq!(VariantSelector::parse("material:Wool"), VariantSelector::None);
    }

    #[test]
    fn display_round_trips() {
        let sel = VariantSelector::parse("color:Red, size:41");
        assert_eq!(sel.to_string(), "color:Red, size:41");
        assert_eq!(VariantSelector::parse(&sel.to_string()), sel);
    }
}
