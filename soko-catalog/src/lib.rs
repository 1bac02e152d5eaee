pub mod inventory;
pub mod product;
pub mod selector;

pub use inventory::{InventoryLedger, LedgerError, MemoryInventory, Tier};
pub use product::{AttributeVariant, Product, VisualKind, VisualVariant};
pub use selector::VariantSelector;
