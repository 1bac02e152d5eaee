pub mod cart;
pub mod draft;
pub mod ledger;
pub mod models;
pub mod orchestrator;

pub use cart::{Cart, CartLine, CartStore, MemoryCartStore};
pub use draft::{DraftStore, MemoryDraftStore};
pub use ledger::{MemoryOrderLedger, OrderLedger, OrderLedgerError};
pub use models::{
    Order, OrderDraft, OrderLine, OrderStatus, PaymentAttempt, PaymentAttemptStatus, Purchaser,
};
pub use orchestrator::{
    CheckoutOrchestrator, CheckoutOutcome, CheckoutRequest, CheckoutRules, PaymentMethod, Totals,
};
