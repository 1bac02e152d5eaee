use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

use soko_core::CheckoutError;

use crate::models::OrderDraft;

/// Holds order drafts keyed by payment external ref while a collection is
/// awaiting approval. Entries expire after a bounded window so abandoned
/// polling sessions do not accumulate.
#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn put(&self, draft: OrderDraft) -> Result<(), CheckoutError>;
    async fn get(&self, external_ref: Uuid) -> Result<Option<OrderDraft>, CheckoutError>;
    async fn discard(&self, external_ref: Uuid) -> Result<(), CheckoutError>;
}

pub struct MemoryDraftStore {
    ttl: Duration,
    drafts: Mutex<HashMap<Uuid, (OrderDraft, Instant)>>,
}

impl MemoryDraftStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            drafts: Mutex::new(HashMap::new()),
        }
    }

    fn prune(&self, drafts: &mut HashMap<Uuid, (OrderDraft, Instant)>) {
        let ttl = self.ttl;
        drafts.retain(|_, (_, stored_at)| stored_at.elapsed() < ttl);
    }
}

impl Default for MemoryDraftStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

#[async_trait]
impl DraftStore for MemoryDraftStore {
    async fn put(&self, draft: OrderDraft) -> Result<(), CheckoutError> {
        let Some(external_ref) = draft.external_ref else {
            return Err(CheckoutError::Persistence(
                "draft without external ref".into(),
            ));
        };
        let mut drafts = self.drafts.lock().expect("draft lock");
        self.prune(&mut drafts);
        drafts.insert(external_ref, (draft, Instant::now()));
        Ok(())
    }

    async fn get(&self, external_ref: Uuid) -> Result<Option<OrderDraft>, CheckoutError> {
        let mut drafts = self.drafts.lock().expect("draft lock");
        self.prune(&mut drafts);
        Ok(drafts.get(&external_ref).map(|(draft, _)| draft.clone()))
    }

    async fn discard(&self, external_ref: Uuid) -> Result<(), CheckoutError> {
        let mut drafts = self.drafts.lock().expect("draft lock");
        drafts.remove(&external_ref);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Purchaser;
    use chrono::Utc;

    fn draft(external_ref: Uuid) -> OrderDraft {
        OrderDraft {
            external_ref: Some(external_ref),
            session: "s1".into(),
            purchaser: Purchaser::Guest {
                email: "g@example.com".into(),
            },
            full_name: "Test Shopper".into(),
            address_line: "KG 11 Ave".into(),
            city: "Kigali".into(),
            delivery_phone: "+250781234567".into(),
            provider: Some("mtn".into()),
            momo_number: Some("0781234567".into()),
            notes: String::new(),
            latitude: None,
            longitude: None,
            subtotal: 1000,
            total_amount: 2680,
            currency: "EUR".into(),
            lines: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn put_get_discard_cycle() {
        let store = MemoryDraftStore::default();
        let external_ref = Uuid::new_v4();
        store.put(draft(external_ref)).await.unwrap();
        assert!(store.get(external_ref).await.unwrap().is_some());
        store.discard(external_ref).await.unwrap();
        assert!(store.get(external_ref).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_drafts_are_pruned() {
        let store = MemoryDraftStore::new(Duration::from_millis(0));
        let external_ref = Uuid::new_v4();
        store.put(draft(external_ref)).await.unwrap();
        assert!(store.get(external_ref).await.unwrap().is_none());
    }
}
