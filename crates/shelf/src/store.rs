//! # Record Store
//!
//! The shared, observable view of every record the UI is displaying. Each record id owns
//! a `watch` channel; the fetcher publishes into it, the reconciliation poller merges
//! into it and optimistic like/review callbacks edit it in place.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::debug;

use crate::record::{MergeOutcome, ProductRecord, Review, merge_record};

#[derive(Clone, Default)]
pub struct RecordStore {
    channels: Arc<RwLock<HashMap<String, watch::Sender<Option<ProductRecord>>>>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, id: &str) -> watch::Sender<Option<ProductRecord>> {
        if let Some(tx) = self.channels.read().get(id) {
            return tx.clone();
        }
        self.channels
            .write()
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .clone()
    }

    /// Observe a record. The receiver yields `None` until the record is first loaded.
    pub fn subscribe(&self, id: &str) -> watch::Receiver<Option<ProductRecord>> {
        self.sender(id).subscribe()
    }

    pub fn get(&self, id: &str) -> Option<ProductRecord> {
        self.channels
            .read()
            .get(id)
            .and_then(|tx| tx.borrow().clone())
    }

    /// Replace a record wholesale.
    pub fn publish(&self, record: ProductRecord) {
        let tx = self.sender(&record.id);
        tx.send_replace(Some(record));
    }

    /// Merge a fresh copy into the displayed record, or insert it if none is displayed.
    pub fn reconcile(&self, fresh: &ProductRecord) -> MergeOutcome {
        let tx = self.sender(&fresh.id);
        let mut outcome = MergeOutcome::default();
        tx.send_if_modified(|current| match current {
            Some(local) => {
                outcome = merge_record(local, fresh);
                outcome.changed()
            }
            None => {
                *current = Some(fresh.clone());
                outcome.changed_fields.push("record");
                true
            }
        });
        outcome
    }

    /// Apply a local edit. Returns `false` when the record is not loaded.
    pub fn update(&self, id: &str, edit: impl FnOnce(&mut ProductRecord)) -> bool {
        let tx = self.sender(id);
        let mut applied = false;
        tx.send_if_modified(|current| match current {
            Some(record) => {
                edit(record);
                applied = true;
                true
            }
            None => false,
        });
        applied
    }

    /// Optimistically reflect a like or unlike by the viewer.
    pub fn apply_like(&self, id: &str, liked: bool) -> bool {
        self.update(id, |record| {
            if record.liked_by_viewer == Some(liked) {
                return;
            }
            let likes = record.likes_count.unwrap_or(0);
            record.likes_count = Some(if liked {
                likes.saturating_add(1)
            } else {
                likes.saturating_sub(1)
            });
            record.liked_by_viewer = Some(liked);
            debug!(record_id = %record.id, liked = liked, "Applied optimistic like");
        })
    }

    /// Optimistically show a review the viewer just posted.
    pub fn apply_review(&self, id: &str, review: Review) -> bool {
        self.update(id, |record| {
            record.reviews.insert(0, review);
            let count = record
                .review_count
                .unwrap_or(record.reviews.len() as u64 - 1);
            record.review_count = Some(count.saturating_add(1));
            debug!(record_id = %record.id, "Applied optimistic review");
        })
    }

    pub fn remove(&self, id: &str) {
        if let Some(tx) = self.channels.write().remove(id) {
            tx.send_replace(None);
        }
    }

    pub fn clear(&self) {
        let drained: Vec<_> = self.channels.write().drain().collect();
        for (_, tx) in drained {
            tx.send_replace(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, likes: Option<u64>) -> ProductRecord {
        let mut record = ProductRecord::with_defaults(id);
        record.likes_count = likes;
        record
    }

    #[tokio::test]
    async fn test_publish_notifies_subscribers() {
        let store = RecordStore::new();
        let mut rx = store.subscribe("agent-1");
        assert!(rx.borrow().is_none());

        store.publish(record("agent-1", Some(1)));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().unwrap().likes_count, Some(1));
    }

    #[test]
    fn test_reconcile_inserts_then_merges() {
        let store = RecordStore::new();
        let first = store.reconcile(&record("agent-1", Some(5)));
        assert!(first.changed());

        let unchanged = store.reconcile(&record("agent-1", None));
        assert!(!unchanged.changed());
        assert_eq!(store.get("agent-1").unwrap().likes_count, Some(5));
    }

    #[test]
    fn test_partial_payload_keeps_review_count() {
        let store = RecordStore::new();
        let displayed =
            crate::record::normalize_record(crate::test_utils::record_json("agent-1", 5)).unwrap();
        assert_eq!(displayed.review_count, Some(2));
        store.publish(displayed);

        let partial = crate::record::normalize_record(serde_json::json!({
            "id": "agent-1",
            "likesCount": 6,
            "reviews": []
        }))
        .unwrap();
        store.reconcile(&partial);

        let current = store.get("agent-1").unwrap();
        assert_eq!(current.likes_count, Some(6));
        assert_eq!(current.reviews.len(), 2);
        assert_eq!(current.review_count, Some(2));
    }

    #[test]
    fn test_unchanged_merge_does_not_notify() {
        let store = RecordStore::new();
        store.publish(record("agent-1", Some(5)));
        let rx = store.subscribe("agent-1");

        store.reconcile(&record("agent-1", Some(5)));
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_optimistic_like_toggles() {
        let store = RecordStore::new();
        assert!(!store.apply_like("agent-1", true));

        store.publish(record("agent-1", Some(0)));
        assert!(store.apply_like("agent-1", true));
        assert!(store.apply_like("agent-1", true));
        assert_eq!(store.get("agent-1").unwrap().likes_count, Some(1));

        store.apply_like("agent-1", false);
        store.apply_like("agent-1", false);
        let current = store.get("agent-1").unwrap();
        assert_eq!(current.likes_count, Some(0));
        assert_eq!(current.liked_by_viewer, Some(false));
    }

    #[test]
    fn test_optimistic_review_prepends() {
        let store = RecordStore::new();
        let mut base = record("agent-1", None);
        base.review_count = Some(4);
        store.publish(base);

        let review = Review {
            id: None,
            user_id: Some("me".into()),
            user_name: None,
            rating: Some(4.0),
            comment: "nice".into(),
            created_at: None,
        };
        assert!(store.apply_review("agent-1", review));
        let current = store.get("agent-1").unwrap();
        assert_eq!(current.reviews[0].comment, "nice");
        assert_eq!(current.review_count, Some(5));
    }

    #[test]
    fn test_clear_resets_subscribers() {
        let store = RecordStore::new();
        store.publish(record("agent-1", Some(1)));
        let rx = store.subscribe("agent-1");
        store.clear();
        assert!(rx.borrow().is_none());
        assert!(store.get("agent-1").is_none());
    }
}
