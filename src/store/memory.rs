//! In-memory work item store.
//!
//! Same semantics as the Postgres store. Used by tests and by
//! `taskscale simulate`.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::WorkItemStore;
use crate::error::{Error, Result};
use crate::model::work::{NewWorkItem, Status, WorkId, WorkItem};

#[derive(Default)]
struct Inner {
    items: HashMap<WorkId, WorkItem>,
    /// Pending ids, oldest first.
    pending: VecDeque<WorkId>,
    /// Insertion order, for listing.
    order: Vec<WorkId>,
}

/// Work item store backed by a single mutex.
///
/// # Example
///
/// ```
/// use taskscale::model::NewWorkItem;
/// use taskscale::store::InMemoryStore;
///
/// let store = InMemoryStore::new();
/// store.enqueue(NewWorkItem::new("resize thumbnails"));
/// assert_eq!(store.len(), 1);
/// ```
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new Pending item at the back of the queue.
    pub fn enqueue(&self, new: NewWorkItem) -> WorkItem {
        let item = new.into_pending(Utc::now());
        let mut inner = self.inner.lock();
        inner.pending.push_back(item.id);
        inner.order.push(item.id);
        inner.items.insert(item.id, item.clone());
        item
    }

    /// Get a work item by ID.
    pub fn get(&self, id: WorkId) -> Result<WorkItem> {
        self.inner
            .lock()
            .items
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("work item {id}")))
    }

    /// All items in insertion order.
    pub fn list(&self) -> Vec<WorkItem> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.items.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn count_with(&self, status: Status) -> u64 {
        self.inner
            .lock()
            .items
            .values()
            .filter(|item| item.status == status)
            .count() as u64
    }
}

#[async_trait]
impl WorkItemStore for InMemoryStore {
    async fn claim_next(&self) -> Result<Option<WorkItem>> {
        let mut inner = self.inner.lock();
        let Some(id) = inner.pending.pop_front() else {
            return Ok(None);
        };

        let item = inner
            .items
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("work item {id}")))?;
        let now = Utc::now();
        item.status = Status::InProgress;
        item.claimed_at = Some(now);
        item.updated_at = now;
        Ok(Some(item.clone()))
    }

    async fn mark_complete(&self, item: &WorkItem) -> Result<WorkItem> {
        let mut inner = self.inner.lock();
        let stored = inner
            .items
            .get_mut(&item.id)
            .ok_or_else(|| Error::NotFound(format!("work item {}", item.id)))?;

        if !stored.status.can_transition_to(Status::Completed) {
            return Err(Error::InvalidTransition {
                from: stored.status.to_string(),
                to: Status::Completed.to_string(),
            });
        }

        let now = Utc::now();
        stored.status = Status::Completed;
        stored.completed_at = Some(now);
        stored.updated_at = now;
        Ok(stored.clone())
    }

    async fn count_pending(&self) -> Result<u64> {
        Ok(self.inner.lock().pending.len() as u64)
    }

    async fn count_in_progress(&self) -> Result<u64> {
        Ok(self.count_with(Status::InProgress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claims_oldest_first() {
        let store = InMemoryStore::new();
        let first = store.enqueue(NewWorkItem::new("first"));
        store.enqueue(NewWorkItem::new("second"));

        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, Status::InProgress);
        assert!(claimed.claimed_at.is_some());
        assert_eq!(store.count_pending().await.unwrap(), 1);
        assert_eq!(store.count_in_progress().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn completing_a_pending_item_is_rejected() {
        let store = InMemoryStore::new();
        let item = store.enqueue(NewWorkItem::new("never claimed"));

        let err = store.mark_complete(&item).await.unwrap_err();
        assert!(err.is_invariant_violation());
        assert_eq!(store.get(item.id).unwrap().status, Status::Pending);
    }

    #[tokio::test]
    async fn completing_an_unknown_item_is_not_found() {
        let store = InMemoryStore::new();
        let stray = NewWorkItem::new("elsewhere").into_pending(Utc::now());

        let err = store.mark_complete(&stray).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
