//! Test doubles shared by the engine tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use taskscale::error::{Error, Result};
use taskscale::model::work::{NewWorkItem, WorkId, WorkItem};
use taskscale::notify::NotificationSink;
use taskscale::store::{InMemoryStore, WorkItemStore};

/// Remembers every notification it receives.
#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<(WorkId, String)>>,
}

impl RecordingNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.seen.lock().iter().map(|(_, t)| t.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, id: WorkId, title: &str) -> Result<()> {
        self.seen.lock().push((id, title.to_string()));
        Ok(())
    }
}

/// Always fails.
pub struct FailingNotifier;

#[async_trait]
impl NotificationSink for FailingNotifier {
    async fn notify(&self, _id: WorkId, _title: &str) -> Result<()> {
        Err(Error::Notification("endpoint unreachable".to_string()))
    }
}

/// Wraps an in-memory store and fails the first N calls of each kind with a
/// transient error.
pub struct FlakyStore {
    inner: Arc<InMemoryStore>,
    claim_failures: AtomicU32,
    complete_failures: AtomicU32,
    count_failures: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            claim_failures: AtomicU32::new(0),
            complete_failures: AtomicU32::new(0),
            count_failures: AtomicU32::new(0),
        }
    }

    pub fn failing_claims(self, n: u32) -> Self {
        self.claim_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn failing_completes(self, n: u32) -> Self {
        self.complete_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn failing_counts(self, n: u32) -> Self {
        self.count_failures.store(n, Ordering::SeqCst);
        self
    }

    fn trip(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl WorkItemStore for FlakyStore {
    async fn claim_next(&self) -> Result<Option<WorkItem>> {
        if Self::trip(&self.claim_failures) {
            return Err(Error::Other("connection reset".to_string()));
        }
        self.inner.claim_next().await
    }

    async fn mark_complete(&self, item: &WorkItem) -> Result<WorkItem> {
        if Self::trip(&self.complete_failures) {
            return Err(Error::Other("connection reset".to_string()));
        }
        self.inner.mark_complete(item).await
    }

    async fn count_pending(&self) -> Result<u64> {
        if Self::trip(&self.count_failures) {
            return Err(Error::Other("connection reset".to_string()));
        }
        self.inner.count_pending().await
    }

    async fn count_in_progress(&self) -> Result<u64> {
        self.inner.count_in_progress().await
    }
}

/// Reports whatever pending depth the test sets and never hands out work.
#[derive(Default)]
pub struct FixedDepthStore {
    pending: AtomicU64,
}

impl FixedDepthStore {
    pub fn new(pending: u64) -> Self {
        Self {
            pending: AtomicU64::new(pending),
        }
    }

    pub fn set(&self, pending: u64) {
        self.pending.store(pending, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkItemStore for FixedDepthStore {
    async fn claim_next(&self) -> Result<Option<WorkItem>> {
        Ok(None)
    }

    async fn mark_complete(&self, item: &WorkItem) -> Result<WorkItem> {
        Err(Error::NotFound(format!("work item {}", item.id)))
    }

    async fn count_pending(&self) -> Result<u64> {
        Ok(self.pending.load(Ordering::SeqCst))
    }

    async fn count_in_progress(&self) -> Result<u64> {
        Ok(0)
    }
}

/// Store seeded with `n` items titled "item-1".."item-n".
pub fn seeded_store(n: usize) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    for i in 1..=n {
        store.enqueue(NewWorkItem::new(format!("item-{i}")).description("test payload"));
    }
    store
}

/// Poll `check` every 5ms until it returns true or `within` elapses.
pub async fn wait_until<F, Fut>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
