//! What a worker does with a claimed item.

use std::time::Duration;

use async_trait::async_trait;

use crate::model::work::WorkItem;

/// Processes one claimed work item.
///
/// Must finish in bounded time. Workers never preempt a running `process`
/// call, so a stop request waits for it.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, item: &WorkItem);
}

/// Sleeps for a fixed duration per item.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedProcessor {
    duration: Duration,
}

impl SimulatedProcessor {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl Processor for SimulatedProcessor {
    async fn process(&self, _item: &WorkItem) {
        tokio::time::sleep(self.duration).await;
    }
}
