//! The work item store contract consumed by workers and the autoscaler.
//!
//! Stores own status transitions. Workers never read-modify-write a status
//! themselves; they go through `claim_next` and `mark_complete`, which must be
//! atomic in the backing implementation.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::work::WorkItem;

pub use memory::InMemoryStore;

#[async_trait]
pub trait WorkItemStore: Send + Sync {
    /// Atomically move one Pending item to InProgress and return it.
    ///
    /// Returns `None` when nothing is pending. Concurrent callers never
    /// receive the same item.
    async fn claim_next(&self) -> Result<Option<WorkItem>>;

    /// Atomically move an InProgress item to Completed.
    ///
    /// Fails with `Error::InvalidTransition` if the item is not currently
    /// InProgress, e.g. on a double completion.
    async fn mark_complete(&self, item: &WorkItem) -> Result<WorkItem>;

    /// Point-in-time count of Pending items.
    async fn count_pending(&self) -> Result<u64>;

    /// Point-in-time count of InProgress items.
    async fn count_in_progress(&self) -> Result<u64>;
}
