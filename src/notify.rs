//! Completion notifications.
//!
//! Fired once per item after it reaches Completed. Delivery is best-effort:
//! a failed notification never rolls back the completion.

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::model::work::WorkId;

/// Default service label used by [`LogNotifier`].
pub const DEFAULT_SERVICE: &str = "Simulated Lambda";

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Announce that `id` has been completed.
    async fn notify(&self, id: WorkId, title: &str) -> Result<()>;
}

/// Writes completion notifications to the structured log.
///
/// Stands in for a serverless function hook; `service` names the target.
#[derive(Debug, Clone)]
pub struct LogNotifier {
    service: String,
}

impl LogNotifier {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE)
    }
}

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, id: WorkId, title: &str) -> Result<()> {
        info!(
            service = %self.service,
            work_id = %id.0,
            title,
            "work item marked as completed"
        );
        Ok(())
    }
}
