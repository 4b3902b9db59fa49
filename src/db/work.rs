//! Work item operations: submit, claim with SKIP LOCKED, guarded completion.

use async_trait::async_trait;
use opentelemetry::KeyValue;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::work::*;
use crate::store::WorkItemStore;
use crate::telemetry::metrics;

const SELECT_COLUMNS: &str =
    "id, title, description, status, created_at, updated_at, claimed_at, completed_at";

fn record_operation(operation: &'static str) {
    metrics::store_operations().add(
        1,
        &[
            KeyValue::new("store", "postgres"),
            KeyValue::new("operation", operation),
        ],
    );
}

impl super::Db {
    /// Insert a new Pending work item.
    pub async fn submit_work(&self, new: NewWorkItem) -> Result<WorkItem> {
        let item = new.into_pending(chrono::Utc::now());

        sqlx::query(
            "INSERT INTO work_items (id, title, description, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $5)",
        )
        .bind(item.id.0)
        .bind(&item.title)
        .bind(&item.description)
        .bind(item.status.as_str())
        .bind(item.created_at)
        .execute(self.pool())
        .await?;

        record_operation("submit");
        Ok(item)
    }

    /// Get a work item by ID.
    pub async fn get_work_item(&self, id: WorkId) -> Result<WorkItem> {
        let row: Option<WorkItemRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM work_items WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("work item {id}")))?
            .try_into_work_item()
    }

    /// List work items, newest first, optionally filtered by status.
    pub async fn list_work_items(
        &self,
        status: Option<Status>,
        limit: i64,
    ) -> Result<Vec<WorkItem>> {
        let rows: Vec<WorkItemRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM work_items
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY created_at DESC
             LIMIT $2"
        ))
        .bind(status.map(Status::as_str))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(WorkItemRow::try_into_work_item)
            .collect()
    }

    async fn count_with(&self, status: Status) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM work_items WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(self.pool())
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl WorkItemStore for super::Db {
    async fn claim_next(&self) -> Result<Option<WorkItem>> {
        // Lock one pending row, skipping rows other workers hold, and flip it
        // in the same statement.
        let row: Option<WorkItemRow> = sqlx::query_as(
            "WITH next AS (
                 SELECT id FROM work_items
                 WHERE status = 'pending'
                 ORDER BY created_at
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE work_items w
             SET status = 'in_progress', claimed_at = now(), updated_at = now()
             FROM next
             WHERE w.id = next.id
             RETURNING w.id, w.title, w.description, w.status,
                       w.created_at, w.updated_at, w.claimed_at, w.completed_at",
        )
        .fetch_optional(self.pool())
        .await?;

        record_operation(if row.is_some() { "claim" } else { "claim_empty" });
        row.map(WorkItemRow::try_into_work_item).transpose()
    }

    async fn mark_complete(&self, item: &WorkItem) -> Result<WorkItem> {
        let row: Option<WorkItemRow> = sqlx::query_as(&format!(
            "UPDATE work_items
             SET status = 'completed', completed_at = now(), updated_at = now()
             WHERE id = $1 AND status = 'in_progress'
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(item.id.0)
        .fetch_optional(self.pool())
        .await?;

        record_operation("complete");

        match row {
            Some(row) => row.try_into_work_item(),
            None => {
                // Either gone or not InProgress; report which.
                let current = self.get_work_item(item.id).await?;
                Err(Error::InvalidTransition {
                    from: current.status.to_string(),
                    to: Status::Completed.to_string(),
                })
            }
        }
    }

    async fn count_pending(&self) -> Result<u64> {
        record_operation("count_pending");
        self.count_with(Status::Pending).await
    }

    async fn count_in_progress(&self) -> Result<u64> {
        record_operation("count_in_progress");
        self.count_with(Status::InProgress).await
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct WorkItemRow {
    id: Uuid,
    title: String,
    description: String,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    claimed_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl WorkItemRow {
    fn try_into_work_item(self) -> Result<WorkItem> {
        Ok(WorkItem {
            id: WorkId(self.id),
            title: self.title,
            description: self.description,
            status: self.status.parse()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            claimed_at: self.claimed_at,
            completed_at: self.completed_at,
        })
    }
}
