// Task store
// Units of work with a pending -> claimed -> done lifecycle. Claim is
// exclusive: it runs inside a single write transaction, so the KV engine's
// single-writer property guarantees exactly one winner.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::combined_store::CombinedStore;
use crate::error::StoreError;
use crate::types::{SortableId, TaskStatus};

const BUCKET: &str = "tasks";

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: SortableId,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub claimed_by: Option<String>,
    pub worktree: Option<String>,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Typed facade over the KV engine for tasks.
pub struct TaskStore {
    store: Arc<CombinedStore>,
}

impl TaskStore {
    pub fn new(store: Arc<CombinedStore>) -> Self {
        Self { store }
    }

    fn key(id: &SortableId) -> Vec<u8> {
        id.to_string().into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Task> {
        bincode::deserialize(bytes)
            .map_err(|e| anyhow::Error::new(StoreError::StoreCorrupt(format!("task row: {e}"))))
    }

    /// Create a pending task.
    pub async fn create(
        &self,
        title: impl Into<String>,
        description: impl Into<String>,
        worktree: Option<String>,
    ) -> Result<Task> {
        let title = title.into();
        if title.trim().is_empty() {
            anyhow::bail!(StoreError::Invalid("task title cannot be empty".into()));
        }
        let task = Task {
            id: SortableId::new(),
            title,
            description: description.into(),
            status: TaskStatus::Pending,
            claimed_by: None,
            worktree,
            result: None,
            created_at: Utc::now(),
            claimed_at: None,
            completed_at: None,
        };
        let bytes = bincode::serialize(&task).context("Failed to encode task")?;
        self.store
            .kv()
            .update(|tx| {
                tx.put(BUCKET, &Self::key(&task.id), &bytes);
                Ok(())
            })
            .await?;
        Ok(task)
    }

    pub async fn get(&self, id: &SortableId) -> Result<Task> {
        let row = self
            .store
            .kv()
            .view(|tx| Ok(tx.get(BUCKET, &Self::key(id))))
            .await?;
        match row {
            Some(bytes) => Self::decode(&bytes),
            None => Err(StoreError::NotFound(format!("task {id}")).into()),
        }
    }

    /// Atomically claim a pending task for an agent.
    ///
    /// Load, check and write happen in one write transaction; a concurrent
    /// claimer either sees pending first (and wins) or sees claimed (and
    /// gets `AlreadyClaimed`).
    pub async fn claim(&self, id: &SortableId, agent: impl Into<String>) -> Result<Task> {
        let agent = agent.into();
        let key = Self::key(id);
        self.store
            .kv()
            .update(|tx| {
                let bytes = tx
                    .get(BUCKET, &key)
                    .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
                let mut task = Self::decode(&bytes)?;
                if task.status != TaskStatus::Pending {
                    return Err(StoreError::AlreadyClaimed.into());
                }
                task.status = TaskStatus::Claimed;
                task.claimed_by = Some(agent.clone());
                task.claimed_at = Some(Utc::now());
                let bytes = bincode::serialize(&task).context("Failed to encode task")?;
                tx.put(BUCKET, &key, &bytes);
                Ok(task)
            })
            .await
    }

    /// Complete a claimed (or still-pending) task with a result.
    pub async fn complete(&self, id: &SortableId, result: impl Into<String>) -> Result<Task> {
        let result = result.into();
        let key = Self::key(id);
        self.store
            .kv()
            .update(|tx| {
                let bytes = tx
                    .get(BUCKET, &key)
                    .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
                let mut task = Self::decode(&bytes)?;
                match task.status {
                    TaskStatus::Claimed | TaskStatus::Pending => {}
                    other => {
                        return Err(StoreError::Invalid(format!(
                            "cannot complete a task in status '{other}'"
                        ))
                        .into())
                    }
                }
                task.status = TaskStatus::Done;
                task.result = Some(result.clone());
                task.completed_at = Some(Utc::now());
                let bytes = bincode::serialize(&task).context("Failed to encode task")?;
                tx.put(BUCKET, &key, &bytes);
                Ok(task)
            })
            .await
    }

    /// Mark a task blocked, recording the reason in its result field.
    pub async fn block(&self, id: &SortableId, reason: Option<String>) -> Result<Task> {
        let key = Self::key(id);
        self.store
            .kv()
            .update(|tx| {
                let bytes = tx
                    .get(BUCKET, &key)
                    .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
                let mut task = Self::decode(&bytes)?;
                if task.status == TaskStatus::Done {
                    return Err(
                        StoreError::Invalid("cannot block a completed task".into()).into()
                    );
                }
                task.status = TaskStatus::Blocked;
                if let Some(reason) = &reason {
                    task.result = Some(reason.clone());
                }
                let bytes = bincode::serialize(&task).context("Failed to encode task")?;
                tx.put(BUCKET, &key, &bytes);
                Ok(task)
            })
            .await
    }

    /// List tasks, oldest first. `None` status = all.
    pub async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let rows = self.store.kv().view(|tx| Ok(tx.iter_all(BUCKET))).await?;
        let mut tasks = Vec::new();
        for (_, bytes) in rows {
            let task = Self::decode(&bytes)?;
            if status.map_or(true, |s| task.status == s) {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    pub async fn delete(&self, id: &SortableId) -> Result<()> {
        let existed = self
            .store
            .kv()
            .update(|tx| {
                let key = Self::key(id);
                let existed = tx.get(BUCKET, &key).is_some();
                tx.delete(BUCKET, &key);
                Ok(existed)
            })
            .await?;
        if !existed {
            anyhow::bail!(StoreError::NotFound(format!("task {id}")));
        }
        Ok(())
    }

    /// Delete tasks by status; `None` clears everything. Returns the number
    /// removed.
    pub async fn clear_by_status(&self, status: Option<TaskStatus>) -> Result<usize> {
        self.store
            .kv()
            .update(|tx| {
                let mut removed = 0usize;
                for (key, bytes) in tx.iter_all(BUCKET) {
                    let matches = match status {
                        None => true,
                        Some(s) => Self::decode(&bytes).map(|t| t.status == s).unwrap_or(true),
                    };
                    if matches {
                        tx.delete(BUCKET, &key);
                        removed += 1;
                    }
                }
                Ok(removed)
            })
            .await
    }
}
