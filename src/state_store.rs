// State store
// Per-project and per-agent key/value scratch-pad. Keys prefixed
// `agent:<id>:` belong to that agent and are eligible for time-based cleanup.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::combined_store::CombinedStore;
use crate::error::StoreError;

const BUCKET: &str = "state";

/// One scratch-pad entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub key: String,
    pub value: String,
    /// Derived from an `agent:<id>:` key prefix.
    pub agent: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Extract the agent id from a prefixed key.
fn agent_of(key: &str) -> Option<String> {
    let rest = key.strip_prefix("agent:")?;
    let (agent, _) = rest.split_once(':')?;
    if agent.is_empty() {
        None
    } else {
        Some(agent.to_string())
    }
}

/// Typed facade over the KV engine for state entries.
pub struct StateStore {
    store: Arc<CombinedStore>,
}

impl StateStore {
    pub fn new(store: Arc<CombinedStore>) -> Self {
        Self { store }
    }

    fn decode(bytes: &[u8]) -> Result<StateEntry> {
        bincode::deserialize(bytes)
            .map_err(|e| anyhow::Error::new(StoreError::StoreCorrupt(format!("state row: {e}"))))
    }

    /// Set (overwrite) a value.
    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>) -> Result<StateEntry> {
        let key = key.into();
        if key.trim().is_empty() {
            anyhow::bail!(StoreError::Invalid("state key cannot be empty".into()));
        }
        let entry = StateEntry {
            agent: agent_of(&key),
            key: key.clone(),
            value: value.into(),
            updated_at: Utc::now(),
        };
        let bytes = bincode::serialize(&entry).context("Failed to encode state entry")?;
        self.store
            .kv()
            .update(|tx| {
                tx.put(BUCKET, key.as_bytes(), &bytes);
                Ok(())
            })
            .await?;
        Ok(entry)
    }

    pub async fn get(&self, key: &str) -> Result<StateEntry> {
        let row = self
            .store
            .kv()
            .view(|tx| Ok(tx.get(BUCKET, key.as_bytes())))
            .await?;
        match row {
            Some(bytes) => Self::decode(&bytes),
            None => Err(StoreError::NotFound(format!("state key '{key}'")).into()),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let existed = self
            .store
            .kv()
            .update(|tx| {
                let existed = tx.get(BUCKET, key.as_bytes()).is_some();
                tx.delete(BUCKET, key.as_bytes());
                Ok(existed)
            })
            .await?;
        if !existed {
            anyhow::bail!(StoreError::NotFound(format!("state key '{key}'")));
        }
        Ok(())
    }

    /// List entries, optionally restricted to a key prefix, in key order.
    pub async fn list(&self, prefix: Option<&str>) -> Result<Vec<StateEntry>> {
        let prefix = prefix.unwrap_or("").as_bytes().to_vec();
        let rows = self
            .store
            .kv()
            .view(|tx| Ok(tx.scan_prefix(BUCKET, &prefix)))
            .await?;
        rows.iter().map(|(_, bytes)| Self::decode(bytes)).collect()
    }

    /// Remove all entries. Returns the number removed.
    pub async fn clear(&self) -> Result<usize> {
        let count = self.store.kv().bucket_len(BUCKET).await;
        self.store
            .kv()
            .update(|tx| {
                tx.clear_bucket(BUCKET);
                Ok(())
            })
            .await?;
        Ok(count)
    }

    /// Prune per-agent entries older than `max_age`. Project-scoped entries
    /// (no agent prefix) are never touched. Returns the number removed.
    pub async fn cleanup(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        self.store
            .kv()
            .update(|tx| {
                let mut removed = 0usize;
                for (key, bytes) in tx.scan_prefix(BUCKET, b"agent:") {
                    let entry = match Self::decode(&bytes) {
                        Ok(e) => e,
                        Err(_) => continue,
                    };
                    if entry.agent.is_some() && entry.updated_at < cutoff {
                        tx.delete(BUCKET, &key);
                        removed += 1;
                    }
                }
                Ok(removed)
            })
            .await
    }
}
