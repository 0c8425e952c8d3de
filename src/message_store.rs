// Message store
// Ephemeral TTL-bounded notes between agent identities, with broadcast
// delivery tracking. Expired messages are invisible to every list call.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::combined_store::CombinedStore;
use crate::error::StoreError;

const BUCKET: &str = "messages";

/// Default TTL when the sender does not pass one.
pub const DEFAULT_TTL_SECS: i64 = 3600;

/// One inter-agent message. An empty `to` means broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub from: String,
    pub to: String,
    pub content: String,
    pub msg_type: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub read_by: BTreeSet<String>,
}

impl Message {
    pub fn is_broadcast(&self) -> bool {
        self.to.is_empty()
    }

    fn expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Typed facade over the KV engine for messages.
pub struct MessageStore {
    store: Arc<CombinedStore>,
}

impl MessageStore {
    pub fn new(store: Arc<CombinedStore>) -> Self {
        Self { store }
    }

    fn key(id: u64) -> [u8; 8] {
        id.to_be_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Message> {
        bincode::deserialize(bytes)
            .map_err(|e| anyhow::Error::new(StoreError::StoreCorrupt(format!("message row: {e}"))))
    }

    /// Send a message. `ttl_secs` of `None` means the default (3600 s).
    pub async fn send(
        &self,
        from: impl Into<String>,
        to: impl Into<String>,
        content: impl Into<String>,
        msg_type: impl Into<String>,
        ttl_secs: Option<i64>,
    ) -> Result<Message> {
        let ttl = ttl_secs.unwrap_or(DEFAULT_TTL_SECS);
        if ttl <= 0 {
            anyhow::bail!(StoreError::Invalid(format!("ttl must be positive, got {ttl}")));
        }
        let now = Utc::now();
        let mut message = Message {
            id: 0,
            from: from.into(),
            to: to.into(),
            content: content.into(),
            msg_type: msg_type.into(),
            created_at: now,
            expires_at: now + Duration::seconds(ttl),
            read_by: BTreeSet::new(),
        };

        let id = self
            .store
            .kv()
            .update(|tx| {
                let id = tx.next_id(BUCKET);
                message.id = id;
                let bytes = bincode::serialize(&message).context("Failed to encode message")?;
                tx.put(BUCKET, &Self::key(id), &bytes);
                Ok(id)
            })
            .await?;
        message.id = id;
        Ok(message)
    }

    /// Messages visible to an agent: unacknowledged broadcasts plus directed
    /// messages addressed to it, all unexpired. Prunes first so expiry is
    /// invisible to callers.
    pub async fn list(&self, agent: &str) -> Result<Vec<Message>> {
        self.prune().await?;
        let now = Utc::now();
        let rows = self.store.kv().view(|tx| Ok(tx.iter_all(BUCKET))).await?;
        let mut messages = Vec::new();
        for (_, bytes) in rows {
            let message = Self::decode(&bytes)?;
            if message.expired_at(now) {
                continue;
            }
            let visible = if message.is_broadcast() {
                !message.read_by.contains(agent)
            } else {
                message.to == agent
            };
            if visible {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    /// Acknowledge a message for an agent. Acknowledging twice is a no-op.
    pub async fn ack(&self, id: u64, agent: impl Into<String>) -> Result<Message> {
        let agent = agent.into();
        self.store
            .kv()
            .update(|tx| {
                let bytes = tx
                    .get(BUCKET, &Self::key(id))
                    .ok_or_else(|| StoreError::NotFound(format!("message {id}")))?;
                let mut message = Self::decode(&bytes)?;
                if message.read_by.insert(agent.clone()) {
                    let bytes = bincode::serialize(&message).context("Failed to encode message")?;
                    tx.put(BUCKET, &Self::key(id), &bytes);
                }
                Ok(message)
            })
            .await
    }

    /// Remove all expired messages. Idempotent; returns the number removed.
    pub async fn prune(&self) -> Result<usize> {
        let now = Utc::now();
        self.store
            .kv()
            .update(|tx| {
                let mut removed = 0usize;
                for (key, bytes) in tx.iter_all(BUCKET) {
                    match Self::decode(&bytes) {
                        Ok(message) if message.expired_at(now) => {
                            tx.delete(BUCKET, &key);
                            removed += 1;
                        }
                        Ok(_) => {}
                        Err(_) => {
                            // An undecodable message can never expire on its
                            // own; drop it here.
                            tx.delete(BUCKET, &key);
                            removed += 1;
                        }
                    }
                }
                Ok(removed)
            })
            .await
    }

    /// Remove every message. Returns the number removed.
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> MessageStore {
        let combined = CombinedStore::open(
            dir.path().join("store.db"),
            dir.path().join("search.idx"),
        )
        .await
        .unwrap();
        MessageStore::new(Arc::new(combined))
    }

    #[tokio::test]
    async fn ids_are_monotonic() -> Result<()> {
        let dir = TempDir::new()?;
        let messages = store(&dir).await;
        let a = messages.send("w1", "c1", "first", "info", None).await?;
        let b = messages.send("w1", "c1", "second", "info", None).await?;
        assert!(b.id > a.id);
        Ok(())
    }

    #[tokio::test]
    async fn directed_and_broadcast_visibility() -> Result<()> {
        let dir = TempDir::new()?;
        let messages = store(&dir).await;
        messages.send("w1", "c1", "for c1", "info", None).await?;
        messages.send("w1", "", "for everyone", "info", None).await?;

        let c1_inbox = messages.list("c1").await?;
        assert_eq!(c1_inbox.len(), 2);

        let c2_inbox = messages.list("c2").await?;
        assert_eq!(c2_inbox.len(), 1);
        assert!(c2_inbox[0].is_broadcast());
        Ok(())
    }

    #[tokio::test]
    async fn broadcast_hides_after_ack_per_reader() -> Result<()> {
        let dir = TempDir::new()?;
        let messages = store(&dir).await;
        let sent = messages.send("w1", "", "hello all", "info", None).await?;

        messages.ack(sent.id, "c1").await?;
        assert!(messages.list("c1").await?.is_empty());
        // Still visible to a reader that has not acknowledged.
        assert_eq!(messages.list("c2").await?.len(), 1);

        // Double-ack is a no-op.
        let again = messages.ack(sent.id, "c1").await?;
        assert!(again.read_by.contains("c1"));
        Ok(())
    }

    #[tokio::test]
    async fn expiry_is_invisible_and_prune_idempotent() -> Result<()> {
        let dir = TempDir::new()?;
        let messages = store(&dir).await;
        messages.send("w1", "c1", "short lived", "info", Some(1)).await?;

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert!(messages.list("c1").await?.is_empty());

        // list() already pruned; a fresh send then manual prune counts 1, 0.
        messages.send("w1", "c1", "short again", "info", Some(1)).await?;
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert_eq!(messages.prune().await?, 1);
        assert_eq!(messages.prune().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn zero_ttl_is_invalid() -> Result<()> {
        let dir = TempDir::new()?;
        let messages = store(&dir).await;
        let err = messages
            .send("w1", "c1", "x", "info", Some(0))
            .await
            .unwrap_err();
        assert!(matches!(
            crate::error::as_store_error(&err),
            Some(StoreError::Invalid(_))
        ));
        Ok(())
    }
}
