// Decision store
// Append-only records of architectural choices, keyed by topic. "Update" is
// a new append under the same topic; history is never rewritten.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::combined_store::CombinedStore;
use crate::error::StoreError;

const BUCKET: &str = "decisions";

/// One append in a topic's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub topic: String,
    pub decision: String,
    pub rationale: String,
    pub details: String,
    pub references: Vec<String>,
    pub decided_by: String,
    pub created_at: DateTime<Utc>,
}

/// Typed facade over the KV engine for decisions. Decisions are not
/// full-text indexed; the composite key gives ordered history directly.
pub struct DecisionStore {
    store: Arc<CombinedStore>,
}

impl DecisionStore {
    pub fn new(store: Arc<CombinedStore>) -> Self {
        Self { store }
    }

    /// Composite key `(topic, createdAt)`: topic bytes, NUL, big-endian
    /// millis. Prefix iteration over the topic yields history in order.
    fn key(topic: &str, created_ms: i64) -> Vec<u8> {
        let mut key = topic.as_bytes().to_vec();
        key.push(0);
        key.extend_from_slice(&(created_ms as u64).to_be_bytes());
        key
    }

    fn topic_prefix(topic: &str) -> Vec<u8> {
        let mut prefix = topic.as_bytes().to_vec();
        prefix.push(0);
        prefix
    }

    fn decode(bytes: &[u8]) -> Result<Decision> {
        bincode::deserialize(bytes).map_err(|e| {
            anyhow::Error::new(StoreError::StoreCorrupt(format!("decision row: {e}")))
        })
    }

    /// Append a decision for a topic.
    pub async fn set(
        &self,
        topic: impl Into<String>,
        decision: impl Into<String>,
        rationale: impl Into<String>,
        details: impl Into<String>,
        references: Vec<String>,
        decided_by: impl Into<String>,
    ) -> Result<Decision> {
        let topic = topic.into();
        if topic.trim().is_empty() || topic.contains('\0') {
            anyhow::bail!(StoreError::Invalid("decision topic cannot be empty".into()));
        }
        let mut record = Decision {
            topic: topic.clone(),
            decision: decision.into(),
            rationale: rationale.into(),
            details: details.into(),
            references,
            decided_by: decided_by.into(),
            created_at: Utc::now(),
        };
        if record.decision.trim().is_empty() {
            anyhow::bail!(StoreError::Invalid("decision text cannot be empty".into()));
        }

        self.store
            .kv()
            .update(|tx| {
                // Two appends in the same millisecond would collide on the
                // composite key; nudge forward so history stays total-ordered.
                let prefix = Self::topic_prefix(&topic);
                let mut created_ms = record.created_at.timestamp_millis();
                if let Some((last_key, _)) = tx.scan_prefix(BUCKET, &prefix).last() {
                    let ms_bytes: [u8; 8] = last_key[last_key.len() - 8..].try_into().unwrap();
                    let last_ms = u64::from_be_bytes(ms_bytes) as i64;
                    if created_ms <= last_ms {
                        created_ms = last_ms + 1;
                    }
                }
                record.created_at = Utc
                    .timestamp_millis_opt(created_ms)
                    .single()
                    .unwrap_or(record.created_at);
                let value = bincode::serialize(&record).context("Failed to encode decision")?;
                tx.put(BUCKET, &Self::key(&topic, created_ms), &value);
                Ok(())
            })
            .await?;
        Ok(record)
    }

    /// Current decision for a topic: the append with maximum createdAt.
    pub async fn get(&self, topic: &str) -> Result<Decision> {
        let prefix = Self::topic_prefix(topic);
        let row = self
            .store
            .kv()
            .view(|tx| Ok(tx.scan_prefix(BUCKET, &prefix).pop()))
            .await?;
        match row {
            Some((_, bytes)) => Self::decode(&bytes),
            None => Err(StoreError::NotFound(format!("decision topic '{topic}'")).into()),
        }
    }

    /// Full history for a topic in chronological order.
    pub async fn history(&self, topic: &str) -> Result<Vec<Decision>> {
        let prefix = Self::topic_prefix(topic);
        let rows = self
            .store
            .kv()
            .view(|tx| Ok(tx.scan_prefix(BUCKET, &prefix)))
            .await?;
        rows.iter().map(|(_, bytes)| Self::decode(bytes)).collect()
    }

    /// Latest decision per topic, ordered by topic.
    pub async fn list(&self) -> Result<Vec<Decision>> {
        let rows = self.store.kv().view(|tx| Ok(tx.iter_all(BUCKET))).await?;
        let mut latest: Vec<Decision> = Vec::new();
        for (_, bytes) in rows {
            let decision = Self::decode(&bytes)?;
            match latest.last_mut() {
                // Keys sort by (topic, createdAt), so the last row per topic
                // is the current one.
                Some(prev) if prev.topic == decision.topic => *prev = decision,
                _ => latest.push(decision),
            }
        }
        Ok(latest)
    }

    /// Delete every append for a topic. Returns the number removed.
    pub async fn delete_topic(&self, topic: &str) -> Result<usize> {
        let prefix = Self::topic_prefix(topic);
        let removed = self
            .store
            .kv()
            .update(|tx| {
                let rows = tx.scan_prefix(BUCKET, &prefix);
                for (key, _) in &rows {
                    tx.delete(BUCKET, key);
                }
                Ok(rows.len())
            })
            .await?;
        if removed == 0 {
            anyhow::bail!(StoreError::NotFound(format!("decision topic '{topic}'")));
        }
        Ok(removed)
    }

    /// Wipe all topics. Returns the number of appends removed.
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

    async fn store(dir: &TempDir) -> DecisionStore {
        let combined = CombinedStore::open(
            dir.path().join("store.db"),
            dir.path().join("search.idx"),
        )
        .await
        .unwrap();
        DecisionStore::new(Arc::new(combined))
    }

    #[tokio::test]
    async fn latest_wins_and_history_is_chronological() -> Result<()> {
        let dir = TempDir::new()?;
        let decisions = store(&dir).await;

        decisions
            .set("auth-strategy", "JWT", "Stateless", "", vec![], "w1")
            .await?;
        decisions
            .set("auth-strategy", "Session", "Changed", "", vec![], "w1")
            .await?;

        let current = decisions.get("auth-strategy").await?;
        assert_eq!(current.decision, "Session");

        let history = decisions.history("auth-strategy").await?;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].decision, "JWT");
        assert_eq!(history[1].decision, "Session");
        assert!(history[0].created_at < history[1].created_at);
        Ok(())
    }

    #[tokio::test]
    async fn same_millisecond_appends_stay_ordered() -> Result<()> {
        let dir = TempDir::new()?;
        let decisions = store(&dir).await;
        for i in 0..5 {
            decisions
                .set("rapid", format!("d{i}"), "", "", vec![], "w1")
                .await?;
        }
        let history = decisions.history("rapid").await?;
        assert_eq!(history.len(), 5);
        let texts: Vec<_> = history.iter().map(|d| d.decision.clone()).collect();
        assert_eq!(texts, vec!["d0", "d1", "d2", "d3", "d4"]);
        Ok(())
    }

    #[tokio::test]
    async fn list_returns_latest_per_topic() -> Result<()> {
        let dir = TempDir::new()?;
        let decisions = store(&dir).await;
        decisions.set("a", "a1", "", "", vec![], "w").await?;
        decisions.set("b", "b1", "", "", vec![], "w").await?;
        decisions.set("a", "a2", "", "", vec![], "w").await?;

        let listed = decisions.list().await?;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].topic, "a");
        assert_eq!(listed[0].decision, "a2");
        assert_eq!(listed[1].decision, "b1");
        Ok(())
    }

    #[tokio::test]
    async fn get_is_a_view_not_a_deletion() -> Result<()> {
        let dir = TempDir::new()?;
        let decisions = store(&dir).await;
        decisions.set("t", "one", "", "", vec![], "w").await?;
        decisions.set("t", "two", "", "", vec![], "w").await?;
        decisions.get("t").await?;
        decisions.get("t").await?;
        assert_eq!(decisions.history("t").await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn delete_topic_removes_all_appends() -> Result<()> {
        let dir = TempDir::new()?;
        let decisions = store(&dir).await;
        decisions.set("gone", "x", "", "", vec![], "w").await?;
        decisions.set("gone", "y", "", "", vec![], "w").await?;
        decisions.set("kept", "z", "", "", vec![], "w").await?;

        assert_eq!(decisions.delete_topic("gone").await?, 2);
        assert!(decisions.get("gone").await.is_err());
        assert!(decisions.get("kept").await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn missing_topic_is_not_found() -> Result<()> {
        let dir = TempDir::new()?;
        let decisions = store(&dir).await;
        let err = decisions.get("absent").await.unwrap_err();
        assert!(matches!(
            crate::error::as_store_error(&err),
            Some(StoreError::NotFound(_))
        ));
        Ok(())
    }
}
