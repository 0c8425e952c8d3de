// Memory store
// Free-form notes with category and tags, searchable and exportable.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::combined_store::CombinedStore;
use crate::error::StoreError;
use crate::text_index::{IndexDocument, TagFilter};
use crate::types::{MemoryCategory, SortableId, ValidatedTag};

const BUCKET: &str = "memories";

/// A free-form note. Content and category are immutable after creation;
/// tags and updated_at change via tag edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: SortableId,
    pub content: String,
    pub category: MemoryCategory,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub access_count: u64,
}

impl Memory {
    fn index_doc(&self) -> IndexDocument {
        let mut text = self.content.clone();
        if !self.tags.is_empty() {
            text.push(' ');
            text.push_str(&self.tags.iter().cloned().collect::<Vec<_>>().join(" "));
        }
        IndexDocument {
            id: self.id.to_string(),
            text,
            tags: self.tags.iter().cloned().collect(),
            category: self.category.as_str().to_string(),
            created_ms: self.created_at.timestamp_millis(),
        }
    }
}

/// Listing filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryFilter {
    /// Exact category match.
    pub category: Option<MemoryCategory>,
    /// All of these tags must be present.
    pub tags: Vec<String>,
    /// Bypass the default exclude set (`forget`).
    pub include_all: bool,
    /// Page limit; 0 = unlimited.
    pub limit: usize,
}

/// Typed facade over the combined store for memories.
pub struct MemoryStore {
    store: Arc<CombinedStore>,
}

impl MemoryStore {
    pub fn new(store: Arc<CombinedStore>) -> Self {
        Self { store }
    }

    fn key(id: &SortableId) -> Vec<u8> {
        id.to_string().into_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Memory> {
        bincode::deserialize(bytes).map_err(|e| {
            anyhow::Error::new(StoreError::StoreCorrupt(format!("memory row: {e}")))
        })
    }

    /// Add a new memory.
    pub async fn add(
        &self,
        content: impl Into<String>,
        category: MemoryCategory,
        tags: Vec<ValidatedTag>,
    ) -> Result<Memory> {
        let content = content.into();
        if content.trim().is_empty() {
            anyhow::bail!(StoreError::Invalid("memory content cannot be empty".into()));
        }
        let now = Utc::now();
        let memory = Memory {
            id: SortableId::new(),
            content,
            category,
            tags: tags.into_iter().map(|t| t.as_str().to_string()).collect(),
            created_at: now,
            updated_at: now,
            access_count: 0,
        };
        let value = bincode::serialize(&memory).context("Failed to encode memory")?;
        self.store
            .put_indexed(BUCKET, &Self::key(&memory.id), &value, memory.index_doc())
            .await?;
        Ok(memory)
    }

    /// Insert a fully-formed memory, preserving its id (share import path).
    pub async fn insert(&self, memory: Memory) -> Result<()> {
        let value = bincode::serialize(&memory).context("Failed to encode memory")?;
        self.store
            .put_indexed(BUCKET, &Self::key(&memory.id), &value, memory.index_doc())
            .await
    }

    /// True when the id is present, without touching the access count.
    pub async fn exists(&self, id: &SortableId) -> Result<bool> {
        let key = Self::key(id);
        self.store
            .kv()
            .view(|tx| Ok(tx.get(BUCKET, &key).is_some()))
            .await
    }

    /// Fetch one memory and bump its access count.
    pub async fn get(&self, id: &SortableId) -> Result<Memory> {
        let key = Self::key(id);
        let updated = self
            .store
            .kv()
            .update(|tx| {
                let bytes = tx
                    .get(BUCKET, &key)
                    .ok_or_else(|| StoreError::NotFound(format!("memory {id}")))?;
                let mut memory = Self::decode(&bytes)?;
                memory.access_count += 1;
                let value = bincode::serialize(&memory).context("Failed to encode memory")?;
                tx.put(BUCKET, &key, &value);
                Ok(memory)
            })
            .await?;
        Ok(updated)
    }

    /// Apply a tag edit: add-set then remove-set against the current tags.
    /// Returns the post-image with `updated_at = now`.
    pub async fn update_tags(
        &self,
        id: &SortableId,
        add: Vec<ValidatedTag>,
        remove: Vec<ValidatedTag>,
    ) -> Result<Memory> {
        let key = Self::key(id);
        let memory = self
            .store
            .kv()
            .update(|tx| {
                let bytes = tx
                    .get(BUCKET, &key)
                    .ok_or_else(|| StoreError::NotFound(format!("memory {id}")))?;
                let mut memory = Self::decode(&bytes)?;
                for tag in &add {
                    memory.tags.insert(tag.as_str().to_string());
                }
                for tag in &remove {
                    memory.tags.remove(tag.as_str());
                }
                memory.updated_at = Utc::now();
                let value = bincode::serialize(&memory).context("Failed to encode memory")?;
                tx.put(BUCKET, &key, &value);
                Ok(memory)
            })
            .await?;
        // Tags are analysed fields, so the index document must follow.
        self.store.index().add(&memory.index_doc()).await?;
        Ok(memory)
    }

    /// Delete one memory.
    pub async fn delete(&self, id: &SortableId) -> Result<()> {
        let key = Self::key(id);
        let exists = self
            .store
            .kv()
            .view(|tx| Ok(tx.get(BUCKET, &key).is_some()))
            .await?;
        if !exists {
            anyhow::bail!(StoreError::NotFound(format!("memory {id}")));
        }
        self.store
            .delete_indexed(BUCKET, &key, &id.to_string())
            .await
    }

    /// List memories, newest first.
    pub async fn list(&self, filter: &MemoryFilter) -> Result<Vec<Memory>> {
        let rows = self.store.kv().view(|tx| Ok(tx.iter_all(BUCKET))).await?;
        let mut memories = Vec::new();
        for (_, bytes) in rows {
            let memory = match Self::decode(&bytes) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping undecodable memory row");
                    continue;
                }
            };
            if let Some(category) = filter.category {
                if memory.category != category {
                    continue;
                }
            }
            if !filter.tags.iter().all(|t| memory.tags.contains(t)) {
                continue;
            }
            if !filter.include_all && memory.tags.contains("forget") {
                continue;
            }
            memories.push(memory);
        }
        memories.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if filter.limit > 0 && memories.len() > filter.limit {
            memories.truncate(filter.limit);
        }
        Ok(memories)
    }

    /// Plain search (score threshold 0, default exclude set).
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<Memory>> {
        let hits = self
            .search_with_score(query, 0.0, TagFilter::Default, limit)
            .await?;
        Ok(hits.into_iter().map(|(m, _)| m).collect())
    }

    /// Scored search with explicit exclude-tags behaviour.
    pub async fn search_with_score(
        &self,
        query: &str,
        min_score: f32,
        filter: TagFilter,
        limit: usize,
    ) -> Result<Vec<(Memory, f32)>> {
        self.store
            .search_hydrated(
                BUCKET,
                query,
                min_score,
                &filter,
                limit,
                |hit| hit.id.clone().into_bytes(),
                Self::decode,
            )
            .await
    }

    /// Group session-category memories by tag (session identifiers live in
    /// tags). Returns (tag, count, latest created_at) triples, newest first.
    pub async fn sessions(&self) -> Result<Vec<(String, usize, DateTime<Utc>)>> {
        let sessions = self
            .list(&MemoryFilter {
                category: Some(MemoryCategory::Session),
                include_all: true,
                ..Default::default()
            })
            .await?;
        let mut grouped: BTreeMap<String, (usize, DateTime<Utc>)> = BTreeMap::new();
        for memory in sessions {
            for tag in &memory.tags {
                let entry = grouped
                    .entry(tag.clone())
                    .or_insert((0, memory.created_at));
                entry.0 += 1;
                if memory.created_at > entry.1 {
                    entry.1 = memory.created_at;
                }
            }
        }
        let mut out: Vec<_> = grouped
            .into_iter()
            .map(|(tag, (count, latest))| (tag, count, latest))
            .collect();
        out.sort_by(|a, b| b.2.cmp(&a.2));
        Ok(out)
    }

    /// Delete every memory. Returns the number removed.
    pub async fn clear_all(&self) -> Result<usize> {
        let count = self.store.kv().bucket_len(BUCKET).await;
        self.store
            .kv()
            .update(|tx| {
                tx.clear_bucket(BUCKET);
                Ok(())
            })
            .await?;
        self.store.index().clear().await?;
        Ok(count)
    }

    /// Rebuild the search index from the KV rows (repair path).
    pub async fn sync_search_index(&self) -> Result<usize> {
        self.store
            .sync_search_index(BUCKET, |_, value| {
                let memory = Self::decode(value)?;
                Ok(Some(memory.index_doc()))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> MemoryStore {
        let combined = CombinedStore::open(
            dir.path().join("store.db"),
            dir.path().join("search.idx"),
        )
        .await
        .unwrap();
        MemoryStore::new(Arc::new(combined))
    }

    fn tags(names: &[&str]) -> Vec<ValidatedTag> {
        names.iter().map(|n| ValidatedTag::new(*n).unwrap()).collect()
    }

    #[tokio::test]
    async fn add_then_get_bumps_access_count() -> Result<()> {
        let dir = TempDir::new()?;
        let memories = store(&dir).await;
        let added = memories
            .add("watch for the stale lockfile", MemoryCategory::Gotcha, tags(&["locks"]))
            .await?;
        assert_eq!(added.access_count, 0);

        let first = memories.get(&added.id).await?;
        assert_eq!(first.access_count, 1);
        let second = memories.get(&added.id).await?;
        assert_eq!(second.access_count, 2);
        Ok(())
    }

    #[tokio::test]
    async fn tag_edit_returns_post_image() -> Result<()> {
        let dir = TempDir::new()?;
        let memories = store(&dir).await;
        let added = memories
            .add("tag editing", MemoryCategory::Learning, tags(&["a", "b"]))
            .await?;

        let updated = memories
            .update_tags(&added.id, tags(&["c"]), tags(&["a"]))
            .await?;
        let expected: BTreeSet<String> = ["b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(updated.tags, expected);
        assert!(updated.updated_at >= added.updated_at);
        Ok(())
    }

    #[tokio::test]
    async fn list_filters_category_and_tags() -> Result<()> {
        let dir = TempDir::new()?;
        let memories = store(&dir).await;
        memories
            .add("one", MemoryCategory::Gotcha, tags(&["x"]))
            .await?;
        memories
            .add("two", MemoryCategory::Pattern, tags(&["x", "y"]))
            .await?;
        memories
            .add("three", MemoryCategory::Pattern, tags(&["y"]))
            .await?;

        let patterns = memories
            .list(&MemoryFilter {
                category: Some(MemoryCategory::Pattern),
                ..Default::default()
            })
            .await?;
        assert_eq!(patterns.len(), 2);

        let both = memories
            .list(&MemoryFilter {
                tags: vec!["x".into(), "y".into()],
                ..Default::default()
            })
            .await?;
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].content, "two");
        Ok(())
    }

    #[tokio::test]
    async fn forgotten_memories_hide_unless_include_all() -> Result<()> {
        let dir = TempDir::new()?;
        let memories = store(&dir).await;
        memories
            .add("kept", MemoryCategory::Learning, vec![])
            .await?;
        memories
            .add("hidden", MemoryCategory::Learning, tags(&["forget"]))
            .await?;

        let visible = memories.list(&MemoryFilter::default()).await?;
        assert_eq!(visible.len(), 1);

        let all = memories
            .list(&MemoryFilter {
                include_all: true,
                ..Default::default()
            })
            .await?;
        assert_eq!(all.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn search_finds_by_content_and_tag() -> Result<()> {
        let dir = TempDir::new()?;
        let memories = store(&dir).await;
        memories
            .add("prefer bounded channels", MemoryCategory::Pattern, tags(&["backpressure"]))
            .await?;

        let by_content = memories.search("bounded", 0).await?;
        assert_eq!(by_content.len(), 1);
        let by_tag = memories.search("backpressure", 0).await?;
        assert_eq!(by_tag.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn reindex_restores_search_after_index_loss() -> Result<()> {
        let dir = TempDir::new()?;
        {
            let memories = store(&dir).await;
            memories
                .add("rebuild me", MemoryCategory::Learning, vec![])
                .await?;
        }
        // Simulate index corruption by removing its directory.
        std::fs::remove_dir_all(dir.path().join("search.idx"))?;

        let memories = store(&dir).await;
        assert!(memories.search("rebuild", 0).await?.is_empty());
        let rebuilt = memories.sync_search_index().await?;
        assert_eq!(rebuilt, 1);
        assert_eq!(memories.search("rebuild", 0).await?.len(), 1);
        // KV listing unchanged throughout.
        assert_eq!(memories.list(&MemoryFilter::default()).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn clear_all_empties_both_engines() -> Result<()> {
        let dir = TempDir::new()?;
        let memories = store(&dir).await;
        memories.add("a", MemoryCategory::Learning, vec![]).await?;
        memories.add("b", MemoryCategory::Learning, vec![]).await?;

        let removed = memories.clear_all().await?;
        assert_eq!(removed, 2);
        assert!(memories.list(&MemoryFilter::default()).await?.is_empty());
        assert!(memories.search("a", 0).await?.is_empty());
        Ok(())
    }
}
