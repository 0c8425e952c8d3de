// Combined store
// Composes the KV engine with the full-text index so every write to a
// searchable entity updates both from the caller's point of view. The KV
// write happens first; an index failure rolls it back.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::kv::KvEngine;
use crate::text_index::{IndexDocument, SearchHit, TagFilter, TextIndex};

/// KV engine plus search index over one database directory.
pub struct CombinedStore {
    kv: Arc<KvEngine>,
    index: Arc<TextIndex>,
}

impl CombinedStore {
    /// Open both engines. `db_path` is the KV snapshot file, `index_path`
    /// the search index directory beside it.
    pub async fn open(db_path: impl AsRef<Path>, index_path: impl AsRef<Path>) -> Result<Self> {
        let kv = Arc::new(KvEngine::open(db_path).await?);
        let index = Arc::new(TextIndex::open(index_path).await?);
        Ok(Self { kv, index })
    }

    pub fn kv(&self) -> &KvEngine {
        &self.kv
    }

    pub fn index(&self) -> &TextIndex {
        &self.index
    }

    /// Write a searchable row: KV first, then the index. If the index update
    /// fails the KV write is rolled back (previous value restored, or the
    /// key deleted if it was new) and the error propagates.
    pub async fn put_indexed(
        &self,
        bucket: &str,
        key: &[u8],
        value: &[u8],
        doc: IndexDocument,
    ) -> Result<()> {
        let previous = self
            .kv
            .update(|tx| {
                let previous = tx.get(bucket, key);
                tx.put(bucket, key, value);
                Ok(previous)
            })
            .await?;

        if let Err(index_err) = self.index.add(&doc).await {
            warn!(bucket, error = %index_err, "index update failed, rolling back kv write");
            let rollback = self
                .kv
                .update(|tx| {
                    match &previous {
                        Some(prior) => tx.put(bucket, key, prior),
                        None => tx.delete(bucket, key),
                    }
                    Ok(())
                })
                .await;
            if let Err(rollback_err) = rollback {
                warn!(bucket, error = %rollback_err, "kv rollback failed after index error");
            }
            return Err(index_err).context("search index update failed");
        }
        Ok(())
    }

    /// Delete a searchable row from both engines.
    pub async fn delete_indexed(&self, bucket: &str, key: &[u8], doc_id: &str) -> Result<()> {
        let previous = self
            .kv
            .update(|tx| {
                let previous = tx.get(bucket, key);
                tx.delete(bucket, key);
                Ok(previous)
            })
            .await?;

        if let Err(index_err) = self.index.remove(doc_id).await {
            warn!(bucket, error = %index_err, "index removal failed, restoring kv row");
            if let Some(prior) = previous {
                let rollback = self
                    .kv
                    .update(|tx| {
                        tx.put(bucket, key, &prior);
                        Ok(())
                    })
                    .await;
                if let Err(rollback_err) = rollback {
                    warn!(bucket, error = %rollback_err, "kv rollback failed after index error");
                }
            }
            return Err(index_err).context("search index removal failed");
        }
        Ok(())
    }

    /// Scored search followed by KV hydration. Hits whose KV row has
    /// vanished are logged and silently dropped; `memory reindex` repairs.
    pub async fn search_hydrated<T, F>(
        &self,
        bucket: &str,
        query: &str,
        min_score: f32,
        filter: &TagFilter,
        limit: usize,
        key_of: impl Fn(&SearchHit) -> Vec<u8>,
        decode: F,
    ) -> Result<Vec<(T, f32)>>
    where
        F: Fn(&[u8]) -> Result<T>,
    {
        let hits = self
            .index
            .search_with_score(query, min_score, filter, limit)
            .await?;
        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            let key = key_of(&hit);
            let row = self.kv.view(|tx| Ok(tx.get(bucket, &key))).await?;
            match row {
                Some(bytes) => match decode(&bytes) {
                    Ok(entity) => out.push((entity, hit.score)),
                    Err(e) => {
                        debug!(bucket, id = %hit.id, error = %e, "undecodable row during hydration, dropping hit");
                    }
                },
                None => {
                    debug!(bucket, id = %hit.id, "index hit without kv row, dropping");
                }
            }
        }
        Ok(out)
    }

    /// Canonical recovery after corruption or schema change: delete every
    /// index document, then re-add one per KV row. Returns the rebuilt
    /// document count.
    pub async fn sync_search_index<F>(&self, bucket: &str, to_doc: F) -> Result<usize>
    where
        F: Fn(&[u8], &[u8]) -> Result<Option<IndexDocument>>,
    {
        self.index.clear().await?;
        let rows = self.kv.view(|tx| Ok(tx.iter_all(bucket))).await?;
        let mut count = 0usize;
        for (key, value) in rows {
            match to_doc(&key, &value) {
                Ok(Some(doc)) => {
                    self.index.add(&doc).await?;
                    count += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(bucket, error = %e, "skipping undecodable row during index rebuild");
                }
            }
        }
        debug!(bucket, count, "search index rebuilt from kv");
        Ok(count)
    }

    /// Close in dependency order: the index is only a secondary structure,
    /// so it goes first, then the KV engine.
    pub async fn close(&self) -> Result<()> {
        self.kv.close().await
    }
}
