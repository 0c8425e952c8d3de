// Ordered key/value engine with named buckets
// Single-writer, many-reader transactional store: an in-memory ordered map
// per bucket made durable by a write-ahead log and a snapshot file.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::StoreError;

/// Magic prefix on every WAL batch so torn tails are detected on replay.
const WAL_MAGIC: u32 = 0x41494445; // "AIDE"

/// Compact the WAL into a snapshot once it grows past this size.
const WAL_COMPACT_BYTES: u64 = 8 * 1024 * 1024;

/// In-memory state: named ordered buckets plus per-bucket id sequences.
#[derive(Debug, Default, Serialize, Deserialize)]
struct KvState {
    buckets: HashMap<String, BTreeMap<Vec<u8>, Vec<u8>>>,
    sequences: HashMap<String, u64>,
}

/// One durable operation inside a WAL batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum WalOp {
    Put {
        bucket: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        bucket: String,
        key: Vec<u8>,
    },
    ClearBucket {
        bucket: String,
    },
    Sequence {
        bucket: String,
        value: u64,
    },
}

/// A committed transaction: all ops apply or none do.
#[derive(Debug, Serialize, Deserialize)]
struct WalBatch {
    ops: Vec<WalOp>,
}

/// Ordered K/V engine with named buckets.
///
/// # Contract
/// - `view` sees a consistent snapshot; readers only block while a commit
///   holds the state write guard.
/// - `update` is fully serialised against all other writers, commits
///   atomically, and is durable (fsynced) before returning.
/// - If the update closure fails, no effect is visible and nothing is logged.
/// - Iteration within a bucket is lexicographic on the key bytes.
pub struct KvEngine {
    /// Snapshot file; the WAL lives beside it as `<name>.wal`.
    db_path: PathBuf,
    state: RwLock<KvState>,
    /// Serialises writers; also guards the WAL file handle.
    writer: Mutex<WalWriter>,
    /// Held for the lifetime of the engine; exactly one process may own the
    /// database file (NOTE: released on drop).
    _lock_file: std::fs::File,
}

struct WalWriter {
    file: std::fs::File,
    written: u64,
}

impl KvEngine {
    /// Open (or create) the database at `db_path`.
    ///
    /// Loads the snapshot if present, then replays the WAL. A torn batch at
    /// the WAL tail is discarded with a warning; everything before it is
    /// recovered.
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {}", parent.display()))?;
        }

        let lock_path = db_path.with_extension("db.lock");
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;
        if lock_file.try_lock_exclusive().is_err() {
            bail!(StoreError::Locked(db_path.display().to_string()));
        }

        let mut state = KvState::default();
        if db_path.exists() {
            let bytes = std::fs::read(&db_path)
                .with_context(|| format!("Failed to read snapshot: {}", db_path.display()))?;
            if !bytes.is_empty() {
                state = bincode::deserialize(&bytes).map_err(|e| {
                    anyhow::Error::new(StoreError::StoreCorrupt(format!(
                        "snapshot {}: {e}",
                        db_path.display()
                    )))
                })?;
            }
        }

        let wal_path = Self::wal_path(&db_path);
        let mut replayed = 0usize;
        if wal_path.exists() {
            replayed = Self::replay_wal(&wal_path, &mut state)?;
        }

        let wal_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&wal_path)
            .with_context(|| format!("Failed to open WAL: {}", wal_path.display()))?;
        let written = wal_file.metadata().map(|m| m.len()).unwrap_or(0);

        debug!(
            db = %db_path.display(),
            buckets = state.buckets.len(),
            replayed_batches = replayed,
            "kv engine opened"
        );

        Ok(Self {
            db_path,
            state: RwLock::new(state),
            writer: Mutex::new(WalWriter {
                file: wal_file,
                written,
            }),
            _lock_file: lock_file,
        })
    }

    fn wal_path(db_path: &Path) -> PathBuf {
        let mut name = db_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store.db".to_string());
        name.push_str(".wal");
        db_path.with_file_name(name)
    }

    fn replay_wal(wal_path: &Path, state: &mut KvState) -> Result<usize> {
        let mut file = std::fs::File::open(wal_path)
            .with_context(|| format!("Failed to open WAL for replay: {}", wal_path.display()))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut offset = 0usize;
        let mut batches = 0usize;
        while offset + 8 <= bytes.len() {
            let magic = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
            let len = u32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().unwrap()) as usize;
            if magic != WAL_MAGIC || offset + 8 + len > bytes.len() {
                warn!(
                    wal = %wal_path.display(),
                    offset,
                    "discarding torn WAL tail"
                );
                break;
            }
            let batch: WalBatch = match bincode::deserialize(&bytes[offset + 8..offset + 8 + len]) {
                Ok(b) => b,
                Err(e) => {
                    warn!(wal = %wal_path.display(), offset, error = %e, "undecodable WAL batch, stopping replay");
                    break;
                }
            };
            Self::apply_batch(state, &batch);
            offset += 8 + len;
            batches += 1;
        }
        Ok(batches)
    }

    fn apply_batch(state: &mut KvState, batch: &WalBatch) {
        for op in &batch.ops {
            match op {
                WalOp::Put { bucket, key, value } => {
                    state
                        .buckets
                        .entry(bucket.clone())
                        .or_default()
                        .insert(key.clone(), value.clone());
                }
                WalOp::Delete { bucket, key } => {
                    if let Some(b) = state.buckets.get_mut(bucket) {
                        b.remove(key);
                    }
                }
                WalOp::ClearBucket { bucket } => {
                    state.buckets.remove(bucket);
                }
                WalOp::Sequence { bucket, value } => {
                    let seq = state.sequences.entry(bucket.clone()).or_insert(0);
                    if *value > *seq {
                        *seq = *value;
                    }
                }
            }
        }
    }

    /// Run a read-only transaction against a consistent snapshot.
    pub async fn view<R>(&self, f: impl FnOnce(&ReadTxn<'_>) -> Result<R>) -> Result<R> {
        let state = self.state.read().await;
        let txn = ReadTxn { state: &state };
        f(&txn)
    }

    /// Run a write transaction.
    ///
    /// The closure buffers puts/deletes/sequence bumps; on success the batch
    /// is appended to the WAL, fsynced, then applied to memory. On closure
    /// error nothing happens.
    pub async fn update<R>(&self, f: impl FnOnce(&mut WriteTxn<'_>) -> Result<R>) -> Result<R> {
        let mut writer = self.writer.lock().await;

        let result;
        let batch;
        {
            let state = self.state.read().await;
            let mut txn = WriteTxn {
                state: &state,
                pending: Vec::new(),
                overlay: HashMap::new(),
                cleared: HashSet::new(),
                sequences: HashMap::new(),
            };
            result = f(&mut txn)?;
            batch = WalBatch { ops: txn.pending };
        }

        if !batch.ops.is_empty() {
            let payload = bincode::serialize(&batch).context("Failed to encode WAL batch")?;
            let mut frame = Vec::with_capacity(payload.len() + 8);
            frame.extend_from_slice(&WAL_MAGIC.to_le_bytes());
            frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            frame.extend_from_slice(&payload);
            writer
                .file
                .write_all(&frame)
                .context("Failed to append WAL batch")?;
            writer.file.sync_data().context("Failed to sync WAL")?;
            writer.written += frame.len() as u64;

            let mut state = self.state.write().await;
            Self::apply_batch(&mut state, &batch);
            drop(state);

            if writer.written >= WAL_COMPACT_BYTES {
                self.compact_locked(&mut writer).await?;
            }
        }

        Ok(result)
    }

    /// Write a fresh snapshot and truncate the WAL.
    pub async fn compact(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        self.compact_locked(&mut writer).await
    }

    async fn compact_locked(&self, writer: &mut WalWriter) -> Result<()> {
        let state = self.state.read().await;
        let bytes = bincode::serialize(&*state).context("Failed to encode snapshot")?;
        drop(state);

        let tmp = self.db_path.with_extension("db.tmp");
        std::fs::write(&tmp, &bytes)
            .with_context(|| format!("Failed to write snapshot: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.db_path)
            .with_context(|| format!("Failed to install snapshot: {}", self.db_path.display()))?;

        let wal_path = Self::wal_path(&self.db_path);
        writer.file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&wal_path)
            .with_context(|| format!("Failed to truncate WAL: {}", wal_path.display()))?;
        writer.written = 0;
        debug!(db = %self.db_path.display(), bytes = bytes.len(), "kv engine compacted");
        Ok(())
    }

    /// Compact and release the database.
    pub async fn close(&self) -> Result<()> {
        self.compact().await
    }

    /// Number of entries in a bucket.
    pub async fn bucket_len(&self, bucket: &str) -> usize {
        let state = self.state.read().await;
        state.buckets.get(bucket).map(|b| b.len()).unwrap_or(0)
    }
}

/// Read-only view of the engine state.
pub struct ReadTxn<'a> {
    state: &'a KvState,
}

impl ReadTxn<'_> {
    pub fn get(&self, bucket: &str, key: &[u8]) -> Option<Vec<u8>> {
        self.state.buckets.get(bucket)?.get(key).cloned()
    }

    /// All entries in lexicographic key order.
    pub fn iter_all(&self, bucket: &str) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.state
            .buckets
            .get(bucket)
            .map(|b| b.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Entries whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, bucket: &str, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.state
            .buckets
            .get(bucket)
            .map(|b| {
                b.range(prefix.to_vec()..)
                    .take_while(|(k, _)| k.starts_with(prefix))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self, bucket: &str) -> usize {
        self.state.buckets.get(bucket).map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, bucket: &str) -> bool {
        self.len(bucket) == 0
    }
}

/// Buffered write transaction: reads see the pending overlay, writes are
/// durable only after the enclosing `update` commits.
pub struct WriteTxn<'a> {
    state: &'a KvState,
    pending: Vec<WalOp>,
    /// Pending point writes: Some(value) = put, None = delete.
    overlay: HashMap<(String, Vec<u8>), Option<Vec<u8>>>,
    cleared: HashSet<String>,
    sequences: HashMap<String, u64>,
}

impl WriteTxn<'_> {
    pub fn get(&self, bucket: &str, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(slot) = self.overlay.get(&(bucket.to_string(), key.to_vec())) {
            return slot.clone();
        }
        if self.cleared.contains(bucket) {
            return None;
        }
        self.state.buckets.get(bucket)?.get(key).cloned()
    }

    pub fn put(&mut self, bucket: &str, key: &[u8], value: &[u8]) {
        self.pending.push(WalOp::Put {
            bucket: bucket.to_string(),
            key: key.to_vec(),
            value: value.to_vec(),
        });
        self.overlay
            .insert((bucket.to_string(), key.to_vec()), Some(value.to_vec()));
    }

    pub fn delete(&mut self, bucket: &str, key: &[u8]) {
        self.pending.push(WalOp::Delete {
            bucket: bucket.to_string(),
            key: key.to_vec(),
        });
        self.overlay.insert((bucket.to_string(), key.to_vec()), None);
    }

    pub fn clear_bucket(&mut self, bucket: &str) {
        self.pending.push(WalOp::ClearBucket {
            bucket: bucket.to_string(),
        });
        self.cleared.insert(bucket.to_string());
        self.overlay
            .retain(|(b, _), _| b != bucket);
    }

    /// Mint the next monotonically increasing id for a bucket. Sequences
    /// survive a bucket clear.
    pub fn next_id(&mut self, bucket: &str) -> u64 {
        let current = self
            .sequences
            .get(bucket)
            .copied()
            .or_else(|| self.state.sequences.get(bucket).copied())
            .unwrap_or(0);
        let next = current + 1;
        self.sequences.insert(bucket.to_string(), next);
        self.pending.push(WalOp::Sequence {
            bucket: bucket.to_string(),
            value: next,
        });
        next
    }

    /// Merged prefix scan over committed state and the pending overlay.
    pub fn scan_prefix(&self, bucket: &str, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        if !self.cleared.contains(bucket) {
            if let Some(b) = self.state.buckets.get(bucket) {
                for (k, v) in b.range(prefix.to_vec()..) {
                    if !k.starts_with(prefix) {
                        break;
                    }
                    merged.insert(k.clone(), v.clone());
                }
            }
        }
        for ((b, k), slot) in &self.overlay {
            if b == bucket && k.starts_with(prefix) {
                match slot {
                    Some(v) => {
                        merged.insert(k.clone(), v.clone());
                    }
                    None => {
                        merged.remove(k);
                    }
                }
            }
        }
        merged.into_iter().collect()
    }

    pub fn iter_all(&self, bucket: &str) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.scan_prefix(bucket, b"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_engine(dir: &TempDir) -> KvEngine {
        KvEngine::open(dir.path().join("store.db")).await.unwrap()
    }

    #[tokio::test]
    async fn put_get_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let kv = open_engine(&dir).await;

        kv.update(|tx| {
            tx.put("memories", b"k1", b"v1");
            Ok(())
        })
        .await?;

        let got = kv.view(|tx| Ok(tx.get("memories", b"k1"))).await?;
        assert_eq!(got, Some(b"v1".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn failed_update_has_no_effect() -> Result<()> {
        let dir = TempDir::new()?;
        let kv = open_engine(&dir).await;

        let res: Result<()> = kv
            .update(|tx| {
                tx.put("memories", b"doomed", b"x");
                anyhow::bail!("boom")
            })
            .await;
        assert!(res.is_err());

        let got = kv.view(|tx| Ok(tx.get("memories", b"doomed"))).await?;
        assert_eq!(got, None);
        Ok(())
    }

    #[tokio::test]
    async fn writes_survive_reopen() -> Result<()> {
        let dir = TempDir::new()?;
        {
            let kv = open_engine(&dir).await;
            kv.update(|tx| {
                tx.put("decisions", b"a", b"1");
                tx.put("decisions", b"b", b"2");
                Ok(())
            })
            .await?;
            // No compact: replay must come from the WAL alone.
        }
        let kv = open_engine(&dir).await;
        let all = kv.view(|tx| Ok(tx.iter_all("decisions"))).await?;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, b"a".to_vec());
        Ok(())
    }

    #[tokio::test]
    async fn compact_then_reopen_preserves_state_and_sequences() -> Result<()> {
        let dir = TempDir::new()?;
        {
            let kv = open_engine(&dir).await;
            let id = kv
                .update(|tx| {
                    tx.put("messages", b"m1", b"hello");
                    Ok(tx.next_id("messages"))
                })
                .await?;
            assert_eq!(id, 1);
            kv.close().await?;
        }
        let kv = open_engine(&dir).await;
        let id = kv.update(|tx| Ok(tx.next_id("messages"))).await?;
        assert_eq!(id, 2, "sequence must continue after compaction");
        Ok(())
    }

    #[tokio::test]
    async fn iteration_is_lexicographic() -> Result<()> {
        let dir = TempDir::new()?;
        let kv = open_engine(&dir).await;
        kv.update(|tx| {
            tx.put("b", b"z", b"3");
            tx.put("b", b"a", b"1");
            tx.put("b", b"m", b"2");
            Ok(())
        })
        .await?;
        let keys: Vec<_> = kv
            .view(|tx| Ok(tx.iter_all("b")))
            .await?
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"m".to_vec(), b"z".to_vec()]);
        Ok(())
    }

    #[tokio::test]
    async fn prefix_scan_sees_overlay_inside_txn() -> Result<()> {
        let dir = TempDir::new()?;
        let kv = open_engine(&dir).await;
        kv.update(|tx| {
            tx.put("d", b"topic\x001", b"old");
            Ok(())
        })
        .await?;
        kv.update(|tx| {
            tx.put("d", b"topic\x002", b"new");
            tx.delete("d", b"topic\x001");
            let rows = tx.scan_prefix("d", b"topic\x00");
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].1, b"new".to_vec());
            Ok(())
        })
        .await?;
        Ok(())
    }

    #[tokio::test]
    async fn second_open_is_refused_while_locked() -> Result<()> {
        let dir = TempDir::new()?;
        let _kv = open_engine(&dir).await;
        let second = KvEngine::open(dir.path().join("store.db")).await;
        let err = second.err().expect("second open must fail");
        assert!(matches!(
            crate::error::as_store_error(&err),
            Some(StoreError::Locked(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn clear_bucket_keeps_sequence_monotonic() -> Result<()> {
        let dir = TempDir::new()?;
        let kv = open_engine(&dir).await;
        kv.update(|tx| {
            tx.put("m", b"1", b"x");
            tx.next_id("m");
            tx.next_id("m");
            Ok(())
        })
        .await?;
        let id = kv
            .update(|tx| {
                tx.clear_bucket("m");
                Ok(tx.next_id("m"))
            })
            .await?;
        assert_eq!(id, 3);
        Ok(())
    }
}
