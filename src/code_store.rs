// Code store
// Persistent storage for extracted symbols, references and per-file
// freshness info. Symbols are replaced wholesale when their file is
// re-parsed; FileInfo.mod_time is the staleness oracle.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::combined_store::CombinedStore;
use crate::error::StoreError;
use crate::parsing::{ParsedFile, RefKind, SupportedLanguage, SymbolKind};
use crate::text_index::{IndexDocument, TagFilter};

const SYMBOLS: &str = "symbols";
const REFS: &str = "refs";
const FILES: &str = "files";

/// One stored symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRecord {
    /// Stable hash of (file_path, kind, name, start_line).
    pub id: String,
    pub name: String,
    pub kind: SymbolKind,
    pub signature: String,
    pub doc_comment: Option<String>,
    /// Project-relative path.
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub body_start_line: usize,
    pub body_end_line: usize,
    pub language: SupportedLanguage,
}

impl SymbolRecord {
    pub fn compute_id(file_path: &str, kind: SymbolKind, name: &str, start_line: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(file_path.as_bytes());
        hasher.update([0]);
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(name.as_bytes());
        hasher.update([0]);
        hasher.update((start_line as u64).to_be_bytes());
        hex::encode(&hasher.finalize()[..8])
    }

    fn index_doc(&self) -> IndexDocument {
        let mut text = format!("{} {}", self.name, self.signature);
        if let Some(doc) = &self.doc_comment {
            text.push(' ');
            text.push_str(doc);
        }
        IndexDocument {
            id: self.id.clone(),
            text,
            tags: vec![
                self.language.as_str().to_string(),
                self.kind.as_str().to_string(),
            ],
            category: self.kind.as_str().to_string(),
            created_ms: 0,
        }
    }
}

/// One stored call site or type use, scoped per file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub symbol_name: String,
    pub kind: RefKind,
    pub file_path: String,
    pub line: usize,
    pub column: usize,
    pub context: String,
}

/// Per-file freshness cache: symbols reflect current source iff
/// `mod_time_ms` equals the filesystem mtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub mod_time_ms: i64,
    pub symbol_ids: Vec<String>,
}

/// Aggregate counts for `code stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeStats {
    pub files: usize,
    pub symbols: usize,
    pub references: usize,
    pub by_language: BTreeMap<String, usize>,
    pub by_kind: BTreeMap<String, usize>,
}

/// Typed facade over the combined store for the code index.
pub struct CodeStore {
    store: Arc<CombinedStore>,
}

impl CodeStore {
    pub fn new(store: Arc<CombinedStore>) -> Self {
        Self { store }
    }

    fn ref_key(path: &str, seq: u32) -> Vec<u8> {
        let mut key = path.as_bytes().to_vec();
        key.push(0);
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    fn ref_prefix(path: &str) -> Vec<u8> {
        let mut prefix = path.as_bytes().to_vec();
        prefix.push(0);
        prefix
    }

    fn decode_symbol(bytes: &[u8]) -> Result<SymbolRecord> {
        bincode::deserialize(bytes)
            .map_err(|e| anyhow::Error::new(StoreError::StoreCorrupt(format!("symbol row: {e}"))))
    }

    fn decode_ref(bytes: &[u8]) -> Result<ReferenceRecord> {
        bincode::deserialize(bytes).map_err(|e| {
            anyhow::Error::new(StoreError::StoreCorrupt(format!("reference row: {e}")))
        })
    }

    fn decode_file(bytes: &[u8]) -> Result<FileInfo> {
        bincode::deserialize(bytes).map_err(|e| {
            anyhow::Error::new(StoreError::StoreCorrupt(format!("file info row: {e}")))
        })
    }

    /// Replace everything known about one file in a single transaction:
    /// delete the previous symbols and references, insert the new ones,
    /// upsert the freshness record. Returns the new symbol count.
    pub async fn replace_file(
        &self,
        path: &str,
        mod_time_ms: i64,
        parsed: &ParsedFile,
    ) -> Result<usize> {
        let mut records = Vec::with_capacity(parsed.symbols.len());
        for symbol in &parsed.symbols {
            records.push(SymbolRecord {
                id: SymbolRecord::compute_id(path, symbol.kind, &symbol.name, symbol.start_line),
                name: symbol.name.clone(),
                kind: symbol.kind,
                signature: symbol.signature.clone(),
                doc_comment: symbol.doc_comment.clone(),
                file_path: path.to_string(),
                start_line: symbol.start_line,
                end_line: symbol.end_line,
                body_start_line: symbol.body_start_line,
                body_end_line: symbol.body_end_line,
                language: parsed.language,
            });
        }

        let old_ids = self
            .store
            .kv()
            .update(|tx| {
                let old_ids = match tx.get(FILES, path.as_bytes()) {
                    Some(bytes) => Self::decode_file(&bytes)?.symbol_ids,
                    None => Vec::new(),
                };
                for id in &old_ids {
                    tx.delete(SYMBOLS, id.as_bytes());
                }
                for (key, _) in tx.scan_prefix(REFS, &Self::ref_prefix(path)) {
                    tx.delete(REFS, &key);
                }

                for record in &records {
                    let bytes = bincode::serialize(record).context("Failed to encode symbol")?;
                    tx.put(SYMBOLS, record.id.as_bytes(), &bytes);
                }
                for (seq, reference) in parsed.references.iter().enumerate() {
                    let record = ReferenceRecord {
                        symbol_name: reference.symbol_name.clone(),
                        kind: reference.kind,
                        file_path: path.to_string(),
                        line: reference.line,
                        column: reference.column,
                        context: reference.context.clone(),
                    };
                    let bytes =
                        bincode::serialize(&record).context("Failed to encode reference")?;
                    tx.put(REFS, &Self::ref_key(path, seq as u32), &bytes);
                }

                let info = FileInfo {
                    path: path.to_string(),
                    mod_time_ms,
                    symbol_ids: records.iter().map(|r| r.id.clone()).collect(),
                };
                let bytes = bincode::serialize(&info).context("Failed to encode file info")?;
                tx.put(FILES, path.as_bytes(), &bytes);
                Ok(old_ids)
            })
            .await?;

        // Index follows the committed transaction.
        for id in &old_ids {
            self.store.index().remove(id).await?;
        }
        for record in &records {
            self.store.index().add(&record.index_doc()).await?;
        }
        Ok(records.len())
    }

    /// Remove a file that disappeared from the filesystem.
    pub async fn remove_file(&self, path: &str) -> Result<usize> {
        let old_ids = self
            .store
            .kv()
            .update(|tx| {
                let old_ids = match tx.get(FILES, path.as_bytes()) {
                    Some(bytes) => Self::decode_file(&bytes)?.symbol_ids,
                    None => Vec::new(),
                };
                for id in &old_ids {
                    tx.delete(SYMBOLS, id.as_bytes());
                }
                for (key, _) in tx.scan_prefix(REFS, &Self::ref_prefix(path)) {
                    tx.delete(REFS, &key);
                }
                tx.delete(FILES, path.as_bytes());
                Ok(old_ids)
            })
            .await?;
        for id in &old_ids {
            self.store.index().remove(id).await?;
        }
        Ok(old_ids.len())
    }

    pub async fn get_file_info(&self, path: &str) -> Result<Option<FileInfo>> {
        let row = self
            .store
            .kv()
            .view(|tx| Ok(tx.get(FILES, path.as_bytes())))
            .await?;
        row.map(|bytes| Self::decode_file(&bytes)).transpose()
    }

    /// Symbols for one file, in line order.
    pub async fn get_file_symbols(&self, path: &str) -> Result<Vec<SymbolRecord>> {
        let info = match self.get_file_info(path).await? {
            Some(info) => info,
            None => return Ok(Vec::new()),
        };
        let rows = self
            .store
            .kv()
            .view(|tx| {
                Ok(info
                    .symbol_ids
                    .iter()
                    .filter_map(|id| tx.get(SYMBOLS, id.as_bytes()))
                    .collect::<Vec<_>>())
            })
            .await?;
        let mut symbols = rows
            .iter()
            .map(|bytes| Self::decode_symbol(bytes))
            .collect::<Result<Vec<_>>>()?;
        symbols.sort_by_key(|s| s.start_line);
        Ok(symbols)
    }

    /// All indexed files.
    pub async fn list_files(&self) -> Result<Vec<FileInfo>> {
        let rows = self.store.kv().view(|tx| Ok(tx.iter_all(FILES))).await?;
        rows.iter().map(|(_, bytes)| Self::decode_file(bytes)).collect()
    }

    /// Every symbol, optionally restricted by kind. Ordered by (path, line).
    pub async fn list_symbols(&self, kind: Option<SymbolKind>) -> Result<Vec<SymbolRecord>> {
        let rows = self.store.kv().view(|tx| Ok(tx.iter_all(SYMBOLS))).await?;
        let mut symbols = Vec::new();
        for (_, bytes) in rows {
            let symbol = Self::decode_symbol(&bytes)?;
            if kind.map_or(true, |k| symbol.kind == k) {
                symbols.push(symbol);
            }
        }
        symbols.sort_by(|a, b| {
            a.file_path
                .cmp(&b.file_path)
                .then_with(|| a.start_line.cmp(&b.start_line))
        });
        Ok(symbols)
    }

    /// Scored search over names, signatures and doc comments.
    pub async fn search_symbols(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(SymbolRecord, f32)>> {
        self.store
            .search_hydrated(
                SYMBOLS,
                query,
                0.0,
                &TagFilter::IncludeAll,
                limit,
                |hit| hit.id.clone().into_bytes(),
                Self::decode_symbol,
            )
            .await
    }

    /// Call sites and type uses of a symbol name, across all files.
    pub async fn references(&self, symbol_name: &str) -> Result<Vec<ReferenceRecord>> {
        let rows = self.store.kv().view(|tx| Ok(tx.iter_all(REFS))).await?;
        let mut refs = Vec::new();
        for (_, bytes) in rows {
            let record = Self::decode_ref(&bytes)?;
            if record.symbol_name == symbol_name {
                refs.push(record);
            }
        }
        refs.sort_by(|a, b| {
            a.file_path
                .cmp(&b.file_path)
                .then_with(|| a.line.cmp(&b.line))
        });
        Ok(refs)
    }

    pub async fn stats(&self) -> Result<CodeStats> {
        let mut stats = CodeStats::default();
        stats.files = self.store.kv().bucket_len(FILES).await;
        stats.references = self.store.kv().bucket_len(REFS).await;
        let rows = self.store.kv().view(|tx| Ok(tx.iter_all(SYMBOLS))).await?;
        for (_, bytes) in rows {
            let symbol = Self::decode_symbol(&bytes)?;
            stats.symbols += 1;
            *stats
                .by_language
                .entry(symbol.language.as_str().to_string())
                .or_insert(0) += 1;
            *stats
                .by_kind
                .entry(symbol.kind.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }

    /// Wipe the whole code index.
    pub async fn clear(&self) -> Result<()> {
        self.store
            .kv()
            .update(|tx| {
                tx.clear_bucket(SYMBOLS);
                tx.clear_bucket(REFS);
                tx.clear_bucket(FILES);
                Ok(())
            })
            .await?;
        self.store.index().clear().await
    }

    /// Rebuild the symbol search index from KV (repair path).
    pub async fn sync_search_index(&self) -> Result<usize> {
        self.store
            .sync_search_index(SYMBOLS, |_, value| {
                let symbol = Self::decode_symbol(value)?;
                Ok(Some(symbol.index_doc()))
            })
            .await
    }

    /// Close underlying engines in dependency order.
    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::{ParsedReference, ParsedSymbol};
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> CodeStore {
        let combined = CombinedStore::open(
            dir.path().join("index.db"),
            dir.path().join("search.idx"),
        )
        .await
        .unwrap();
        CodeStore::new(Arc::new(combined))
    }

    fn parsed(symbols: Vec<ParsedSymbol>, references: Vec<ParsedReference>) -> ParsedFile {
        ParsedFile {
            language: SupportedLanguage::Rust,
            symbols,
            references,
        }
    }

    fn symbol(name: &str, start: usize) -> ParsedSymbol {
        ParsedSymbol {
            name: name.to_string(),
            kind: SymbolKind::Function,
            signature: format!("fn {name}()"),
            doc_comment: None,
            start_line: start,
            end_line: start + 3,
            body_start_line: start,
            body_end_line: start + 3,
        }
    }

    fn reference(name: &str, line: usize) -> ParsedReference {
        ParsedReference {
            symbol_name: name.to_string(),
            kind: RefKind::Call,
            line,
            column: 4,
            context: format!("{name}()"),
        }
    }

    #[tokio::test]
    async fn replace_file_swaps_symbols_wholesale() -> Result<()> {
        let dir = TempDir::new()?;
        let code = store(&dir).await;

        code.replace_file(
            "src/a.rs",
            100,
            &parsed(vec![symbol("old_fn", 1)], vec![reference("x", 2)]),
        )
        .await?;
        code.replace_file(
            "src/a.rs",
            200,
            &parsed(vec![symbol("new_fn", 1)], vec![reference("y", 2)]),
        )
        .await?;

        let symbols = code.get_file_symbols("src/a.rs").await?;
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "new_fn");

        assert!(code.references("x").await?.is_empty());
        assert_eq!(code.references("y").await?.len(), 1);

        let info = code.get_file_info("src/a.rs").await?.unwrap();
        assert_eq!(info.mod_time_ms, 200);
        assert_eq!(info.symbol_ids.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn remove_file_prunes_everything() -> Result<()> {
        let dir = TempDir::new()?;
        let code = store(&dir).await;
        code.replace_file(
            "src/gone.rs",
            1,
            &parsed(vec![symbol("f", 1)], vec![reference("g", 2)]),
        )
        .await?;

        assert_eq!(code.remove_file("src/gone.rs").await?, 1);
        assert!(code.get_file_symbols("src/gone.rs").await?.is_empty());
        assert!(code.get_file_info("src/gone.rs").await?.is_none());
        assert!(code.references("g").await?.is_empty());
        assert!(code.search_symbols("f", 0).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn search_finds_by_name_fragment() -> Result<()> {
        let dir = TempDir::new()?;
        let code = store(&dir).await;
        code.replace_file(
            "src/store.rs",
            1,
            &parsed(vec![symbol("claim_task", 1), symbol("release", 8)], vec![]),
        )
        .await?;

        let hits = code.search_symbols("claim", 0).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.name, "claim_task");
        Ok(())
    }

    #[tokio::test]
    async fn stats_count_by_language_and_kind() -> Result<()> {
        let dir = TempDir::new()?;
        let code = store(&dir).await;
        code.replace_file(
            "src/a.rs",
            1,
            &parsed(vec![symbol("a", 1), symbol("b", 5)], vec![reference("c", 2)]),
        )
        .await?;

        let stats = code.stats().await?;
        assert_eq!(stats.files, 1);
        assert_eq!(stats.symbols, 2);
        assert_eq!(stats.references, 1);
        assert_eq!(stats.by_language.get("rust"), Some(&2));
        assert_eq!(stats.by_kind.get("function"), Some(&2));
        Ok(())
    }
}
