// Findings store
// Analyser-agnostic catalog of static-analysis diagnostics. Analysers are
// plug-in strategies; this store only gives them replace/accept/search
// semantics over the combined engine.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::combined_store::CombinedStore;
use crate::error::StoreError;
use crate::text_index::{IndexDocument, TagFilter};
use crate::types::Severity;

const BUCKET: &str = "findings";

/// One static-analysis diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Stable id: hash of (analyser, file, line, title).
    pub id: String,
    pub analyser: String,
    pub severity: Severity,
    pub category: String,
    pub file_path: String,
    pub line: u32,
    pub end_line: u32,
    pub title: String,
    pub detail: String,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    /// Set when the finding has been accepted (hidden from default listings).
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Finding {
    /// Deterministic identity so reanalysis replaces rather than duplicates.
    pub fn compute_id(analyser: &str, file: &str, line: u32, title: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(analyser.as_bytes());
        hasher.update([0]);
        hasher.update(file.as_bytes());
        hasher.update([0]);
        hasher.update(line.to_be_bytes());
        hasher.update([0]);
        hasher.update(title.as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted_at.is_some()
    }

    fn index_doc(&self) -> IndexDocument {
        IndexDocument {
            id: self.id.clone(),
            text: format!(
                "{} {} {} {}",
                self.title, self.detail, self.category, self.file_path
            ),
            tags: vec![self.analyser.clone(), self.severity.as_str().to_string()],
            category: self.category.clone(),
            created_ms: self.created_at.timestamp_millis(),
        }
    }
}

/// Construction input; the id and timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewFinding {
    pub analyser: String,
    pub severity: Severity,
    pub category: String,
    pub file_path: String,
    pub line: u32,
    pub end_line: u32,
    pub title: String,
    pub detail: String,
    pub metadata: BTreeMap<String, String>,
}

impl NewFinding {
    fn into_finding(self) -> Finding {
        let id = Finding::compute_id(&self.analyser, &self.file_path, self.line, &self.title);
        Finding {
            id,
            analyser: self.analyser,
            severity: self.severity,
            category: self.category,
            file_path: self.file_path,
            line: self.line,
            end_line: self.end_line,
            title: self.title,
            detail: self.detail,
            metadata: self.metadata,
            created_at: Utc::now(),
            accepted_at: None,
        }
    }
}

/// Listing/accept filter. `limit` semantics: positive = capped, zero or
/// negative = unlimited.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FindingFilter {
    pub analyser: Option<String>,
    pub severity: Option<Severity>,
    pub file_path: Option<String>,
    pub category: Option<String>,
    pub include_accepted: bool,
    pub limit: i64,
}

impl FindingFilter {
    fn matches(&self, finding: &Finding) -> bool {
        if !self.include_accepted && finding.is_accepted() {
            return false;
        }
        if let Some(analyser) = &self.analyser {
            if &finding.analyser != analyser {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if finding.severity != severity {
                return false;
            }
        }
        if let Some(file) = &self.file_path {
            if &finding.file_path != file {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if &finding.category != category {
                return false;
            }
        }
        true
    }
}

/// Aggregate counts for `findings stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindingStats {
    pub total: usize,
    pub accepted: usize,
    pub by_analyser: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
}

/// Typed facade over the combined store for findings.
pub struct FindingStore {
    store: Arc<CombinedStore>,
}

impl FindingStore {
    pub fn new(store: Arc<CombinedStore>) -> Self {
        Self { store }
    }

    fn decode(bytes: &[u8]) -> Result<Finding> {
        bincode::deserialize(bytes)
            .map_err(|e| anyhow::Error::new(StoreError::StoreCorrupt(format!("finding row: {e}"))))
    }

    /// Insert (or overwrite) a single finding.
    pub async fn add(&self, new: NewFinding) -> Result<Finding> {
        let finding = new.into_finding();
        let bytes = bincode::serialize(&finding).context("Failed to encode finding")?;
        self.store
            .put_indexed(BUCKET, finding.id.as_bytes(), &bytes, finding.index_doc())
            .await?;
        Ok(finding)
    }

    async fn load_all(&self) -> Result<Vec<Finding>> {
        let rows = self.store.kv().view(|tx| Ok(tx.iter_all(BUCKET))).await?;
        rows.iter().map(|(_, bytes)| Self::decode(bytes)).collect()
    }

    /// Atomic clear-then-insert of one analyser's findings.
    pub async fn replace_for_analyser(
        &self,
        analyser: &str,
        findings: Vec<NewFinding>,
    ) -> Result<usize> {
        self.replace_where(|f| f.analyser == analyser, findings).await
    }

    /// Atomic clear-then-insert scoped to one analyser and one file.
    pub async fn replace_for_analyser_and_file(
        &self,
        analyser: &str,
        file_path: &str,
        findings: Vec<NewFinding>,
    ) -> Result<usize> {
        self.replace_where(
            |f| f.analyser == analyser && f.file_path == file_path,
            findings,
        )
        .await
    }

    async fn replace_where(
        &self,
        stale: impl Fn(&Finding) -> bool,
        findings: Vec<NewFinding>,
    ) -> Result<usize> {
        let incoming: Vec<Finding> = findings.into_iter().map(NewFinding::into_finding).collect();
        let removed_ids = self
            .store
            .kv()
            .update(|tx| {
                let mut removed = Vec::new();
                for (key, bytes) in tx.iter_all(BUCKET) {
                    if let Ok(existing) = Self::decode(&bytes) {
                        if stale(&existing) {
                            tx.delete(BUCKET, &key);
                            removed.push(existing.id);
                        }
                    }
                }
                for finding in &incoming {
                    let bytes =
                        bincode::serialize(finding).context("Failed to encode finding")?;
                    tx.put(BUCKET, finding.id.as_bytes(), &bytes);
                }
                Ok(removed)
            })
            .await?;

        // The index follows best-effort; the KV transaction above is the
        // atomicity boundary.
        for id in &removed_ids {
            self.store.index().remove(id).await?;
        }
        for finding in &incoming {
            self.store.index().add(&finding.index_doc()).await?;
        }
        Ok(incoming.len())
    }

    /// List findings matching the filter, newest first.
    pub async fn list(&self, filter: &FindingFilter) -> Result<Vec<Finding>> {
        let mut findings: Vec<Finding> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|f| filter.matches(f))
            .collect();
        findings.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        if filter.limit > 0 && findings.len() > filter.limit as usize {
            findings.truncate(filter.limit as usize);
        }
        Ok(findings)
    }

    /// Scored full-text search over title/detail/category/path.
    pub async fn search(
        &self,
        query: &str,
        filter: &FindingFilter,
    ) -> Result<Vec<(Finding, f32)>> {
        let limit = if filter.limit > 0 { filter.limit as usize } else { 0 };
        let hits: Vec<(Finding, f32)> = self
            .store
            .search_hydrated(
                BUCKET,
                query,
                0.0,
                &TagFilter::IncludeAll,
                // Over-fetch so post-filtering does not starve the cap.
                if limit > 0 { limit * 4 } else { 0 },
                |hit| hit.id.clone().into_bytes(),
                Self::decode,
            )
            .await?;
        let mut out: Vec<(Finding, f32)> = hits
            .into_iter()
            .filter(|(f, _)| filter.matches(f))
            .collect();
        if limit > 0 && out.len() > limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    /// Aggregate counts (all findings, accepted included).
    pub async fn stats(&self) -> Result<FindingStats> {
        let mut stats = FindingStats::default();
        for finding in self.load_all().await? {
            stats.total += 1;
            if finding.is_accepted() {
                stats.accepted += 1;
            }
            *stats.by_analyser.entry(finding.analyser.clone()).or_insert(0) += 1;
            *stats
                .by_severity
                .entry(finding.severity.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }

    /// Accept findings by id. Unknown ids are reported, not fatal.
    pub async fn accept(&self, ids: &[String]) -> Result<usize> {
        let now = Utc::now();
        let accepted = self
            .store
            .kv()
            .update(|tx| {
                let mut accepted = 0usize;
                for id in ids {
                    if let Some(bytes) = tx.get(BUCKET, id.as_bytes()) {
                        let mut finding = Self::decode(&bytes)?;
                        if finding.accepted_at.is_none() {
                            finding.accepted_at = Some(now);
                            let bytes = bincode::serialize(&finding)
                                .context("Failed to encode finding")?;
                            tx.put(BUCKET, id.as_bytes(), &bytes);
                            accepted += 1;
                        }
                    }
                }
                Ok(accepted)
            })
            .await?;
        Ok(accepted)
    }

    /// Accept every finding matching the filter. Returns the number flipped.
    pub async fn accept_by_filter(&self, filter: &FindingFilter) -> Result<usize> {
        let ids: Vec<String> = self
            .list(filter)
            .await?
            .into_iter()
            .map(|f| f.id)
            .collect();
        self.accept(&ids).await
    }

    /// Remove every finding. Returns the number removed.
    pub async fn clear(&self) -> Result<usize> {
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

    /// Remove one analyser's findings. Returns the number removed.
    pub async fn clear_analyser(&self, analyser: &str) -> Result<usize> {
        let count = self
            .list(&FindingFilter {
                analyser: Some(analyser.to_string()),
                include_accepted: true,
                ..Default::default()
            })
            .await?
            .len();
        self.replace_for_analyser(analyser, Vec::new()).await?;
        Ok(count)
    }

    /// Rebuild the search index from KV (repair path).
    pub async fn sync_search_index(&self) -> Result<usize> {
        self.store
            .sync_search_index(BUCKET, |_, value| {
                let finding = Self::decode(value)?;
                Ok(Some(finding.index_doc()))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> FindingStore {
        let combined = CombinedStore::open(
            dir.path().join("findings.db"),
            dir.path().join("search.idx"),
        )
        .await
        .unwrap();
        FindingStore::new(Arc::new(combined))
    }

    fn finding(analyser: &str, file: &str, line: u32, title: &str) -> NewFinding {
        NewFinding {
            analyser: analyser.to_string(),
            severity: Severity::Warning,
            category: "maintainability".to_string(),
            file_path: file.to_string(),
            line,
            end_line: line,
            title: title.to_string(),
            detail: format!("{title} detail"),
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn identity_is_stable_across_reanalysis() -> Result<()> {
        let dir = TempDir::new()?;
        let findings = store(&dir).await;
        let first = findings.add(finding("dup", "src/a.rs", 10, "clone")).await?;
        let second = findings.add(finding("dup", "src/a.rs", 10, "clone")).await?;
        assert_eq!(first.id, second.id);
        assert_eq!(findings.list(&FindingFilter::default()).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn replace_for_analyser_is_scoped() -> Result<()> {
        let dir = TempDir::new()?;
        let findings = store(&dir).await;
        findings.add(finding("dup", "a.rs", 1, "one")).await?;
        findings.add(finding("complexity", "a.rs", 2, "two")).await?;

        findings
            .replace_for_analyser("dup", vec![finding("dup", "b.rs", 3, "three")])
            .await?;

        let all = findings.list(&FindingFilter::default()).await?;
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|f| f.analyser == "complexity"));
        assert!(all.iter().any(|f| f.file_path == "b.rs"));
        Ok(())
    }

    #[tokio::test]
    async fn accepted_findings_hide_by_default() -> Result<()> {
        let dir = TempDir::new()?;
        let findings = store(&dir).await;
        let f = findings.add(finding("secrets", "a.rs", 1, "token")).await?;

        assert_eq!(findings.accept(&[f.id.clone()]).await?, 1);
        // Accepting twice flips nothing further.
        assert_eq!(findings.accept(&[f.id.clone()]).await?, 0);

        assert!(findings.list(&FindingFilter::default()).await?.is_empty());
        let with_accepted = findings
            .list(&FindingFilter {
                include_accepted: true,
                ..Default::default()
            })
            .await?;
        assert_eq!(with_accepted.len(), 1);
        assert!(with_accepted[0].is_accepted());
        Ok(())
    }

    #[tokio::test]
    async fn stats_break_down_by_analyser_and_severity() -> Result<()> {
        let dir = TempDir::new()?;
        let findings = store(&dir).await;
        findings.add(finding("dup", "a.rs", 1, "one")).await?;
        findings.add(finding("dup", "a.rs", 2, "two")).await?;
        let mut critical = finding("secrets", "b.rs", 3, "leak");
        critical.severity = Severity::Critical;
        findings.add(critical).await?;

        let stats = findings.stats().await?;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_analyser.get("dup"), Some(&2));
        assert_eq!(stats.by_severity.get("critical"), Some(&1));
        Ok(())
    }

    #[tokio::test]
    async fn search_matches_title_and_detail() -> Result<()> {
        let dir = TempDir::new()?;
        let findings = store(&dir).await;
        findings
            .add(finding("secrets", "config.rs", 8, "hardcoded credential"))
            .await?;

        let hits = findings.search("credential", &FindingFilter::default()).await?;
        assert_eq!(hits.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn clear_analyser_counts_removals() -> Result<()> {
        let dir = TempDir::new()?;
        let findings = store(&dir).await;
        findings.add(finding("dup", "a.rs", 1, "one")).await?;
        findings.add(finding("dup", "a.rs", 2, "two")).await?;
        findings.add(finding("other", "a.rs", 3, "keep")).await?;

        assert_eq!(findings.clear_analyser("dup").await?, 2);
        assert_eq!(findings.list(&FindingFilter::default()).await?.len(), 1);
        Ok(())
    }
}
