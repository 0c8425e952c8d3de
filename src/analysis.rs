// Analyser pipeline glue
// The findings store is analyser-agnostic; this module is the seam the
// analyser plug-ins (secrets, clones, coupling, complexity, ...) implement.
// Each run replaces that analyser's catalog atomically.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::finding_store::{FindingStore, NewFinding};

/// One static-analysis strategy.
#[async_trait]
pub trait Analyser: Send + Sync {
    /// Stable name; findings are replaced per analyser under this key.
    fn name(&self) -> &'static str;

    /// Scan the project and emit findings. `thresholds` is this analyser's
    /// entry from the config file, if any.
    async fn analyse(
        &self,
        root: &Path,
        thresholds: Option<&serde_json::Value>,
    ) -> Result<Vec<NewFinding>>;
}

/// Registered analyser strategies.
#[derive(Default)]
pub struct AnalyserRegistry {
    analysers: Vec<Arc<dyn Analyser>>,
}

impl AnalyserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, analyser: Arc<dyn Analyser>) {
        self.analysers.push(analyser);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.analysers.iter().map(|a| a.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.analysers.is_empty()
    }

    /// Run every registered analyser (or only `only`, when given) and
    /// replace each one's findings. An analyser failure is local: it is
    /// logged, counted, and the batch continues.
    pub async fn run(
        &self,
        root: &Path,
        thresholds: &BTreeMap<String, serde_json::Value>,
        store: &FindingStore,
        only: Option<&str>,
    ) -> Result<AnalysisRunReport> {
        let mut report = AnalysisRunReport::default();
        for analyser in &self.analysers {
            let name = analyser.name();
            if only.map_or(false, |o| o != name) {
                continue;
            }
            match analyser.analyse(root, thresholds.get(name)).await {
                Ok(findings) => {
                    let count = store.replace_for_analyser(name, findings).await?;
                    info!(analyser = name, findings = count, "analysis complete");
                    report.findings += count;
                    report.analysers_run += 1;
                }
                Err(e) => {
                    warn!(analyser = name, error = %e, "analyser failed, continuing");
                    report.analysers_failed += 1;
                }
            }
        }
        Ok(report)
    }
}

/// Counters for one `findings run`.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct AnalysisRunReport {
    pub analysers_run: usize,
    pub analysers_failed: usize,
    pub findings: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combined_store::CombinedStore;
    use crate::types::Severity;
    use tempfile::TempDir;

    struct FixedAnalyser {
        name: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl Analyser for FixedAnalyser {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn analyse(
            &self,
            _root: &Path,
            _thresholds: Option<&serde_json::Value>,
        ) -> Result<Vec<NewFinding>> {
            if self.fail {
                anyhow::bail!("scanner crashed");
            }
            Ok(vec![NewFinding {
                analyser: self.name.to_string(),
                severity: Severity::Info,
                category: "style".to_string(),
                file_path: "src/lib.rs".to_string(),
                line: 1,
                end_line: 1,
                title: format!("{} says hi", self.name),
                detail: String::new(),
                metadata: BTreeMap::new(),
            }])
        }
    }

    #[tokio::test]
    async fn failures_are_local_to_one_analyser() -> Result<()> {
        let dir = TempDir::new()?;
        let store = FindingStore::new(Arc::new(
            CombinedStore::open(dir.path().join("findings.db"), dir.path().join("search.idx"))
                .await?,
        ));

        let mut registry = AnalyserRegistry::new();
        registry.register(Arc::new(FixedAnalyser {
            name: "ok",
            fail: false,
        }));
        registry.register(Arc::new(FixedAnalyser {
            name: "broken",
            fail: true,
        }));

        let report = registry
            .run(dir.path(), &BTreeMap::new(), &store, None)
            .await?;
        assert_eq!(report.analysers_run, 1);
        assert_eq!(report.analysers_failed, 1);
        assert_eq!(report.findings, 1);
        Ok(())
    }
}
