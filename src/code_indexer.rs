// Code indexer
// Walks a source tree, parses supported files and feeds the code store
// incrementally. FileInfo.mod_time short-circuits unchanged files; parse
// failures are always local (counted, never fatal).

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

use crate::code_store::{CodeStore, SymbolRecord};
use crate::parsing::{CodeParser, SupportedLanguage};

/// Directory names never descended into: package/build output, VCS innards,
/// virtualenvs and the tool's own state directory.
const STOP_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "dist",
    "build",
    "vendor",
    ".git",
    ".hg",
    ".svn",
    "venv",
    ".venv",
    "__pycache__",
    ".aide",
    ".idea",
    ".vscode",
];

/// Counters for one indexing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndexStats {
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub symbols_indexed: usize,
}

/// Patterns from the project's `.aideignore`: one `*`-wildcard per line,
/// `#` comments, matched against the project-relative path and the file
/// name.
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    patterns: Vec<String>,
}

impl IgnoreList {
    pub fn load(path: &Path) -> Self {
        let patterns = std::fs::read_to_string(path)
            .map(|content| {
                content
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self { patterns }
    }

    pub fn matches(&self, relative_path: &str) -> bool {
        let name = relative_path.rsplit('/').next().unwrap_or(relative_path);
        self.patterns
            .iter()
            .any(|p| wildcard_match(relative_path, p) || wildcard_match(name, p))
    }
}

/// `*`-wildcard match, anchored at both ends.
fn wildcard_match(text: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 && !pattern.starts_with('*') {
            if !text.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if i == parts.len() - 1 && !pattern.ends_with('*') {
            if !text[pos..].ends_with(part) {
                return false;
            }
        } else if let Some(found) = text[pos..].find(part) {
            pos += found + part.len();
        } else {
            return false;
        }
    }
    true
}

fn mod_time_ms(path: &Path) -> Result<i64> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    let modified = metadata
        .modified()
        .with_context(|| format!("No mtime for {}", path.display()))?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0))
}

/// Parser-driven incremental indexer over one project root.
pub struct CodeIndexer {
    store: Arc<CodeStore>,
    root: PathBuf,
    ignore: IgnoreList,
}

impl CodeIndexer {
    pub fn new(store: Arc<CodeStore>, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let ignore = IgnoreList::load(&root.join(".aideignore"));
        Self { store, root, ignore }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Index the whole tree. `progress` is called with (relative path, new
    /// symbol count) after every parsed file.
    pub async fn index_tree(
        &self,
        force: bool,
        progress: &mut (dyn FnMut(&str, usize) + Send),
    ) -> Result<IndexStats> {
        let mut parser = CodeParser::new()?;
        let mut stats = IndexStats::default();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "unreadable directory, skipping");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().into_owned();
                if path.is_dir() {
                    if STOP_DIRS.contains(&name.as_str()) {
                        continue;
                    }
                    if self.ignore.matches(&self.relative(&path)) {
                        continue;
                    }
                    pending.push(path);
                    continue;
                }
                let Some(language) = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .and_then(SupportedLanguage::from_extension)
                else {
                    continue;
                };
                let relative = self.relative(&path);
                if self.ignore.matches(&relative) {
                    continue;
                }
                match self
                    .index_one(&mut parser, &path, &relative, language, force)
                    .await
                {
                    Ok(Some(count)) => {
                        stats.files_indexed += 1;
                        stats.symbols_indexed += count;
                        progress(&relative, count);
                    }
                    Ok(None) => stats.files_skipped += 1,
                    Err(e) => {
                        debug!(file = %relative, error = %e, "parse failed, skipping file");
                        stats.files_skipped += 1;
                    }
                }
            }
        }

        self.prune_deleted().await?;
        Ok(stats)
    }

    /// Index one file; `Ok(None)` means it was fresh and skipped.
    async fn index_one(
        &self,
        parser: &mut CodeParser,
        path: &Path,
        relative: &str,
        language: SupportedLanguage,
        force: bool,
    ) -> Result<Option<usize>> {
        let mtime = mod_time_ms(path)?;
        if !force {
            if let Some(info) = self.store.get_file_info(relative).await? {
                if info.mod_time_ms == mtime {
                    return Ok(None);
                }
            }
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let parsed = parser.parse_content(&content, language)?;
        let count = self.store.replace_file(relative, mtime, &parsed).await?;
        Ok(Some(count))
    }

    /// Index a single file by absolute or project-relative path (watcher
    /// entry point).
    pub async fn index_path(&self, path: &Path, force: bool) -> Result<usize> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let relative = self.relative(&absolute);
        if !absolute.exists() {
            return self.store.remove_file(&relative).await;
        }
        let Some(language) = absolute
            .extension()
            .and_then(|e| e.to_str())
            .and_then(SupportedLanguage::from_extension)
        else {
            return Ok(0);
        };
        let mut parser = CodeParser::new()?;
        Ok(self
            .index_one(&mut parser, &absolute, &relative, language, force)
            .await?
            .unwrap_or(0))
    }

    /// Drop store entries for files that no longer exist on disk.
    pub async fn prune_deleted(&self) -> Result<usize> {
        let mut pruned = 0usize;
        for info in self.store.list_files().await? {
            if !self.root.join(&info.path).exists() {
                self.store.remove_file(&info.path).await?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    /// On-demand freshness for interactive symbol listings: when the stored
    /// mtime differs from disk, reparse live and return those symbols
    /// without persisting anything.
    pub async fn fresh_file_symbols(&self, relative: &str) -> Result<Vec<SymbolRecord>> {
        let absolute = self.root.join(relative);
        let stored = self.store.get_file_symbols(relative).await?;
        if !absolute.exists() {
            return Ok(stored);
        }
        let disk_mtime = mod_time_ms(&absolute)?;
        let fresh_in_store = self
            .store
            .get_file_info(relative)
            .await?
            .map(|info| info.mod_time_ms == disk_mtime)
            .unwrap_or(false);
        if fresh_in_store {
            return Ok(stored);
        }

        let Some(language) = absolute
            .extension()
            .and_then(|e| e.to_str())
            .and_then(SupportedLanguage::from_extension)
        else {
            return Ok(stored);
        };
        let content = std::fs::read_to_string(&absolute)
            .with_context(|| format!("Failed to read {}", absolute.display()))?;
        let parsed = CodeParser::new()?.parse_content(&content, language)?;
        Ok(parsed
            .symbols
            .iter()
            .map(|s| SymbolRecord {
                id: SymbolRecord::compute_id(relative, s.kind, &s.name, s.start_line),
                name: s.name.clone(),
                kind: s.kind,
                signature: s.signature.clone(),
                doc_comment: s.doc_comment.clone(),
                file_path: relative.to_string(),
                start_line: s.start_line,
                end_line: s.end_line,
                body_start_line: s.body_start_line,
                body_end_line: s.body_end_line,
                language: parsed.language,
            })
            .collect())
    }
}


#[cfg(all(test, feature = "tree-sitter-parsing"))]
mod parsing_tests {
    use super::*;
    use crate::combined_store::CombinedStore;
    use tempfile::TempDir;

    async fn indexer(project: &Path, state: &TempDir) -> CodeIndexer {
        let combined = CombinedStore::open(
            state.path().join("index.db"),
            state.path().join("search.idx"),
        )
        .await
        .unwrap();
        CodeIndexer::new(Arc::new(CodeStore::new(Arc::new(combined))), project)
    }

    #[tokio::test]
    async fn index_then_reindex_skips_fresh_files() -> Result<()> {
        let project = TempDir::new()?;
        let state = TempDir::new()?;
        std::fs::create_dir_all(project.path().join("src"))?;
        std::fs::write(
            project.path().join("src/lib.rs"),
            "pub fn alpha() -> u8 {\n    1\n}\n",
        )?;

        let indexer = indexer(project.path(), &state).await;
        let mut seen = Vec::new();
        let stats = indexer
            .index_tree(false, &mut |path, count| seen.push((path.to_string(), count)))
            .await?;
        assert_eq!(stats.files_indexed, 1);
        assert_eq!(stats.files_skipped, 0);
        assert_eq!(seen, vec![("src/lib.rs".to_string(), 1)]);

        // No edits: the second run indexes nothing and skips one file.
        let stats = indexer.index_tree(false, &mut |_, _| {}).await?;
        assert_eq!(stats.files_indexed, 0);
        assert_eq!(stats.files_skipped, 1);
        Ok(())
    }

    #[tokio::test]
    async fn stop_dirs_are_never_descended() -> Result<()> {
        let project = TempDir::new()?;
        let state = TempDir::new()?;
        std::fs::create_dir_all(project.path().join("node_modules/pkg"))?;
        std::fs::write(
            project.path().join("node_modules/pkg/index.js"),
            "function hidden() {}\n",
        )?;
        std::fs::write(project.path().join("main.js"), "function shown() {}\n")?;

        let indexer = indexer(project.path(), &state).await;
        let stats = indexer.index_tree(false, &mut |_, _| {}).await?;
        assert_eq!(stats.files_indexed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn deleted_files_are_pruned() -> Result<()> {
        let project = TempDir::new()?;
        let state = TempDir::new()?;
        let file = project.path().join("gone.py");
        std::fs::write(&file, "def f():\n    pass\n")?;

        let indexer = indexer(project.path(), &state).await;
        indexer.index_tree(false, &mut |_, _| {}).await?;
        std::fs::remove_file(&file)?;
        indexer.index_tree(false, &mut |_, _| {}).await?;

        assert!(indexer.fresh_file_symbols("gone.py").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn fresh_symbols_reflect_unpersisted_edits() -> Result<()> {
        let project = TempDir::new()?;
        let state = TempDir::new()?;
        let file = project.path().join("edit.rs");
        std::fs::write(&file, "fn before() {}\n")?;

        let indexer = indexer(project.path(), &state).await;
        indexer.index_tree(false, &mut |_, _| {}).await?;

        // External edit the watcher has not processed yet.
        std::fs::write(&file, "fn after() {}\n")?;
        // Force a different mtime even on coarse-grained filesystems.
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(2);
        let _ = filetime_set(&file, later);

        let fresh = indexer.fresh_file_symbols("edit.rs").await?;
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].name, "after");
        Ok(())
    }

    fn filetime_set(path: &Path, time: std::time::SystemTime) -> std::io::Result<()> {
        let file = std::fs::OpenOptions::new().append(true).open(path)?;
        file.set_modified(time)
    }
}
