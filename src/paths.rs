// Project paths
// Project-root discovery (including git worktrees), the on-disk layout under
// .aide/, and the deterministic IPC socket path.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// The tool's state directory at the project root.
pub const STATE_DIR: &str = ".aide";

/// Walk upward from `start` looking for `.aide/` or `.git/`.
///
/// A `.git` *file* is a worktree marker; its `gitdir:` pointer is resolved
/// to the enclosing repository root so all worktrees share one store.
pub fn find_project_root(start: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start
        .as_ref()
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", start.as_ref().display()))?;

    let mut current = Some(start.as_path());
    while let Some(dir) = current {
        if dir.join(STATE_DIR).is_dir() {
            return Ok(dir.to_path_buf());
        }
        let git = dir.join(".git");
        if git.is_dir() {
            return Ok(dir.to_path_buf());
        }
        if git.is_file() {
            if let Some(root) = worktree_repository_root(&git)? {
                return Ok(root);
            }
            return Ok(dir.to_path_buf());
        }
        current = dir.parent();
    }
    // No marker anywhere: the starting directory owns its own state.
    Ok(start)
}

/// Resolve a worktree's `.git` file to the main repository root.
///
/// The file contains `gitdir: <path>/.git/worktrees/<name>`; the repository
/// root is the directory holding that `.git`.
fn worktree_repository_root(git_file: &Path) -> Result<Option<PathBuf>> {
    let content = std::fs::read_to_string(git_file)
        .with_context(|| format!("Failed to read {}", git_file.display()))?;
    let Some(gitdir) = content
        .lines()
        .find_map(|line| line.strip_prefix("gitdir:"))
        .map(str::trim)
    else {
        return Ok(None);
    };

    let gitdir = if Path::new(gitdir).is_absolute() {
        PathBuf::from(gitdir)
    } else {
        git_file
            .parent()
            .map(|p| p.join(gitdir))
            .unwrap_or_else(|| PathBuf::from(gitdir))
    };

    // <repo>/.git/worktrees/<name> -> <repo>
    let mut ancestor = gitdir.as_path();
    while let Some(parent) = ancestor.parent() {
        if ancestor.file_name().and_then(|n| n.to_str()) == Some(".git") {
            return Ok(Some(parent.to_path_buf()));
        }
        ancestor = parent;
    }
    Ok(None)
}

/// Paths of everything the backend owns, rooted at one project.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Discover the project root from the current directory, honouring the
    /// `AIDE_MEMORY_DB` override used for test isolation.
    pub fn discover() -> Result<Self> {
        if let Ok(db) = std::env::var("AIDE_MEMORY_DB") {
            // The override names the memory db file itself; the state root
            // is two levels up (<root>/.aide/memory/store.db).
            let db_path = PathBuf::from(db);
            if let Some(root) = db_path
                .parent() // memory/
                .and_then(Path::parent) // .aide/
                .and_then(Path::parent)
            {
                return Ok(Self::new(root));
            }
        }
        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        Ok(Self::new(find_project_root(cwd)?))
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    /// KV engine for memories, decisions, messages, tasks, state.
    pub fn memory_db(&self) -> PathBuf {
        if let Ok(db) = std::env::var("AIDE_MEMORY_DB") {
            return PathBuf::from(db);
        }
        self.state_dir().join("memory").join("store.db")
    }

    /// Memory search index directory.
    pub fn memory_index(&self) -> PathBuf {
        self.memory_db()
            .parent()
            .map(|p| p.join("search.idx"))
            .unwrap_or_else(|| self.state_dir().join("memory").join("search.idx"))
    }

    pub fn code_db(&self) -> PathBuf {
        self.state_dir().join("memory").join("code").join("index.db")
    }

    pub fn code_index(&self) -> PathBuf {
        self.state_dir().join("memory").join("code").join("search.idx")
    }

    pub fn findings_db(&self) -> PathBuf {
        self.state_dir()
            .join("memory")
            .join("findings")
            .join("findings.db")
    }

    pub fn findings_index(&self) -> PathBuf {
        self.state_dir()
            .join("memory")
            .join("findings")
            .join("search.idx")
    }

    pub fn shared_dir(&self) -> PathBuf {
        self.state_dir().join("shared")
    }

    pub fn config_file(&self) -> PathBuf {
        self.state_dir().join("config").join("aide.json")
    }

    pub fn ignore_file(&self) -> PathBuf {
        self.root.join(".aideignore")
    }

    /// The IPC socket for this database: a short stable hash of the
    /// absolute memory-db path keeps projects apart.
    pub fn socket_path(&self) -> PathBuf {
        socket_path_for(&self.memory_db())
    }
}

/// Deterministic local socket path for a database path.
pub fn socket_path_for(db_path: &Path) -> PathBuf {
    let canonical = db_path
        .canonicalize()
        .unwrap_or_else(|_| db_path.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    let digest = hex::encode(&hasher.finalize()[..6]);
    std::env::temp_dir().join(format!("aide-{digest}.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn finds_root_by_state_dir() -> Result<()> {
        let dir = TempDir::new()?;
        let root = dir.path().join("project");
        std::fs::create_dir_all(root.join(STATE_DIR))?;
        std::fs::create_dir_all(root.join("src/deep"))?;

        let found = find_project_root(root.join("src/deep"))?;
        assert_eq!(found, root.canonicalize()?);
        Ok(())
    }

    #[test]
    fn finds_root_by_git_dir() -> Result<()> {
        let dir = TempDir::new()?;
        let root = dir.path().join("repo");
        std::fs::create_dir_all(root.join(".git"))?;
        std::fs::create_dir_all(root.join("a/b"))?;

        let found = find_project_root(root.join("a/b"))?;
        assert_eq!(found, root.canonicalize()?);
        Ok(())
    }

    #[test]
    fn worktree_resolves_to_main_repository() -> Result<()> {
        let dir = TempDir::new()?;
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(repo.join(".git/worktrees/wt"))?;
        let worktree = dir.path().join("wt");
        std::fs::create_dir_all(&worktree)?;
        std::fs::write(
            worktree.join(".git"),
            format!("gitdir: {}\n", repo.join(".git/worktrees/wt").display()),
        )?;

        let found = find_project_root(&worktree)?;
        assert_eq!(found, repo);
        Ok(())
    }

    #[test]
    fn socket_path_is_stable_and_distinct() {
        let a = socket_path_for(Path::new("/tmp/project-a/.aide/memory/store.db"));
        let b = socket_path_for(Path::new("/tmp/project-b/.aide/memory/store.db"));
        assert_eq!(
            a,
            socket_path_for(Path::new("/tmp/project-a/.aide/memory/store.db"))
        );
        assert_ne!(a, b);
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("aide-"));
    }

    #[test]
    fn layout_is_rooted_under_state_dir() {
        let paths = ProjectPaths::new("/work/demo");
        assert_eq!(
            paths.memory_db(),
            PathBuf::from("/work/demo/.aide/memory/store.db")
        );
        assert_eq!(
            paths.code_db(),
            PathBuf::from("/work/demo/.aide/memory/code/index.db")
        );
        assert_eq!(
            paths.findings_index(),
            PathBuf::from("/work/demo/.aide/memory/findings/search.idx")
        );
    }
}
