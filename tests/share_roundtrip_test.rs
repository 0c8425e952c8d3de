// Share round-trip: export, wipe, import; only shareable memories travel.
// Re-export without mutations leaves the tree byte-identical.

use anyhow::Result;
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::path::Path;
use tempfile::TempDir;

use aide::backend::{Backend, DirectBackend};
use aide::paths::ProjectPaths;
use aide::share::ShareExporter;
use aide::types::MemoryCategory;

async fn seed(backend: &DirectBackend) -> Result<()> {
    for (topic, decision) in [
        ("auth-strategy", "Session"),
        ("storage-engine", "custom kv"),
        ("ipc-transport", "unix socket"),
    ] {
        backend
            .decision_set(
                topic.into(),
                decision.into(),
                "because".into(),
                "details here".into(),
                vec!["docs/design.md".into()],
                "w1".into(),
            )
            .await?;
    }

    // Shareable: gotcha, pattern, decision categories plus tagged learning.
    backend
        .memory_add("lock file survives crashes".into(), MemoryCategory::Gotcha, vec![])
        .await?;
    backend
        .memory_add("prefer bounded channels".into(), MemoryCategory::Pattern, vec![])
        .await?;
    backend
        .memory_add("we chose bincode for rows".into(), MemoryCategory::Decision, vec![])
        .await?;
    backend
        .memory_add(
            "global note".into(),
            MemoryCategory::Learning,
            vec!["scope:global".into()],
        )
        .await?;
    // Not shareable: plain learning and session scratch.
    backend
        .memory_add("untagged learning".into(), MemoryCategory::Learning, vec![])
        .await?;
    backend
        .memory_add("session scratch".into(), MemoryCategory::Session, vec![])
        .await?;
    Ok(())
}

fn tree_snapshot(dir: &Path) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut snapshot = BTreeMap::new();
    if !dir.exists() {
        return Ok(snapshot);
    }
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)?.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                let key = path
                    .strip_prefix(dir)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .into_owned();
                snapshot.insert(key, std::fs::read(&path)?);
            }
        }
    }
    Ok(snapshot)
}

#[tokio::test]
async fn export_wipe_import_restores_shareable_subset() -> Result<()> {
    let dir = TempDir::new()?;
    let paths = ProjectPaths::new(dir.path());
    let backend = DirectBackend::open(&paths).await?;
    seed(&backend).await?;

    let exporter = ShareExporter {
        memories: backend.memory_store(),
        decisions: backend.decision_store(),
    };
    let shared = paths.shared_dir();
    let report = exporter.export(&shared, false, false).await?;
    assert_eq!(report.decisions, 3);
    assert_eq!(report.memories, 4, "only shareable memories export");

    // Wipe everything, then import.
    backend.memory_clear().await?;
    backend.decision_clear().await?;
    assert!(backend.decision_list().await?.is_empty());

    let report = exporter.import(&shared, false).await?;
    assert_eq!(report.decisions, 3);
    assert_eq!(report.memories, 4);

    let decisions = backend.decision_list().await?;
    assert_eq!(decisions.len(), 3);
    assert!(decisions
        .iter()
        .any(|d| d.topic == "auth-strategy" && d.decision == "Session"));

    let memories = backend
        .memory_list(aide::memory_store::MemoryFilter {
            include_all: true,
            ..Default::default()
        })
        .await?;
    assert_eq!(memories.len(), 4);
    assert!(!memories.iter().any(|m| m.content == "session scratch"));
    Ok(())
}

#[tokio::test]
async fn import_is_idempotent() -> Result<()> {
    let dir = TempDir::new()?;
    let paths = ProjectPaths::new(dir.path());
    let backend = DirectBackend::open(&paths).await?;
    seed(&backend).await?;

    let exporter = ShareExporter {
        memories: backend.memory_store(),
        decisions: backend.decision_store(),
    };
    let shared = paths.shared_dir();
    exporter.export(&shared, false, false).await?;

    // Nothing was deleted: a re-import skips everything.
    let report = exporter.import(&shared, false).await?;
    assert_eq!(report.decisions, 0);
    assert_eq!(report.memories, 0);
    assert!(report.skipped > 0);

    // Decision history was not polluted by the no-op import.
    assert_eq!(
        backend.decision_history("auth-strategy".into()).await?.len(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn reexport_is_byte_identical_and_prunes_stale_files() -> Result<()> {
    let dir = TempDir::new()?;
    let paths = ProjectPaths::new(dir.path());
    let backend = DirectBackend::open(&paths).await?;
    seed(&backend).await?;

    let exporter = ShareExporter {
        memories: backend.memory_store(),
        decisions: backend.decision_store(),
    };
    let shared = paths.shared_dir();
    exporter.export(&shared, false, false).await?;

    // Drop a stale file that a previous export might have left behind.
    std::fs::write(shared.join("decisions").join("stale-topic.md"), "old")?;

    let first = {
        exporter.export(&shared, false, false).await?;
        tree_snapshot(&shared)?
    };
    assert!(!first.contains_key("decisions/stale-topic.md"));

    // No store mutations: the second export is byte-equivalent.
    let report = exporter.export(&shared, false, false).await?;
    assert_eq!(report.stale_removed, 0);
    let second = tree_snapshot(&shared)?;
    assert_eq!(first, second, "re-export must be byte-equivalent");
    Ok(())
}

#[tokio::test]
async fn dry_run_writes_nothing() -> Result<()> {
    let dir = TempDir::new()?;
    let paths = ProjectPaths::new(dir.path());
    let backend = DirectBackend::open(&paths).await?;
    seed(&backend).await?;

    let exporter = ShareExporter {
        memories: backend.memory_store(),
        decisions: backend.decision_store(),
    };
    let shared = paths.shared_dir();
    let report = exporter.export(&shared, false, true).await?;
    assert!(report.dry_run);
    assert_eq!(report.decisions, 3);
    assert!(tree_snapshot(&shared)?.is_empty());
    Ok(())
}
