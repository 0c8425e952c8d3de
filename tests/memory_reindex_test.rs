// Reindex repair: losing the search index directory never loses data; a
// reindex restores search while listing stays unchanged throughout.

use anyhow::Result;
use tempfile::TempDir;

use aide::backend::{Backend, DirectBackend};
use aide::memory_store::MemoryFilter;
use aide::paths::ProjectPaths;
use aide::text_index::TagFilter;
use aide::types::MemoryCategory;

#[tokio::test]
async fn reindex_restores_search_after_index_loss() -> Result<()> {
    let dir = TempDir::new()?;
    let paths = ProjectPaths::new(dir.path());

    {
        let backend = DirectBackend::open(&paths).await?;
        for i in 0..100 {
            backend
                .memory_add(
                    format!("note number {i} about sockets"),
                    MemoryCategory::Learning,
                    vec![],
                )
                .await?;
        }
        let hits = backend
            .memory_search("sockets".into(), 0.0, TagFilter::Default, 0)
            .await?;
        assert_eq!(hits.len(), 100);
        backend.close().await?;
    }

    // Corrupt the search index by removing its directory.
    std::fs::remove_dir_all(paths.memory_index())?;

    let backend = DirectBackend::open(&paths).await?;
    // Search is empty, listing is not.
    assert!(backend
        .memory_search("sockets".into(), 0.0, TagFilter::Default, 0)
        .await?
        .is_empty());
    assert_eq!(
        backend.memory_list(MemoryFilter::default()).await?.len(),
        100
    );

    let rebuilt = backend.memory_reindex().await?;
    assert_eq!(rebuilt, 100);

    let hits = backend
        .memory_search("sockets".into(), 0.0, TagFilter::Default, 0)
        .await?;
    assert_eq!(hits.len(), 100);
    assert_eq!(
        backend.memory_list(MemoryFilter::default()).await?.len(),
        100
    );
    Ok(())
}
