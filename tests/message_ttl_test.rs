// Message TTL end-to-end: expiry is invisible, prune is idempotent.

use anyhow::Result;
use std::time::Duration;
use tempfile::TempDir;

use aide::backend::{Backend, DirectBackend};
use aide::paths::ProjectPaths;

#[tokio::test]
async fn expired_messages_never_listed() -> Result<()> {
    let dir = TempDir::new()?;
    let backend = DirectBackend::open(&ProjectPaths::new(dir.path())).await?;

    backend
        .message_send("w1".into(), "c1".into(), "Hi".into(), "info".into(), Some(1))
        .await?;
    assert_eq!(backend.message_list("c1".into()).await?.len(), 1);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(backend.message_list("c1".into()).await?.is_empty());

    // list() pruned already; prune is idempotent from here.
    assert_eq!(backend.message_prune().await?, 0);
    assert_eq!(backend.message_prune().await?, 0);
    Ok(())
}

#[tokio::test]
async fn prune_counts_once_then_zero() -> Result<()> {
    let dir = TempDir::new()?;
    let backend = DirectBackend::open(&ProjectPaths::new(dir.path())).await?;

    backend
        .message_send("w1".into(), "c1".into(), "short".into(), "info".into(), Some(1))
        .await?;
    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert_eq!(backend.message_prune().await?, 1);
    assert_eq!(backend.message_prune().await?, 0);
    Ok(())
}

#[tokio::test]
async fn double_ack_is_a_noop() -> Result<()> {
    let dir = TempDir::new()?;
    let backend = DirectBackend::open(&ProjectPaths::new(dir.path())).await?;

    let sent = backend
        .message_send("w1".into(), String::new(), "hello".into(), "info".into(), None)
        .await?;

    let first = backend.message_ack(sent.id, "c1".into()).await?;
    let second = backend.message_ack(sent.id, "c1".into()).await?;
    assert_eq!(first.read_by.len(), second.read_by.len());
    assert!(second.read_by.contains("c1"));

    // Acked broadcast is hidden for c1 but still visible to c2.
    assert!(backend.message_list("c1".into()).await?.is_empty());
    assert_eq!(backend.message_list("c2".into()).await?.len(), 1);
    Ok(())
}
