// Decision history end-to-end: latest wins, history is chronological.

use anyhow::Result;
use tempfile::TempDir;

use aide::backend::{Backend, DirectBackend};
use aide::paths::ProjectPaths;

#[tokio::test]
async fn set_twice_then_get_and_history() -> Result<()> {
    let dir = TempDir::new()?;
    let backend = DirectBackend::open(&ProjectPaths::new(dir.path())).await?;

    backend
        .decision_set(
            "auth-strategy".into(),
            "JWT".into(),
            "Stateless".into(),
            String::new(),
            vec![],
            "w1".into(),
        )
        .await?;
    backend
        .decision_set(
            "auth-strategy".into(),
            "Session".into(),
            "Changed".into(),
            String::new(),
            vec![],
            "w1".into(),
        )
        .await?;

    let current = backend.decision_get("auth-strategy".into()).await?;
    assert_eq!(current.decision, "Session");
    assert_eq!(current.rationale, "Changed");

    let history = backend.decision_history("auth-strategy".into()).await?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].decision, "JWT");
    assert_eq!(history[1].decision, "Session");
    assert!(history[0].created_at <= history[1].created_at);
    Ok(())
}

#[tokio::test]
async fn history_survives_reopen() -> Result<()> {
    let dir = TempDir::new()?;
    {
        let backend = DirectBackend::open(&ProjectPaths::new(dir.path())).await?;
        backend
            .decision_set(
                "storage".into(),
                "sled".into(),
                String::new(),
                String::new(),
                vec![],
                "w1".into(),
            )
            .await?;
        backend
            .decision_set(
                "storage".into(),
                "custom kv".into(),
                String::new(),
                String::new(),
                vec![],
                "w1".into(),
            )
            .await?;
        backend.close().await?;
    }

    let backend = DirectBackend::open(&ProjectPaths::new(dir.path())).await?;
    let history = backend.decision_history("storage".into()).await?;
    assert_eq!(history.len(), 2);
    assert_eq!(backend.decision_get("storage".into()).await?.decision, "custom kv");
    Ok(())
}
