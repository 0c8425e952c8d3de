// Router transparency: the same operation through the IPC adapter and the
// in-process store must agree, modulo the documented unsupported calls.

use anyhow::Result;
use std::sync::Arc;
use tempfile::TempDir;

use aide::backend::{Backend, DirectBackend};
use aide::error::{as_store_error, StoreError};
use aide::ipc::client::IpcClient;
use aide::ipc::server::IpcServer;
use aide::memory_store::MemoryFilter;
use aide::paths::ProjectPaths;
use aide::text_index::TagFilter;
use aide::types::MemoryCategory;

struct Fixture {
    _dir: TempDir,
    direct: Arc<DirectBackend>,
    server: IpcServer,
    client: IpcClient,
}

async fn fixture() -> Result<Fixture> {
    let dir = TempDir::new()?;
    let direct = Arc::new(DirectBackend::open(&ProjectPaths::new(dir.path())).await?);
    let socket = dir.path().join("aide-test.sock");
    let server = IpcServer::start(&socket, direct.clone()).await?;
    let client = IpcClient::connect(&socket).await?;
    Ok(Fixture {
        _dir: dir,
        direct,
        server,
        client,
    })
}

#[tokio::test]
async fn memory_operations_agree_across_transports() -> Result<()> {
    let f = fixture().await?;

    // Write over IPC, read both ways.
    let added = f
        .client
        .memory_add(
            "the indexer skips fresh files".into(),
            MemoryCategory::Learning,
            vec!["indexing".into()],
        )
        .await?;

    let via_ipc = f.client.memory_list(MemoryFilter::default()).await?;
    let via_direct = f.direct.memory_list(MemoryFilter::default()).await?;
    assert_eq!(via_ipc, via_direct);
    assert_eq!(via_ipc.len(), 1);
    assert_eq!(via_ipc[0].id, added.id);

    // Native update over IPC keeps the id stable.
    let updated = f
        .client
        .memory_update_tags(added.id, vec!["freshness".into()], vec![])
        .await?;
    assert_eq!(updated.id, added.id);
    assert!(updated.tags.contains("freshness"));

    // Search agrees too.
    let ipc_hits = f
        .client
        .memory_search("indexer".into(), 0.0, TagFilter::Default, 0)
        .await?;
    let direct_hits = f
        .direct
        .memory_search("indexer".into(), 0.0, TagFilter::Default, 0)
        .await?;
    assert_eq!(ipc_hits.len(), direct_hits.len());
    assert_eq!(ipc_hits[0].0.id, direct_hits[0].0.id);

    f.server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn task_claim_over_ipc_is_exclusive() -> Result<()> {
    let f = fixture().await?;

    let task = f
        .client
        .task_create("shared work".into(), String::new(), None)
        .await?;
    f.client.task_claim(task.id, "remote".into()).await?;

    // The direct view sees the claim immediately.
    let err = f.direct.task_claim(task.id, "local".into()).await.unwrap_err();
    assert!(matches!(
        as_store_error(&err),
        Some(StoreError::AlreadyClaimed)
    ));

    f.server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unsupported_operations_fail_cleanly_over_ipc() -> Result<()> {
    let f = fixture().await?;

    let task = f
        .client
        .task_create("undeletable remotely".into(), String::new(), None)
        .await?;

    let err = f.client.task_delete(task.id).await.unwrap_err();
    assert!(matches!(
        as_store_error(&err),
        Some(StoreError::UnsupportedOverIpc(_))
    ));

    let err = f.client.task_clear(None).await.unwrap_err();
    assert!(matches!(
        as_store_error(&err),
        Some(StoreError::UnsupportedOverIpc(_))
    ));

    let err = f
        .client
        .findings_replace("dup".into(), Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(
        as_store_error(&err),
        Some(StoreError::UnsupportedOverIpc(_))
    ));

    // The same operations work in direct mode.
    f.direct.task_delete(task.id).await?;
    assert_eq!(f.direct.findings_replace("dup".into(), Vec::new()).await?, 0);

    f.server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn errors_keep_their_kind_across_the_wire() -> Result<()> {
    let f = fixture().await?;

    let missing = aide::types::SortableId::new();
    let err = f.client.memory_get(missing).await.unwrap_err();
    assert!(matches!(as_store_error(&err), Some(StoreError::NotFound(_))));

    let err = f.client.decision_get("absent-topic".into()).await.unwrap_err();
    assert!(matches!(as_store_error(&err), Some(StoreError::NotFound(_))));

    f.server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn ping_reports_daemon_identity() -> Result<()> {
    let f = fixture().await?;
    let status = f.client.ping().await?;
    assert_eq!(status.pid, std::process::id());
    assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
    f.server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn concurrent_ipc_clients_are_served() -> Result<()> {
    let f = fixture().await?;
    let socket = f.server.socket_path().to_path_buf();

    let mut handles = Vec::new();
    for i in 0..4 {
        let socket = socket.clone();
        handles.push(tokio::spawn(async move {
            let client = IpcClient::connect(&socket).await?;
            client
                .state_set(format!("agent:w{i}:cursor"), i.to_string())
                .await?;
            anyhow::Ok(())
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let entries = f.direct.state_list(Some("agent:".into())).await?;
    assert_eq!(entries.len(), 4);

    f.server.shutdown().await;
    Ok(())
}
