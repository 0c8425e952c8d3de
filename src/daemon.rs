// Daemon
// The long-lived server process: owns the stores, the IPC listener and the
// file watcher, and serves the tool protocol on stdio. Initialised once at
// start, torn down once at signal; nothing escapes this scope.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::backend::DirectBackend;
use crate::config::AideConfig;
use crate::file_watcher::{DebouncedWatcher, WatchSubscriber};
use crate::ipc::server::IpcServer;
use crate::mcp::McpServer;
use crate::paths::ProjectPaths;

/// Re-index on watcher events. The subscriber only forwards; all skipping
/// (unsupported extensions, fresh files) happens inside the indexer.
struct IndexOnChange {
    backend: Arc<DirectBackend>,
}

impl IndexOnChange {
    fn is_internal(path: &Path) -> bool {
        path.components()
            .any(|c| c.as_os_str().to_str() == Some(crate::paths::STATE_DIR))
    }
}

#[async_trait]
impl WatchSubscriber for IndexOnChange {
    async fn on_change(&self, path: &Path) {
        if Self::is_internal(path) {
            return;
        }
        match self.backend.code_parts().await {
            Ok(parts) => {
                if let Err(e) = parts.indexer.index_path(path, false).await {
                    warn!(path = %path.display(), error = %e, "watcher re-index failed");
                }
            }
            Err(e) => warn!(error = %e, "code store unavailable for watcher event"),
        }
    }

    async fn on_remove(&self, path: &Path) {
        if Self::is_internal(path) {
            return;
        }
        // index_path on a missing file prunes its symbols and references.
        if let Ok(parts) = self.backend.code_parts().await {
            if let Err(e) = parts.indexer.index_path(path, false).await {
                warn!(path = %path.display(), error = %e, "watcher prune failed");
            }
        }
    }
}

/// Run the daemon until stdin closes or a shutdown signal arrives.
pub async fn run(paths: ProjectPaths, config: AideConfig) -> Result<()> {
    let backend = Arc::new(
        DirectBackend::open_for_daemon(&paths, &config)
            .await
            .context("Failed to open stores")?,
    );

    let ipc = IpcServer::start(&paths.socket_path(), backend.clone()).await?;

    let watcher = if config.watch.enabled {
        let mut roots = vec![paths.root.clone()];
        for extra in &config.watch.paths {
            roots.push(paths.root.join(extra));
        }
        let subscriber = Arc::new(IndexOnChange {
            backend: backend.clone(),
        });
        match DebouncedWatcher::start(
            &roots,
            Duration::from_secs(config.watch.delay_secs),
            subscriber,
        ) {
            Ok(watcher) => {
                info!(delay_secs = config.watch.delay_secs, "file watcher running");
                Some(watcher)
            }
            Err(e) => {
                warn!(error = %e, "file watcher failed to start, continuing without it");
                None
            }
        }
    } else {
        None
    };

    info!(
        root = %paths.root.display(),
        socket = %paths.socket_path().display(),
        "daemon ready"
    );

    // Serve the tool protocol until stdin closes or a signal arrives.
    let mcp = McpServer::new(backend.clone(), paths.clone());
    tokio::select! {
        served = mcp.serve_stdio() => {
            if let Err(e) = served {
                warn!(error = %e, "tool protocol server failed");
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    // Teardown order: stop accepting and drain handlers, close the socket,
    // stop the watcher, then close stores (search index before KV engine).
    ipc.shutdown().await;
    if let Some(watcher) = watcher {
        watcher.stop().await;
    }
    backend.close().await?;
    info!("daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut interrupt =
        signal(SignalKind::interrupt()).expect("interrupt signal handler install failed");
    let mut terminate =
        signal(SignalKind::terminate()).expect("terminate signal handler install failed");
    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
}
