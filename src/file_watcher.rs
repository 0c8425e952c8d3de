// Debounced file watcher
// Recursive notify-backed watcher that batches filesystem events per path
// key and fires a single callback once a path has been quiet for the
// configured interval. The indexer is just one subscriber.

use anyhow::{Context, Result};
use async_trait::async_trait;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default quiet interval before a change fires.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(30);

/// Receives debounced events. Removal of a watched path prunes its derived
/// state (symbols and references) via `on_remove`.
#[async_trait]
pub trait WatchSubscriber: Send + Sync {
    async fn on_change(&self, path: &Path);
    async fn on_remove(&self, path: &Path);
}

/// Debounced recursive watcher over one or more roots.
pub struct DebouncedWatcher {
    // NOTE(lifetime): held so the notify backend keeps running; dropping it
    // closes the event channel and ends the debounce task.
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl DebouncedWatcher {
    /// Start watching `roots` recursively. Events for one path are coalesced
    /// until the path has been quiet for `debounce`.
    pub fn start(
        roots: &[PathBuf],
        debounce: Duration,
        subscriber: Arc<dyn WatchSubscriber>,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => {
                    for path in event.paths {
                        // Coalescing happens in the debounce task; drop
                        // errors mean shutdown.
                        let _ = tx.send(path);
                    }
                }
                Err(e) => warn!(error = %e, "watch backend error"),
            }
        })
        .context("Failed to create filesystem watcher")?;

        for root in roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .with_context(|| format!("Failed to watch {}", root.display()))?;
        }

        let task = tokio::spawn(Self::debounce_loop(rx, debounce, subscriber));
        Ok(Self {
            _watcher: watcher,
            task,
        })
    }

    async fn debounce_loop(
        mut rx: mpsc::UnboundedReceiver<PathBuf>,
        debounce: Duration,
        subscriber: Arc<dyn WatchSubscriber>,
    ) {
        // One timer slot per path key; the tick just scans for quiet entries.
        let mut pending: HashMap<PathBuf, tokio::time::Instant> = HashMap::new();
        let poll = debounce.min(Duration::from_millis(500)).max(Duration::from_millis(10));
        let mut tick = tokio::time::interval(poll);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = rx.recv() => {
                    match received {
                        Some(path) => {
                            pending.insert(path, tokio::time::Instant::now());
                        }
                        None => break,
                    }
                }
                _ = tick.tick() => {
                    let now = tokio::time::Instant::now();
                    let ready: Vec<PathBuf> = pending
                        .iter()
                        .filter(|(_, last)| now.duration_since(**last) >= debounce)
                        .map(|(path, _)| path.clone())
                        .collect();
                    for path in ready {
                        pending.remove(&path);
                        Self::dispatch(&subscriber, &path).await;
                    }
                }
            }
        }

        // Drain whatever was still pending at shutdown.
        for (path, _) in pending.drain() {
            Self::dispatch(&subscriber, &path).await;
        }
    }

    async fn dispatch(subscriber: &Arc<dyn WatchSubscriber>, path: &Path) {
        if path.exists() {
            debug!(path = %path.display(), "debounced change");
            subscriber.on_change(path).await;
        } else {
            debug!(path = %path.display(), "debounced removal");
            subscriber.on_remove(path).await;
        }
    }

    /// Stop watching and wait for the debounce task to drain.
    pub async fn stop(self) {
        drop(self._watcher);
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!(error = %e, "watcher task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        changes: Mutex<Vec<PathBuf>>,
        removals: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl WatchSubscriber for Recorder {
        async fn on_change(&self, path: &Path) {
            self.changes.lock().unwrap().push(path.to_path_buf());
        }
        async fn on_remove(&self, path: &Path) {
            self.removals.lock().unwrap().push(path.to_path_buf());
        }
    }

    async fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = tokio::time::Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn burst_of_writes_fires_once() -> Result<()> {
        let dir = TempDir::new()?;
        let recorder = Arc::new(Recorder::default());
        let watcher = DebouncedWatcher::start(
            &[dir.path().to_path_buf()],
            Duration::from_millis(200),
            recorder.clone(),
        )?;

        let file = dir.path().join("burst.rs");
        for i in 0..5 {
            std::fs::write(&file, format!("fn v{i}() {{}}"))?;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let fired = wait_until(Duration::from_secs(5), || {
            recorder
                .changes
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.ends_with("burst.rs"))
                .count()
                == 1
        })
        .await;
        assert!(fired, "expected exactly one debounced change");

        watcher.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn removal_is_reported_as_remove() -> Result<()> {
        let dir = TempDir::new()?;
        let file = dir.path().join("doomed.rs");
        std::fs::write(&file, "fn f() {}")?;

        let recorder = Arc::new(Recorder::default());
        let watcher = DebouncedWatcher::start(
            &[dir.path().to_path_buf()],
            Duration::from_millis(150),
            recorder.clone(),
        )?;

        std::fs::remove_file(&file)?;
        let fired = wait_until(Duration::from_secs(5), || {
            recorder
                .removals
                .lock()
                .unwrap()
                .iter()
                .any(|p| p.ends_with("doomed.rs"))
        })
        .await;
        assert!(fired, "expected a debounced removal");

        watcher.stop().await;
        Ok(())
    }
}
