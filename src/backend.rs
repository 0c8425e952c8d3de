// Backend router
// One logical API, two transports: an in-process combined store, or an IPC
// adapter talking to an already-running daemon over the project socket.
// Callers never know which mode they got.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::code_indexer::{CodeIndexer, IndexStats};
use crate::code_store::{CodeStats, CodeStore, ReferenceRecord, SymbolRecord};
use crate::combined_store::CombinedStore;
use crate::config::AideConfig;
use crate::decision_store::{Decision, DecisionStore};
use crate::error::StoreError;
use crate::finding_store::{Finding, FindingFilter, FindingStats, FindingStore, NewFinding};
use crate::ipc::client::IpcClient;
use crate::ipc::proto::StatusInfo;
use crate::memory_store::{Memory, MemoryFilter, MemoryStore};
use crate::message_store::{Message, MessageStore};
use crate::paths::ProjectPaths;
use crate::state_store::{StateEntry, StateStore};
use crate::task_store::{Task, TaskStore};
use crate::text_index::TagFilter;
use crate::types::{MemoryCategory, SortableId, TaskStatus};

/// Delay before the one dial retry when the socket looked alive but the
/// connection failed (a daemon may be mid-restart).
const DIAL_RETRY_DELAY: Duration = Duration::from_millis(150);

/// The single logical store API. Implemented in-process by
/// [`DirectBackend`] and remotely by the IPC adapter; results must agree
/// between the two (modulo the documented unsupported operations).
#[async_trait]
pub trait Backend: Send + Sync {
    async fn ping(&self) -> Result<StatusInfo>;

    // Memories
    async fn memory_add(
        &self,
        content: String,
        category: MemoryCategory,
        tags: Vec<String>,
    ) -> Result<Memory>;
    async fn memory_get(&self, id: SortableId) -> Result<Memory>;
    async fn memory_update_tags(
        &self,
        id: SortableId,
        add: Vec<String>,
        remove: Vec<String>,
    ) -> Result<Memory>;
    async fn memory_delete(&self, id: SortableId) -> Result<()>;
    async fn memory_list(&self, filter: MemoryFilter) -> Result<Vec<Memory>>;
    async fn memory_search(
        &self,
        query: String,
        min_score: f32,
        filter: TagFilter,
        limit: usize,
    ) -> Result<Vec<(Memory, f32)>>;
    async fn memory_sessions(&self) -> Result<Vec<(String, usize, DateTime<Utc>)>>;
    async fn memory_clear(&self) -> Result<usize>;
    async fn memory_reindex(&self) -> Result<usize>;

    // Decisions
    #[allow(clippy::too_many_arguments)]
    async fn decision_set(
        &self,
        topic: String,
        decision: String,
        rationale: String,
        details: String,
        references: Vec<String>,
        decided_by: String,
    ) -> Result<Decision>;
    async fn decision_get(&self, topic: String) -> Result<Decision>;
    async fn decision_history(&self, topic: String) -> Result<Vec<Decision>>;
    async fn decision_list(&self) -> Result<Vec<Decision>>;
    async fn decision_delete_topic(&self, topic: String) -> Result<usize>;
    async fn decision_clear(&self) -> Result<usize>;

    // State
    async fn state_set(&self, key: String, value: String) -> Result<StateEntry>;
    async fn state_get(&self, key: String) -> Result<StateEntry>;
    async fn state_delete(&self, key: String) -> Result<()>;
    async fn state_list(&self, prefix: Option<String>) -> Result<Vec<StateEntry>>;
    async fn state_clear(&self) -> Result<usize>;
    async fn state_cleanup(&self, max_age_secs: i64) -> Result<usize>;

    // Messages
    async fn message_send(
        &self,
        from: String,
        to: String,
        content: String,
        msg_type: String,
        ttl_secs: Option<i64>,
    ) -> Result<Message>;
    async fn message_list(&self, agent: String) -> Result<Vec<Message>>;
    async fn message_ack(&self, id: u64, agent: String) -> Result<Message>;
    async fn message_prune(&self) -> Result<usize>;
    async fn message_clear(&self) -> Result<usize>;

    // Tasks
    async fn task_create(
        &self,
        title: String,
        description: String,
        worktree: Option<String>,
    ) -> Result<Task>;
    async fn task_get(&self, id: SortableId) -> Result<Task>;
    async fn task_claim(&self, id: SortableId, agent: String) -> Result<Task>;
    async fn task_complete(&self, id: SortableId, result: String) -> Result<Task>;
    async fn task_block(&self, id: SortableId, reason: Option<String>) -> Result<Task>;
    async fn task_list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>>;
    /// No server method exists for these two; the IPC adapter returns
    /// `UnsupportedOverIpc`.
    async fn task_delete(&self, id: SortableId) -> Result<()>;
    async fn task_clear(&self, status: Option<TaskStatus>) -> Result<usize>;

    // Code index
    async fn code_index(&self, force: bool) -> Result<IndexStats>;
    async fn code_search(&self, query: String, limit: usize)
        -> Result<Vec<(SymbolRecord, f32)>>;
    async fn code_symbols(&self, path: String) -> Result<Vec<SymbolRecord>>;
    async fn code_references(&self, symbol: String) -> Result<Vec<ReferenceRecord>>;
    async fn code_stats(&self) -> Result<CodeStats>;
    async fn code_clear(&self) -> Result<()>;

    // Findings
    async fn findings_list(&self, filter: FindingFilter) -> Result<Vec<Finding>>;
    async fn findings_search(
        &self,
        query: String,
        filter: FindingFilter,
    ) -> Result<Vec<(Finding, f32)>>;
    async fn findings_stats(&self) -> Result<FindingStats>;
    async fn findings_accept(&self, ids: Vec<String>) -> Result<usize>;
    async fn findings_accept_by_filter(&self, filter: FindingFilter) -> Result<usize>;
    async fn findings_clear(&self) -> Result<usize>;
    async fn findings_clear_analyser(&self, analyser: String) -> Result<usize>;
    /// Analyser output replacement has no remote method either.
    async fn findings_replace(
        &self,
        analyser: String,
        findings: Vec<NewFinding>,
    ) -> Result<usize>;
}

/// Everything the code subsystem needs, published as one unit.
#[derive(Clone)]
pub struct CodeParts {
    pub combined: Arc<CombinedStore>,
    pub store: Arc<CodeStore>,
    pub indexer: Arc<CodeIndexer>,
}

impl CodeParts {
    async fn open(paths: &ProjectPaths) -> Result<Self> {
        let combined = Arc::new(
            CombinedStore::open(paths.code_db(), paths.code_index())
                .await
                .context("Failed to open code store")?,
        );
        let store = Arc::new(CodeStore::new(combined.clone()));
        let indexer = Arc::new(CodeIndexer::new(store.clone(), paths.root.clone()));
        Ok(Self {
            combined,
            store,
            indexer,
        })
    }
}

enum CodeSlotState {
    /// Init worker still running.
    Pending,
    Ready(CodeParts),
    Disabled,
    Failed(String),
}

/// Reader-visible slot the lazy init worker publishes into. Readers poll
/// (100 ms x 50, 5 s maximum) until the handle appears.
struct CodeSlot {
    state: Arc<tokio::sync::RwLock<CodeSlotState>>,
}

impl CodeSlot {
    const POLL_INTERVAL: Duration = Duration::from_millis(100);
    const POLL_ATTEMPTS: usize = 50;

    fn ready(parts: CodeParts) -> Self {
        Self {
            state: Arc::new(tokio::sync::RwLock::new(CodeSlotState::Ready(parts))),
        }
    }

    fn disabled() -> Self {
        Self {
            state: Arc::new(tokio::sync::RwLock::new(CodeSlotState::Disabled)),
        }
    }

    /// Start the init worker and return immediately.
    fn lazy(paths: ProjectPaths) -> Self {
        let state = Arc::new(tokio::sync::RwLock::new(CodeSlotState::Pending));
        let slot = state.clone();
        tokio::spawn(async move {
            let outcome = CodeParts::open(&paths).await;
            let mut guard = slot.write().await;
            *guard = match outcome {
                Ok(parts) => {
                    debug!("code store initialised in background");
                    CodeSlotState::Ready(parts)
                }
                Err(e) => {
                    warn!(error = %e, "code store init failed");
                    CodeSlotState::Failed(format!("{e:#}"))
                }
            };
        });
        Self { state }
    }

    async fn get(&self) -> Result<CodeParts> {
        for _ in 0..Self::POLL_ATTEMPTS {
            {
                let guard = self.state.read().await;
                match &*guard {
                    CodeSlotState::Ready(parts) => return Ok(parts.clone()),
                    CodeSlotState::Disabled => {
                        anyhow::bail!(StoreError::Invalid(
                            "code store is disabled (AIDE_CODE_STORE_DISABLE)".into()
                        ))
                    }
                    CodeSlotState::Failed(message) => {
                        anyhow::bail!(StoreError::StoreCorrupt(format!(
                            "code store failed to initialise: {message}"
                        )))
                    }
                    CodeSlotState::Pending => {}
                }
            }
            tokio::time::sleep(Self::POLL_INTERVAL).await;
        }
        anyhow::bail!(StoreError::Invalid(
            "timed out waiting for the code store to initialise".into()
        ))
    }

    async fn peek(&self) -> Option<CodeParts> {
        match &*self.state.read().await {
            CodeSlotState::Ready(parts) => Some(parts.clone()),
            _ => None,
        }
    }
}

/// In-process backend: owns the memory and findings stores eagerly, the
/// code store eagerly or via the lazy init worker.
pub struct DirectBackend {
    memory: MemoryStore,
    decisions: DecisionStore,
    state: StateStore,
    messages: MessageStore,
    tasks: TaskStore,
    findings: FindingStore,
    code_slot: CodeSlot,
    memory_store: Arc<CombinedStore>,
    findings_combined: Arc<CombinedStore>,
    started: std::time::Instant,
}

impl DirectBackend {
    /// Open every store for a project, code store included (CLI path).
    pub async fn open(paths: &ProjectPaths) -> Result<Self> {
        let code_slot = CodeSlot::ready(CodeParts::open(paths).await?);
        Self::open_inner(paths, code_slot).await
    }

    /// Open for the daemon: the code store initialises on a background
    /// worker by default so server start stays fast.
    pub async fn open_for_daemon(paths: &ProjectPaths, config: &AideConfig) -> Result<Self> {
        let code_slot = if config.code_store.disable {
            CodeSlot::disabled()
        } else if config.code_store.sync_init {
            CodeSlot::ready(CodeParts::open(paths).await?)
        } else {
            CodeSlot::lazy(paths.clone())
        };
        Self::open_inner(paths, code_slot).await
    }

    async fn open_inner(paths: &ProjectPaths, code_slot: CodeSlot) -> Result<Self> {
        let memory_store = Arc::new(
            CombinedStore::open(paths.memory_db(), paths.memory_index())
                .await
                .context("Failed to open memory store")?,
        );
        let findings_combined = Arc::new(
            CombinedStore::open(paths.findings_db(), paths.findings_index())
                .await
                .context("Failed to open findings store")?,
        );

        Ok(Self {
            memory: MemoryStore::new(memory_store.clone()),
            decisions: DecisionStore::new(memory_store.clone()),
            state: StateStore::new(memory_store.clone()),
            messages: MessageStore::new(memory_store.clone()),
            tasks: TaskStore::new(memory_store.clone()),
            findings: FindingStore::new(findings_combined.clone()),
            code_slot,
            memory_store,
            findings_combined,
            started: std::time::Instant::now(),
        })
    }

    fn to_tags(raw: Vec<String>) -> Result<Vec<crate::types::ValidatedTag>> {
        raw.into_iter().map(crate::types::ValidatedTag::new).collect()
    }

    /// The code subsystem, waiting for lazy init if necessary.
    pub async fn code_parts(&self) -> Result<CodeParts> {
        self.code_slot.get().await
    }

    /// Direct access to the memory/decision stores (share exporter path).
    pub fn memory_store(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn decision_store(&self) -> &DecisionStore {
        &self.decisions
    }

    pub fn finding_store(&self) -> &FindingStore {
        &self.findings
    }

    /// Close stores in dependency order (indices first, then KV engines).
    pub async fn close(&self) -> Result<()> {
        self.findings_combined.close().await?;
        if let Some(parts) = self.code_slot.peek().await {
            parts.combined.close().await?;
        }
        self.memory_store.close().await
    }
}

#[async_trait]
impl Backend for DirectBackend {
    async fn ping(&self) -> Result<StatusInfo> {
        Ok(StatusInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
            uptime_secs: self.started.elapsed().as_secs(),
        })
    }

    async fn memory_add(
        &self,
        content: String,
        category: MemoryCategory,
        tags: Vec<String>,
    ) -> Result<Memory> {
        self.memory.add(content, category, Self::to_tags(tags)?).await
    }

    async fn memory_get(&self, id: SortableId) -> Result<Memory> {
        self.memory.get(&id).await
    }

    async fn memory_update_tags(
        &self,
        id: SortableId,
        add: Vec<String>,
        remove: Vec<String>,
    ) -> Result<Memory> {
        self.memory
            .update_tags(&id, Self::to_tags(add)?, Self::to_tags(remove)?)
            .await
    }

    async fn memory_delete(&self, id: SortableId) -> Result<()> {
        self.memory.delete(&id).await
    }

    async fn memory_list(&self, filter: MemoryFilter) -> Result<Vec<Memory>> {
        self.memory.list(&filter).await
    }

    async fn memory_search(
        &self,
        query: String,
        min_score: f32,
        filter: TagFilter,
        limit: usize,
    ) -> Result<Vec<(Memory, f32)>> {
        self.memory
            .search_with_score(&query, min_score, filter, limit)
            .await
    }

    async fn memory_sessions(&self) -> Result<Vec<(String, usize, DateTime<Utc>)>> {
        self.memory.sessions().await
    }

    async fn memory_clear(&self) -> Result<usize> {
        self.memory.clear_all().await
    }

    async fn memory_reindex(&self) -> Result<usize> {
        self.memory.sync_search_index().await
    }

    async fn decision_set(
        &self,
        topic: String,
        decision: String,
        rationale: String,
        details: String,
        references: Vec<String>,
        decided_by: String,
    ) -> Result<Decision> {
        self.decisions
            .set(topic, decision, rationale, details, references, decided_by)
            .await
    }

    async fn decision_get(&self, topic: String) -> Result<Decision> {
        self.decisions.get(&topic).await
    }

    async fn decision_history(&self, topic: String) -> Result<Vec<Decision>> {
        self.decisions.history(&topic).await
    }

    async fn decision_list(&self) -> Result<Vec<Decision>> {
        self.decisions.list().await
    }

    async fn decision_delete_topic(&self, topic: String) -> Result<usize> {
        self.decisions.delete_topic(&topic).await
    }

    async fn decision_clear(&self) -> Result<usize> {
        self.decisions.clear().await
    }

    async fn state_set(&self, key: String, value: String) -> Result<StateEntry> {
        self.state.set(key, value).await
    }

    async fn state_get(&self, key: String) -> Result<StateEntry> {
        self.state.get(&key).await
    }

    async fn state_delete(&self, key: String) -> Result<()> {
        self.state.delete(&key).await
    }

    async fn state_list(&self, prefix: Option<String>) -> Result<Vec<StateEntry>> {
        self.state.list(prefix.as_deref()).await
    }

    async fn state_clear(&self) -> Result<usize> {
        self.state.clear().await
    }

    async fn state_cleanup(&self, max_age_secs: i64) -> Result<usize> {
        if max_age_secs < 0 {
            anyhow::bail!(StoreError::Invalid(format!(
                "cleanup age must be non-negative, got {max_age_secs}"
            )));
        }
        self.state
            .cleanup(chrono::Duration::seconds(max_age_secs))
            .await
    }

    async fn message_send(
        &self,
        from: String,
        to: String,
        content: String,
        msg_type: String,
        ttl_secs: Option<i64>,
    ) -> Result<Message> {
        self.messages.send(from, to, content, msg_type, ttl_secs).await
    }

    async fn message_list(&self, agent: String) -> Result<Vec<Message>> {
        self.messages.list(&agent).await
    }

    async fn message_ack(&self, id: u64, agent: String) -> Result<Message> {
        self.messages.ack(id, agent).await
    }

    async fn message_prune(&self) -> Result<usize> {
        self.messages.prune().await
    }

    async fn message_clear(&self) -> Result<usize> {
        self.messages.clear().await
    }

    async fn task_create(
        &self,
        title: String,
        description: String,
        worktree: Option<String>,
    ) -> Result<Task> {
        self.tasks.create(title, description, worktree).await
    }

    async fn task_get(&self, id: SortableId) -> Result<Task> {
        self.tasks.get(&id).await
    }

    async fn task_claim(&self, id: SortableId, agent: String) -> Result<Task> {
        self.tasks.claim(&id, agent).await
    }

    async fn task_complete(&self, id: SortableId, result: String) -> Result<Task> {
        self.tasks.complete(&id, result).await
    }

    async fn task_block(&self, id: SortableId, reason: Option<String>) -> Result<Task> {
        self.tasks.block(&id, reason).await
    }

    async fn task_list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        self.tasks.list(status).await
    }

    async fn task_delete(&self, id: SortableId) -> Result<()> {
        self.tasks.delete(&id).await
    }

    async fn task_clear(&self, status: Option<TaskStatus>) -> Result<usize> {
        self.tasks.clear_by_status(status).await
    }

    async fn code_index(&self, force: bool) -> Result<IndexStats> {
        let parts = self.code_parts().await?;
        parts.indexer.index_tree(force, &mut |_, _| {}).await
    }

    async fn code_search(
        &self,
        query: String,
        limit: usize,
    ) -> Result<Vec<(SymbolRecord, f32)>> {
        let parts = self.code_parts().await?;
        parts.store.search_symbols(&query, limit).await
    }

    async fn code_symbols(&self, path: String) -> Result<Vec<SymbolRecord>> {
        // Freshness check built in: an external edit the watcher has not
        // processed yet is reparsed live.
        let parts = self.code_parts().await?;
        parts.indexer.fresh_file_symbols(&path).await
    }

    async fn code_references(&self, symbol: String) -> Result<Vec<ReferenceRecord>> {
        let parts = self.code_parts().await?;
        parts.store.references(&symbol).await
    }

    async fn code_stats(&self) -> Result<CodeStats> {
        let parts = self.code_parts().await?;
        parts.store.stats().await
    }

    async fn code_clear(&self) -> Result<()> {
        let parts = self.code_parts().await?;
        parts.store.clear().await
    }

    async fn findings_list(&self, filter: FindingFilter) -> Result<Vec<Finding>> {
        self.findings.list(&filter).await
    }

    async fn findings_search(
        &self,
        query: String,
        filter: FindingFilter,
    ) -> Result<Vec<(Finding, f32)>> {
        self.findings.search(&query, &filter).await
    }

    async fn findings_stats(&self) -> Result<FindingStats> {
        self.findings.stats().await
    }

    async fn findings_accept(&self, ids: Vec<String>) -> Result<usize> {
        self.findings.accept(&ids).await
    }

    async fn findings_accept_by_filter(&self, filter: FindingFilter) -> Result<usize> {
        self.findings.accept_by_filter(&filter).await
    }

    async fn findings_clear(&self) -> Result<usize> {
        self.findings.clear().await
    }

    async fn findings_clear_analyser(&self, analyser: String) -> Result<usize> {
        self.findings.clear_analyser(&analyser).await
    }

    async fn findings_replace(
        &self,
        analyser: String,
        findings: Vec<NewFinding>,
    ) -> Result<usize> {
        self.findings.replace_for_analyser(&analyser, findings).await
    }
}

/// How the router chose to serve this invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    Direct,
    Ipc,
}

impl BackendMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendMode::Direct => "direct",
            BackendMode::Ipc => "ipc",
        }
    }
}

/// The selected backend plus how it was selected.
pub struct BackendHandle {
    pub backend: Arc<dyn Backend>,
    pub mode: BackendMode,
}

/// Select a backend for one CLI invocation.
///
/// 1. `AIDE_MEMORY_DB` set: always in-process (test isolation).
/// 2. Live socket for this database: dial it, ping with a 1 s deadline,
///    use the IPC adapter. One retry after a short delay covers a daemon
///    mid-restart; after that, fall back to in-process.
/// 3. Otherwise: in-process.
pub async fn open_backend(paths: &ProjectPaths, _config: &AideConfig) -> Result<BackendHandle> {
    let force_direct = std::env::var("AIDE_MEMORY_DB").is_ok();
    let socket = paths.socket_path();

    if !force_direct && socket.exists() {
        match IpcClient::connect(&socket).await {
            Ok(client) => {
                debug!(socket = %socket.display(), "using running daemon");
                return Ok(BackendHandle {
                    backend: Arc::new(client),
                    mode: BackendMode::Ipc,
                });
            }
            Err(first) => {
                // The daemon may be restarting; one more try, then direct.
                tokio::time::sleep(DIAL_RETRY_DELAY).await;
                match IpcClient::connect(&socket).await {
                    Ok(client) => {
                        return Ok(BackendHandle {
                            backend: Arc::new(client),
                            mode: BackendMode::Ipc,
                        });
                    }
                    Err(second) => {
                        warn!(
                            socket = %socket.display(),
                            first = %first,
                            second = %second,
                            "socket present but daemon unreachable, falling back to direct mode"
                        );
                    }
                }
            }
        }
    }

    let backend = DirectBackend::open(paths).await?;
    info!(root = %paths.root.display(), "opened stores in-process");
    Ok(BackendHandle {
        backend: Arc::new(backend),
        mode: BackendMode::Direct,
    })
}
