// IPC client adapter
// Implements the full Backend interface over the project socket. Calls are
// unary request/response frames; a few operations have no server method and
// fail with UnsupportedOverIpc.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::UnixStream;
use tokio::sync::Mutex;

use crate::backend::Backend;
use crate::code_indexer::IndexStats;
use crate::code_store::{CodeStats, ReferenceRecord, SymbolRecord};
use crate::decision_store::Decision;
use crate::error::StoreError;
use crate::finding_store::{Finding, FindingFilter, FindingStats, NewFinding};
use crate::ipc::proto::{Request, Response, StatusInfo};
use crate::memory_store::{Memory, MemoryFilter};
use crate::message_store::Message;
use crate::state_store::StateEntry;
use crate::task_store::Task;
use crate::text_index::TagFilter;
use crate::types::{MemoryCategory, SortableId, TaskStatus};

/// Liveness probe deadline for dial + ping.
const PING_DEADLINE: Duration = Duration::from_secs(1);
/// Per-call deadline once connected.
const CALL_DEADLINE: Duration = Duration::from_secs(10);

struct Connection {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: BufWriter<tokio::net::unix::OwnedWriteHalf>,
}

/// IPC adapter over one live connection. Calls serialise on the connection;
/// the daemon parallelises across connections, not within one.
pub struct IpcClient {
    socket_path: PathBuf,
    connection: Mutex<Connection>,
}

impl IpcClient {
    /// Dial the socket and verify liveness with a `Ping` under a 1 s
    /// deadline. Any failure here means the caller should fall back to
    /// direct mode.
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = tokio::time::timeout(PING_DEADLINE, UnixStream::connect(socket_path))
            .await
            .map_err(|_| anyhow::anyhow!("dial timed out"))?
            .with_context(|| format!("Failed to dial {}", socket_path.display()))?;
        let (read_half, write_half) = stream.into_split();
        let client = Self {
            socket_path: socket_path.to_path_buf(),
            connection: Mutex::new(Connection {
                reader: BufReader::new(read_half),
                writer: BufWriter::new(write_half),
            }),
        };

        tokio::time::timeout(PING_DEADLINE, client.call_value(&Request::Ping))
            .await
            .map_err(|_| anyhow::anyhow!("ping timed out"))??;
        Ok(client)
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn call_value(&self, request: &Request) -> Result<serde_json::Value> {
        let mut connection = self.connection.lock().await;
        let mut frame = serde_json::to_string(request).context("Failed to encode request")?;
        frame.push('\n');

        let exchange = async {
            connection.writer.write_all(frame.as_bytes()).await?;
            connection.writer.flush().await?;
            let mut line = String::new();
            let read = connection.reader.read_line(&mut line).await?;
            if read == 0 {
                anyhow::bail!("daemon closed the connection");
            }
            Ok::<String, anyhow::Error>(line)
        };
        let line = tokio::time::timeout(CALL_DEADLINE, exchange)
            .await
            .map_err(|_| anyhow::anyhow!("ipc call timed out after {CALL_DEADLINE:?}"))??;

        let response: Response =
            serde_json::from_str(&line).context("Failed to decode response")?;
        response.into_result()
    }

    async fn call<T: DeserializeOwned>(&self, request: &Request) -> Result<T> {
        let value = self.call_value(request).await?;
        serde_json::from_value(value).context("Unexpected response shape")
    }

    fn unsupported<T>(operation: &str) -> Result<T> {
        Err(StoreError::UnsupportedOverIpc(operation.to_string()).into())
    }
}

#[async_trait]
impl Backend for IpcClient {
    async fn ping(&self) -> Result<StatusInfo> {
        self.call(&Request::Ping).await
    }

    async fn memory_add(
        &self,
        content: String,
        category: MemoryCategory,
        tags: Vec<String>,
    ) -> Result<Memory> {
        self.call(&Request::MemoryAdd {
            content,
            category,
            tags,
        })
        .await
    }

    async fn memory_get(&self, id: SortableId) -> Result<Memory> {
        self.call(&Request::MemoryGet { id: id.to_string() }).await
    }

    async fn memory_update_tags(
        &self,
        id: SortableId,
        add: Vec<String>,
        remove: Vec<String>,
    ) -> Result<Memory> {
        // Native update method: ids stay stable across tag edits.
        self.call(&Request::MemoryUpdateTags {
            id: id.to_string(),
            add,
            remove,
        })
        .await
    }

    async fn memory_delete(&self, id: SortableId) -> Result<()> {
        self.call(&Request::MemoryDelete { id: id.to_string() }).await
    }

    async fn memory_list(&self, filter: MemoryFilter) -> Result<Vec<Memory>> {
        self.call(&Request::MemoryList { filter }).await
    }

    async fn memory_search(
        &self,
        query: String,
        min_score: f32,
        filter: TagFilter,
        limit: usize,
    ) -> Result<Vec<(Memory, f32)>> {
        self.call(&Request::MemorySearch {
            query,
            min_score,
            filter,
            limit,
        })
        .await
    }

    async fn memory_sessions(&self) -> Result<Vec<(String, usize, DateTime<Utc>)>> {
        self.call(&Request::MemorySessions).await
    }

    async fn memory_clear(&self) -> Result<usize> {
        self.call(&Request::MemoryClear).await
    }

    async fn memory_reindex(&self) -> Result<usize> {
        self.call(&Request::MemoryReindex).await
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
        self.call(&Request::DecisionSet {
            topic,
            decision,
            rationale,
            details,
            references,
            decided_by,
        })
        .await
    }

    async fn decision_get(&self, topic: String) -> Result<Decision> {
        self.call(&Request::DecisionGet { topic }).await
    }

    async fn decision_history(&self, topic: String) -> Result<Vec<Decision>> {
        self.call(&Request::DecisionHistory { topic }).await
    }

    async fn decision_list(&self) -> Result<Vec<Decision>> {
        self.call(&Request::DecisionList).await
    }

    async fn decision_delete_topic(&self, topic: String) -> Result<usize> {
        self.call(&Request::DecisionDeleteTopic { topic }).await
    }

    async fn decision_clear(&self) -> Result<usize> {
        self.call(&Request::DecisionClear).await
    }

    async fn state_set(&self, key: String, value: String) -> Result<StateEntry> {
        self.call(&Request::StateSet { key, value }).await
    }

    async fn state_get(&self, key: String) -> Result<StateEntry> {
        self.call(&Request::StateGet { key }).await
    }

    async fn state_delete(&self, key: String) -> Result<()> {
        self.call(&Request::StateDelete { key }).await
    }

    async fn state_list(&self, prefix: Option<String>) -> Result<Vec<StateEntry>> {
        self.call(&Request::StateList { prefix }).await
    }

    async fn state_clear(&self) -> Result<usize> {
        self.call(&Request::StateClear).await
    }

    async fn state_cleanup(&self, max_age_secs: i64) -> Result<usize> {
        self.call(&Request::StateCleanup { max_age_secs }).await
    }

    async fn message_send(
        &self,
        from: String,
        to: String,
        content: String,
        msg_type: String,
        ttl_secs: Option<i64>,
    ) -> Result<Message> {
        self.call(&Request::MessageSend {
            from,
            to,
            content,
            msg_type,
            ttl_secs,
        })
        .await
    }

    async fn message_list(&self, agent: String) -> Result<Vec<Message>> {
        self.call(&Request::MessageList { agent }).await
    }

    async fn message_ack(&self, id: u64, agent: String) -> Result<Message> {
        self.call(&Request::MessageAck { id, agent }).await
    }

    async fn message_prune(&self) -> Result<usize> {
        self.call(&Request::MessagePrune).await
    }

    async fn message_clear(&self) -> Result<usize> {
        self.call(&Request::MessageClear).await
    }

    async fn task_create(
        &self,
        title: String,
        description: String,
        worktree: Option<String>,
    ) -> Result<Task> {
        self.call(&Request::TaskCreate {
            title,
            description,
            worktree,
        })
        .await
    }

    async fn task_get(&self, id: SortableId) -> Result<Task> {
        self.call(&Request::TaskGet { id: id.to_string() }).await
    }

    async fn task_claim(&self, id: SortableId, agent: String) -> Result<Task> {
        self.call(&Request::TaskClaim {
            id: id.to_string(),
            agent,
        })
        .await
    }

    async fn task_complete(&self, id: SortableId, result: String) -> Result<Task> {
        self.call(&Request::TaskComplete {
            id: id.to_string(),
            result,
        })
        .await
    }

    async fn task_block(&self, id: SortableId, reason: Option<String>) -> Result<Task> {
        self.call(&Request::TaskBlock {
            id: id.to_string(),
            reason,
        })
        .await
    }

    async fn task_list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        self.call(&Request::TaskList { status }).await
    }

    async fn task_delete(&self, _id: SortableId) -> Result<()> {
        Self::unsupported("task delete")
    }

    async fn task_clear(&self, _status: Option<TaskStatus>) -> Result<usize> {
        Self::unsupported("task clear")
    }

    async fn code_index(&self, force: bool) -> Result<IndexStats> {
        self.call(&Request::CodeIndex { force }).await
    }

    async fn code_search(
        &self,
        query: String,
        limit: usize,
    ) -> Result<Vec<(SymbolRecord, f32)>> {
        self.call(&Request::CodeSearch { query, limit }).await
    }

    async fn code_symbols(&self, path: String) -> Result<Vec<SymbolRecord>> {
        self.call(&Request::CodeSymbols { path }).await
    }

    async fn code_references(&self, symbol: String) -> Result<Vec<ReferenceRecord>> {
        self.call(&Request::CodeReferences { symbol }).await
    }

    async fn code_stats(&self) -> Result<CodeStats> {
        self.call(&Request::CodeStats).await
    }

    async fn code_clear(&self) -> Result<()> {
        self.call(&Request::CodeClear).await
    }

    async fn findings_list(&self, filter: FindingFilter) -> Result<Vec<Finding>> {
        self.call(&Request::FindingsList { filter }).await
    }

    async fn findings_search(
        &self,
        query: String,
        filter: FindingFilter,
    ) -> Result<Vec<(Finding, f32)>> {
        self.call(&Request::FindingsSearch { query, filter }).await
    }

    async fn findings_stats(&self) -> Result<FindingStats> {
        self.call(&Request::FindingsStats).await
    }

    async fn findings_accept(&self, ids: Vec<String>) -> Result<usize> {
        self.call(&Request::FindingsAccept { ids }).await
    }

    async fn findings_accept_by_filter(&self, filter: FindingFilter) -> Result<usize> {
        self.call(&Request::FindingsAcceptByFilter { filter }).await
    }

    async fn findings_clear(&self) -> Result<usize> {
        self.call(&Request::FindingsClear).await
    }

    async fn findings_clear_analyser(&self, analyser: String) -> Result<usize> {
        self.call(&Request::FindingsClearAnalyser { analyser }).await
    }

    async fn findings_replace(
        &self,
        _analyser: String,
        _findings: Vec<NewFinding>,
    ) -> Result<usize> {
        Self::unsupported("replace findings")
    }
}
