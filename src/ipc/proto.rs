// IPC wire protocol
// Line-delimited JSON frames over a local stream socket. Every domain
// operation is one unary request/response pair; shapes mirror the domain
// stores so the adapter stays mechanical.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::finding_store::FindingFilter;
use crate::memory_store::MemoryFilter;
use crate::text_index::TagFilter;
use crate::types::{MemoryCategory, TaskStatus};

/// One request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Request {
    Ping,

    MemoryAdd {
        content: String,
        category: MemoryCategory,
        tags: Vec<String>,
    },
    MemoryGet {
        id: String,
    },
    MemoryUpdateTags {
        id: String,
        add: Vec<String>,
        remove: Vec<String>,
    },
    MemoryDelete {
        id: String,
    },
    MemoryList {
        filter: MemoryFilter,
    },
    MemorySearch {
        query: String,
        min_score: f32,
        filter: TagFilter,
        limit: usize,
    },
    MemorySessions,
    MemoryClear,
    MemoryReindex,

    DecisionSet {
        topic: String,
        decision: String,
        rationale: String,
        details: String,
        references: Vec<String>,
        decided_by: String,
    },
    DecisionGet {
        topic: String,
    },
    DecisionHistory {
        topic: String,
    },
    DecisionList,
    DecisionDeleteTopic {
        topic: String,
    },
    DecisionClear,

    StateSet {
        key: String,
        value: String,
    },
    StateGet {
        key: String,
    },
    StateDelete {
        key: String,
    },
    StateList {
        prefix: Option<String>,
    },
    StateClear,
    StateCleanup {
        max_age_secs: i64,
    },

    MessageSend {
        from: String,
        to: String,
        content: String,
        msg_type: String,
        ttl_secs: Option<i64>,
    },
    MessageList {
        agent: String,
    },
    MessageAck {
        id: u64,
        agent: String,
    },
    MessagePrune,
    MessageClear,

    TaskCreate {
        title: String,
        description: String,
        worktree: Option<String>,
    },
    TaskGet {
        id: String,
    },
    TaskClaim {
        id: String,
        agent: String,
    },
    TaskComplete {
        id: String,
        result: String,
    },
    TaskBlock {
        id: String,
        reason: Option<String>,
    },
    TaskList {
        status: Option<TaskStatus>,
    },

    CodeIndex {
        force: bool,
    },
    CodeSearch {
        query: String,
        limit: usize,
    },
    CodeSymbols {
        path: String,
    },
    CodeReferences {
        symbol: String,
    },
    CodeStats,
    CodeClear,

    FindingsList {
        filter: FindingFilter,
    },
    FindingsSearch {
        query: String,
        filter: FindingFilter,
    },
    FindingsStats,
    FindingsAccept {
        ids: Vec<String>,
    },
    FindingsAcceptByFilter {
        filter: FindingFilter,
    },
    FindingsClear,
    FindingsClearAnalyser {
        analyser: String,
    },
}

/// Error kinds that cross the wire. `Io` doubles as the catch-all for
/// internal failures so the adapter can always reconstruct a StoreError.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireErrorKind {
    NotFound,
    AlreadyClaimed,
    Invalid,
    StoreCorrupt,
    Unsupported,
    Io,
}

/// One response frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok { result: Value },
    Err { kind: WireErrorKind, message: String },
}

impl Response {
    pub fn ok<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(result) => Response::Ok { result },
            Err(e) => Response::Err {
                kind: WireErrorKind::Io,
                message: format!("encode failed: {e}"),
            },
        }
    }

    pub fn from_error(err: &anyhow::Error) -> Self {
        let (kind, message) = match crate::error::as_store_error(err) {
            Some(StoreError::NotFound(what)) => (WireErrorKind::NotFound, what.clone()),
            Some(StoreError::AlreadyClaimed) => {
                (WireErrorKind::AlreadyClaimed, "task already claimed".into())
            }
            Some(StoreError::Invalid(what)) => (WireErrorKind::Invalid, what.clone()),
            Some(StoreError::StoreCorrupt(what)) => (WireErrorKind::StoreCorrupt, what.clone()),
            Some(StoreError::UnsupportedOverIpc(what)) => {
                (WireErrorKind::Unsupported, what.clone())
            }
            Some(StoreError::Locked(what)) => (WireErrorKind::Io, what.clone()),
            None => (WireErrorKind::Io, format!("{err:#}")),
        };
        Response::Err { kind, message }
    }

    /// Reconstruct the domain error on the client side.
    pub fn into_result(self) -> anyhow::Result<Value> {
        match self {
            Response::Ok { result } => Ok(result),
            Response::Err { kind, message } => Err(match kind {
                WireErrorKind::NotFound => StoreError::NotFound(message).into(),
                WireErrorKind::AlreadyClaimed => StoreError::AlreadyClaimed.into(),
                WireErrorKind::Invalid => StoreError::Invalid(message).into(),
                WireErrorKind::StoreCorrupt => StoreError::StoreCorrupt(message).into(),
                WireErrorKind::Unsupported => StoreError::UnsupportedOverIpc(message).into(),
                WireErrorKind::Io => anyhow::anyhow!("{}", message),
            }),
        }
    }
}

/// Status payload for `Ping`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub version: String,
    pub pid: u32,
    pub uptime_secs: u64,
}
