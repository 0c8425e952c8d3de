// Aide - per-project knowledge and code-intelligence backend for AI coding agents
// Root library module

pub mod analysis;
pub mod backend;
pub mod code_indexer;
pub mod code_store;
pub mod combined_store;
pub mod config;
pub mod daemon;
pub mod decision_store;
pub mod error;
pub mod file_watcher;
pub mod finding_store;
pub mod ipc;
pub mod kv;
pub mod mcp;
pub mod memory_store;
pub mod message_store;
pub mod observability;
pub mod outline;
pub mod paths;
pub mod share;
pub mod state_store;
pub mod task_store;
pub mod text_index;
pub mod types;

// Code parsing module
pub mod parsing;

// Re-export key types
pub use observability::{init_logging, init_logging_with_level};

pub use error::{as_store_error, StoreError};

pub use types::{
    parse_tag_list, MemoryCategory, Severity, SortableId, TaskStatus, ValidatedTag,
};

pub use backend::{open_backend, Backend, BackendHandle, BackendMode, DirectBackend};

pub use combined_store::CombinedStore;
pub use kv::KvEngine;
pub use text_index::{IndexDocument, SearchHit, TagFilter, TextIndex};

pub use decision_store::{Decision, DecisionStore};
pub use finding_store::{Finding, FindingFilter, FindingStats, FindingStore, NewFinding};
pub use memory_store::{Memory, MemoryFilter, MemoryStore};
pub use message_store::{Message, MessageStore};
pub use state_store::{StateEntry, StateStore};
pub use task_store::{Task, TaskStore};

pub use code_indexer::{CodeIndexer, IndexStats};
pub use code_store::{CodeStats, CodeStore, FileInfo, ReferenceRecord, SymbolRecord};
pub use outline::{render_outline, OutlineOptions};

pub use file_watcher::{DebouncedWatcher, WatchSubscriber};
pub use paths::{find_project_root, socket_path_for, ProjectPaths};
pub use share::{is_shareable, ShareExporter, ShareReport};
