// IPC server
// Accept loop over the project socket, one task per connection. Handlers
// share the domain stores; writes serialise inside the KV engine, reads in
// different handlers proceed in parallel.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::ipc::proto::{Request, Response};

/// Running IPC listener.
pub struct IpcServer {
    socket_path: PathBuf,
    shutdown_tx: watch::Sender<bool>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl IpcServer {
    /// Bind the socket and start accepting. A stale socket file from a dead
    /// daemon is removed first.
    pub async fn start(socket_path: &Path, backend: Arc<dyn Backend>) -> Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path).with_context(|| {
                format!("Failed to remove stale socket: {}", socket_path.display())
            })?;
        }
        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("Failed to bind socket: {}", socket_path.display()))?;
        info!(socket = %socket_path.display(), "ipc server listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(Self::accept_loop(listener, backend, shutdown_rx));

        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            shutdown_tx,
            accept_task,
        })
    }

    async fn accept_loop(
        listener: UnixListener,
        backend: Arc<dyn Backend>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let backend = backend.clone();
                            let shutdown = shutdown_rx.clone();
                            // A panic inside a handler kills only this task
                            // (and therefore only this connection); the
                            // accept loop keeps serving.
                            connections.spawn(async move {
                                if let Err(e) =
                                    Self::serve_connection(stream, backend, shutdown).await
                                {
                                    debug!(error = %e, "connection ended with error");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        // Stop accepting, then drain in-flight handlers.
        drop(listener);
        while connections.join_next().await.is_some() {}
    }

    async fn serve_connection(
        stream: UnixStream,
        backend: Arc<dyn Backend>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        loop {
            // An in-flight request always completes before the next select,
            // so shutdown drains handlers but drops idle connections.
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            };
            let Some(line) = line else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<Request>(&line) {
                Ok(request) => dispatch(&request, backend.as_ref()).await,
                Err(e) => Response::Err {
                    kind: crate::ipc::proto::WireErrorKind::Invalid,
                    message: format!("malformed request: {e}"),
                },
            };
            let mut frame = serde_json::to_string(&response)?;
            frame.push('\n');
            write_half.write_all(frame.as_bytes()).await?;
        }
        Ok(())
    }

    /// Stop accepting, drain in-flight handlers, remove the socket file.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.accept_task.await {
            if !e.is_cancelled() {
                warn!(error = %e, "accept loop ended abnormally");
            }
        }
        let _ = std::fs::remove_file(&self.socket_path);
        info!(socket = %self.socket_path.display(), "ipc server stopped");
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// Map one request onto the backend. Every arm serialises its typed result;
/// errors are folded into wire error kinds.
pub async fn dispatch(request: &Request, backend: &dyn Backend) -> Response {
    macro_rules! respond {
        ($call:expr) => {
            match $call.await {
                Ok(value) => Response::ok(&value),
                Err(e) => Response::from_error(&e),
            }
        };
    }

    let parse_id = |raw: &str| crate::types::SortableId::parse(raw);

    match request {
        Request::Ping => respond!(backend.ping()),

        Request::MemoryAdd {
            content,
            category,
            tags,
        } => respond!(backend.memory_add(content.clone(), *category, tags.clone())),
        Request::MemoryGet { id } => match parse_id(id) {
            Ok(id) => respond!(backend.memory_get(id)),
            Err(e) => Response::from_error(&e),
        },
        Request::MemoryUpdateTags { id, add, remove } => match parse_id(id) {
            Ok(id) => respond!(backend.memory_update_tags(id, add.clone(), remove.clone())),
            Err(e) => Response::from_error(&e),
        },
        Request::MemoryDelete { id } => match parse_id(id) {
            Ok(id) => respond!(backend.memory_delete(id)),
            Err(e) => Response::from_error(&e),
        },
        Request::MemoryList { filter } => respond!(backend.memory_list(filter.clone())),
        Request::MemorySearch {
            query,
            min_score,
            filter,
            limit,
        } => respond!(backend.memory_search(query.clone(), *min_score, filter.clone(), *limit)),
        Request::MemorySessions => respond!(backend.memory_sessions()),
        Request::MemoryClear => respond!(backend.memory_clear()),
        Request::MemoryReindex => respond!(backend.memory_reindex()),

        Request::DecisionSet {
            topic,
            decision,
            rationale,
            details,
            references,
            decided_by,
        } => respond!(backend.decision_set(
            topic.clone(),
            decision.clone(),
            rationale.clone(),
            details.clone(),
            references.clone(),
            decided_by.clone()
        )),
        Request::DecisionGet { topic } => respond!(backend.decision_get(topic.clone())),
        Request::DecisionHistory { topic } => respond!(backend.decision_history(topic.clone())),
        Request::DecisionList => respond!(backend.decision_list()),
        Request::DecisionDeleteTopic { topic } => {
            respond!(backend.decision_delete_topic(topic.clone()))
        }
        Request::DecisionClear => respond!(backend.decision_clear()),

        Request::StateSet { key, value } => {
            respond!(backend.state_set(key.clone(), value.clone()))
        }
        Request::StateGet { key } => respond!(backend.state_get(key.clone())),
        Request::StateDelete { key } => respond!(backend.state_delete(key.clone())),
        Request::StateList { prefix } => respond!(backend.state_list(prefix.clone())),
        Request::StateClear => respond!(backend.state_clear()),
        Request::StateCleanup { max_age_secs } => {
            respond!(backend.state_cleanup(*max_age_secs))
        }

        Request::MessageSend {
            from,
            to,
            content,
            msg_type,
            ttl_secs,
        } => respond!(backend.message_send(
            from.clone(),
            to.clone(),
            content.clone(),
            msg_type.clone(),
            *ttl_secs
        )),
        Request::MessageList { agent } => respond!(backend.message_list(agent.clone())),
        Request::MessageAck { id, agent } => respond!(backend.message_ack(*id, agent.clone())),
        Request::MessagePrune => respond!(backend.message_prune()),
        Request::MessageClear => respond!(backend.message_clear()),

        Request::TaskCreate {
            title,
            description,
            worktree,
        } => respond!(backend.task_create(
            title.clone(),
            description.clone(),
            worktree.clone()
        )),
        Request::TaskGet { id } => match parse_id(id) {
            Ok(id) => respond!(backend.task_get(id)),
            Err(e) => Response::from_error(&e),
        },
        Request::TaskClaim { id, agent } => match parse_id(id) {
            Ok(id) => respond!(backend.task_claim(id, agent.clone())),
            Err(e) => Response::from_error(&e),
        },
        Request::TaskComplete { id, result } => match parse_id(id) {
            Ok(id) => respond!(backend.task_complete(id, result.clone())),
            Err(e) => Response::from_error(&e),
        },
        Request::TaskBlock { id, reason } => match parse_id(id) {
            Ok(id) => respond!(backend.task_block(id, reason.clone())),
            Err(e) => Response::from_error(&e),
        },
        Request::TaskList { status } => respond!(backend.task_list(*status)),

        Request::CodeIndex { force } => respond!(backend.code_index(*force)),
        Request::CodeSearch { query, limit } => {
            respond!(backend.code_search(query.clone(), *limit))
        }
        Request::CodeSymbols { path } => respond!(backend.code_symbols(path.clone())),
        Request::CodeReferences { symbol } => {
            respond!(backend.code_references(symbol.clone()))
        }
        Request::CodeStats => respond!(backend.code_stats()),
        Request::CodeClear => respond!(backend.code_clear()),

        Request::FindingsList { filter } => respond!(backend.findings_list(filter.clone())),
        Request::FindingsSearch { query, filter } => {
            respond!(backend.findings_search(query.clone(), filter.clone()))
        }
        Request::FindingsStats => respond!(backend.findings_stats()),
        Request::FindingsAccept { ids } => respond!(backend.findings_accept(ids.clone())),
        Request::FindingsAcceptByFilter { filter } => {
            respond!(backend.findings_accept_by_filter(filter.clone()))
        }
        Request::FindingsClear => respond!(backend.findings_clear()),
        Request::FindingsClearAnalyser { analyser } => {
            respond!(backend.findings_clear_analyser(analyser.clone()))
        }
    }
}
