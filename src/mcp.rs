// Tool protocol server (stdio)
// Line-delimited JSON-RPC over stdin/stdout for the agent driver. A thin
// adapter over the domain stores: read-only views plus outline and code
// search. Logging goes to stderr; stdout carries only protocol frames.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::finding_store::FindingFilter;
use crate::memory_store::MemoryFilter;
use crate::outline::{render_outline, OutlineOptions};
use crate::paths::ProjectPaths;
use crate::text_index::TagFilter;
use crate::types::MemoryCategory;

const PROTOCOL_VERSION: &str = "2024-11-05";

/// One tool the agent can call.
struct ToolSpec {
    name: &'static str,
    description: &'static str,
    /// JSON schema for the parameters.
    schema: fn() -> Value,
}

const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "memory_search",
        description: "Full-text search over project memories",
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query; bare words match substrings"},
                    "limit": {"type": "integer", "description": "Maximum hits (0 = unlimited)"}
                },
                "required": ["query"]
            })
        },
    },
    ToolSpec {
        name: "memory_list",
        description: "List memories, optionally by category",
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "category": {"type": "string", "description": "learning|session|decision|gotcha|pattern"},
                    "limit": {"type": "integer"}
                }
            })
        },
    },
    ToolSpec {
        name: "state_get",
        description: "Read one state entry",
        schema: || {
            json!({
                "type": "object",
                "properties": {"key": {"type": "string", "description": "State key"}},
                "required": ["key"]
            })
        },
    },
    ToolSpec {
        name: "state_list",
        description: "List state entries, optionally by key prefix",
        schema: || {
            json!({
                "type": "object",
                "properties": {"prefix": {"type": "string", "description": "Key prefix filter"}}
            })
        },
    },
    ToolSpec {
        name: "decision_get",
        description: "Current decision for a topic",
        schema: || {
            json!({
                "type": "object",
                "properties": {"topic": {"type": "string", "description": "Decision topic"}},
                "required": ["topic"]
            })
        },
    },
    ToolSpec {
        name: "decision_list",
        description: "Latest decision per topic",
        schema: || json!({"type": "object", "properties": {}}),
    },
    ToolSpec {
        name: "message_list",
        description: "Unread messages for an agent identity",
        schema: || {
            json!({
                "type": "object",
                "properties": {"agent": {"type": "string", "description": "Agent id"}},
                "required": ["agent"]
            })
        },
    },
    ToolSpec {
        name: "code_search",
        description: "Search indexed code symbols",
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Symbol name or fragment"},
                    "limit": {"type": "integer"}
                },
                "required": ["query"]
            })
        },
    },
    ToolSpec {
        name: "code_symbols",
        description: "Symbols in one file (freshness-checked)",
        schema: || {
            json!({
                "type": "object",
                "properties": {"path": {"type": "string", "description": "Project-relative file path"}},
                "required": ["path"]
            })
        },
    },
    ToolSpec {
        name: "code_outline",
        description: "Compact outline of a file with callable bodies folded",
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Project-relative file path"},
                    "strip_comments": {"type": "boolean", "description": "Drop standalone comment lines"}
                },
                "required": ["path"]
            })
        },
    },
    ToolSpec {
        name: "findings_list",
        description: "Open static-analysis findings",
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "analyser": {"type": "string", "description": "Restrict to one analyser"},
                    "severity": {"type": "string", "description": "info|warning|critical"},
                    "limit": {"type": "integer"}
                }
            })
        },
    },
];

/// Stdio tool-protocol server.
pub struct McpServer {
    backend: Arc<dyn Backend>,
    paths: ProjectPaths,
}

impl McpServer {
    pub fn new(backend: Arc<dyn Backend>, paths: ProjectPaths) -> Self {
        Self { backend, paths }
    }

    /// Serve until stdin closes.
    pub async fn serve_stdio(&self) -> Result<()> {
        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut lines = BufReader::new(stdin).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let request: Value = match serde_json::from_str(&line) {
                Ok(value) => value,
                Err(e) => {
                    warn!(error = %e, "ignoring malformed protocol frame");
                    continue;
                }
            };
            let response = self.handle(&request).await;
            let mut frame = serde_json::to_string(&response)?;
            frame.push('\n');
            stdout.write_all(frame.as_bytes()).await?;
            stdout.flush().await?;
        }
        debug!("stdin closed, tool protocol server exiting");
        Ok(())
    }

    async fn handle(&self, request: &Value) -> Value {
        let method = request.get("method").and_then(Value::as_str).unwrap_or("");
        let id = request.get("id").cloned().unwrap_or(Value::Null);

        let result = match method {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {
                    "name": "aide",
                    "version": env!("CARGO_PKG_VERSION")
                },
                "capabilities": {"tools": {}}
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({
                "tools": TOOLS
                    .iter()
                    .map(|t| json!({
                        "name": t.name,
                        "description": t.description,
                        "inputSchema": (t.schema)()
                    }))
                    .collect::<Vec<_>>()
            })),
            "tools/call" => {
                let params = request.get("params").cloned().unwrap_or(Value::Null);
                let name = params.get("name").and_then(Value::as_str).unwrap_or("");
                let args = params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                self.call_tool(name, &args).await.map(|payload| {
                    json!({
                        "content": [{
                            "type": "text",
                            "text": serde_json::to_string_pretty(&payload)
                                .unwrap_or_else(|_| payload.to_string())
                        }]
                    })
                })
            }
            other => Err(anyhow::anyhow!("unknown method '{other}'")),
        };

        match result {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err(e) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32000, "message": format!("{e:#}")}
            }),
        }
    }

    async fn call_tool(&self, name: &str, args: &Value) -> Result<Value> {
        let str_arg = |key: &str| {
            args.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;

        match name {
            "memory_search" => {
                let query = str_arg("query").context("missing 'query'")?;
                let hits = self
                    .backend
                    .memory_search(query, 0.0, TagFilter::Default, limit)
                    .await?;
                Ok(serde_json::to_value(hits)?)
            }
            "memory_list" => {
                let filter = MemoryFilter {
                    category: str_arg("category")
                        .map(|c| MemoryCategory::parse(&c))
                        .transpose()?,
                    limit,
                    ..Default::default()
                };
                Ok(serde_json::to_value(self.backend.memory_list(filter).await?)?)
            }
            "state_get" => {
                let key = str_arg("key").context("missing 'key'")?;
                Ok(serde_json::to_value(self.backend.state_get(key).await?)?)
            }
            "state_list" => Ok(serde_json::to_value(
                self.backend.state_list(str_arg("prefix")).await?,
            )?),
            "decision_get" => {
                let topic = str_arg("topic").context("missing 'topic'")?;
                Ok(serde_json::to_value(self.backend.decision_get(topic).await?)?)
            }
            "decision_list" => Ok(serde_json::to_value(self.backend.decision_list().await?)?),
            "message_list" => {
                let agent = str_arg("agent").context("missing 'agent'")?;
                Ok(serde_json::to_value(self.backend.message_list(agent).await?)?)
            }
            "code_search" => {
                let query = str_arg("query").context("missing 'query'")?;
                Ok(serde_json::to_value(
                    self.backend.code_search(query, limit).await?,
                )?)
            }
            "code_symbols" => {
                let path = str_arg("path").context("missing 'path'")?;
                Ok(serde_json::to_value(self.backend.code_symbols(path).await?)?)
            }
            "code_outline" => {
                let path = str_arg("path").context("missing 'path'")?;
                let symbols = self.backend.code_symbols(path.clone()).await?;
                let source = std::fs::read_to_string(self.paths.root.join(&path))
                    .with_context(|| format!("Failed to read {path}"))?;
                let options = OutlineOptions {
                    strip_comments: args
                        .get("strip_comments")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                };
                Ok(json!({
                    "path": path,
                    "outline": render_outline(&source, &symbols, &options)
                }))
            }
            "findings_list" => {
                let filter = FindingFilter {
                    analyser: str_arg("analyser"),
                    severity: str_arg("severity")
                        .map(|s| crate::types::Severity::parse(&s))
                        .transpose()?,
                    limit: limit as i64,
                    ..Default::default()
                };
                Ok(serde_json::to_value(self.backend.findings_list(filter).await?)?)
            }
            other => anyhow::bail!("unknown tool '{other}'"),
        }
    }
}
