// Aide CLI - per-project knowledge and code-intelligence backend
use anyhow::Result;
use clap::{Parser, Subcommand};

use aide::backend::{open_backend, Backend, BackendMode};
use aide::config::AideConfig;
use aide::error::{as_store_error, StoreError};
use aide::finding_store::FindingFilter;
use aide::memory_store::MemoryFilter;
use aide::outline::{render_outline, OutlineOptions};
use aide::paths::ProjectPaths;
use aide::share::ShareExporter;
use aide::text_index::TagFilter;
use aide::types::{MemoryCategory, Severity, SortableId, TaskStatus};

#[derive(Parser)]
#[command(name = "aide", version, about = "Project knowledge and code intelligence for AI coding agents")]
struct Cli {
    /// Show debug output
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(long, global = true)]
    quiet: bool,

    /// Emit structured JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Free-form notes with category and tags
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
    /// Code symbol index
    Code {
        #[command(subcommand)]
        action: CodeAction,
    },
    /// Units of work with claim semantics
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Append-only decision log
    Decision {
        #[command(subcommand)]
        action: DecisionAction,
    },
    /// Ephemeral inter-agent messages
    Message {
        #[command(subcommand)]
        action: MessageAction,
    },
    /// Keyed scratch-pad state
    State {
        #[command(subcommand)]
        action: StateAction,
    },
    /// Static-analysis findings
    Findings {
        #[command(subcommand)]
        action: FindingsAction,
    },
    /// Session lifecycle
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Export or import the shared markdown tree
    Share {
        #[command(subcommand)]
        action: ShareAction,
    },
    /// Run the long-lived server (IPC socket + stdio tool protocol)
    Daemon,
    /// Probe the daemon and report backend mode
    Status,
    /// Print the version
    Version,
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Add a memory
    Add {
        content: String,
        #[arg(long, default_value = "learning")]
        category: String,
        /// Comma-separated tags
        #[arg(long, default_value = "")]
        tags: String,
    },
    /// Show one memory (bumps its access count)
    Get { id: String },
    /// Delete one memory
    Delete { id: String },
    /// Edit tags: comma-separated add/remove sets
    Tag {
        id: String,
        #[arg(long, default_value = "")]
        add: String,
        #[arg(long, default_value = "")]
        remove: String,
    },
    /// Full-text search
    Search {
        query: String,
        #[arg(long, default_value_t = 0)]
        limit: usize,
        #[arg(long, default_value_t = 0.0)]
        min_score: f32,
        /// Include memories tagged `forget`
        #[arg(long)]
        all: bool,
    },
    /// List memories
    List {
        #[arg(long)]
        category: Option<String>,
        /// Comma-separated tags that must all be present
        #[arg(long, default_value = "")]
        tags: String,
        #[arg(long, default_value_t = 0)]
        limit: usize,
        #[arg(long)]
        all: bool,
    },
    /// Session summaries grouped by tag
    Sessions,
    /// Delete every memory
    Clear,
    /// Rebuild the search index from the KV rows
    Reindex,
}

#[derive(Subcommand)]
enum CodeAction {
    /// Index the project tree
    Index {
        #[arg(long)]
        force: bool,
    },
    /// Search indexed symbols
    Search {
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Symbols in one file (freshness-checked)
    Symbols { path: String },
    /// Call sites and type uses of a symbol
    References { symbol: String },
    /// Compact outline of a file
    Outline {
        path: String,
        #[arg(long)]
        strip_comments: bool,
    },
    /// Wipe the code index
    Clear,
    /// Index statistics
    Stats,
}

#[derive(Subcommand)]
enum TaskAction {
    Create {
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        worktree: Option<String>,
    },
    /// Atomically claim a pending task
    Claim {
        id: String,
        #[arg(long)]
        agent: String,
    },
    Complete {
        id: String,
        #[arg(long, default_value = "")]
        result: String,
    },
    Block {
        id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// Delete one task (direct mode only)
    Delete { id: String },
    /// Delete tasks by status, or all (direct mode only)
    Clear {
        #[arg(long)]
        status: Option<String>,
    },
}

#[derive(Subcommand)]
enum DecisionAction {
    /// Append a decision for a topic
    Set {
        topic: String,
        decision: String,
        #[arg(long, default_value = "")]
        rationale: String,
        #[arg(long, default_value = "")]
        details: String,
        /// Comma-separated references
        #[arg(long, default_value = "")]
        references: String,
        #[arg(long, default_value = "")]
        by: String,
    },
    /// Current decision for a topic
    Get { topic: String },
    /// Latest decision per topic
    List,
    /// Full history for a topic
    History { topic: String },
    /// Delete a topic and its history
    Delete { topic: String },
    Clear,
}

#[derive(Subcommand)]
enum MessageAction {
    Send {
        content: String,
        #[arg(long)]
        from: String,
        /// Empty = broadcast
        #[arg(long, default_value = "")]
        to: String,
        #[arg(long, default_value = "info")]
        r#type: String,
        /// Time to live in seconds
        #[arg(long)]
        ttl: Option<i64>,
    },
    List {
        #[arg(long)]
        agent: String,
    },
    Ack {
        id: u64,
        #[arg(long)]
        agent: String,
    },
    /// Remove expired messages
    Prune,
    Clear,
}

#[derive(Subcommand)]
enum StateAction {
    Set { key: String, value: String },
    Get { key: String },
    Delete { key: String },
    List {
        #[arg(long)]
        prefix: Option<String>,
    },
    Clear,
    /// Prune per-agent entries older than the given age
    Cleanup {
        #[arg(long, default_value_t = 86400)]
        max_age_secs: i64,
    },
}

#[derive(Subcommand)]
enum FindingsAction {
    List {
        #[arg(long)]
        analyser: Option<String>,
        #[arg(long)]
        severity: Option<String>,
        #[arg(long)]
        file: Option<String>,
        #[arg(long)]
        include_accepted: bool,
        #[arg(long, default_value_t = 0)]
        limit: i64,
    },
    Search {
        query: String,
        #[arg(long)]
        analyser: Option<String>,
        #[arg(long, default_value_t = 0)]
        limit: i64,
    },
    Stats,
    /// Accept findings by id (hides them from default listings)
    Accept {
        ids: Vec<String>,
        #[arg(long)]
        analyser: Option<String>,
        #[arg(long)]
        file: Option<String>,
    },
    Clear {
        #[arg(long)]
        analyser: Option<String>,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Create the .aide state tree and record a session marker
    Init {
        /// Session name; recorded as a tag on the session memory
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Subcommand)]
enum ShareAction {
    /// Write the shared markdown tree
    Export {
        /// Include everything, not only shareable memories
        #[arg(long)]
        all: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Read the shared markdown tree back into the stores
    Import {
        #[arg(long)]
        dry_run: bool,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = aide::init_logging_with_level(cli.verbose, cli.quiet) {
        eprintln!("failed to initialise logging: {e:#}");
    }

    match run(cli).await {
        Ok(()) => {}
        Err(e) => {
            let code = match as_store_error(&e) {
                Some(store_error) => {
                    eprintln!("aide: {store_error}");
                    store_error.exit_code()
                }
                None => {
                    eprintln!("aide: {e:#}");
                    1
                }
            };
            std::process::exit(code);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Version needs no stores at all.
    if matches!(cli.command, Command::Version) {
        println!("aide {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let paths = ProjectPaths::discover()?;
    let config = AideConfig::load(&paths.config_file())?;

    if matches!(cli.command, Command::Daemon) {
        return aide::daemon::run(paths, config).await;
    }

    // Share works on the stores directly (it needs id-preserving inserts),
    // so it bypasses the router.
    if let Command::Share { action } = &cli.command {
        return run_share(action, &paths, cli.json).await;
    }

    let handle = open_backend(&paths, &config).await?;
    let backend = handle.backend.clone();

    match cli.command {
        Command::Version | Command::Daemon | Command::Share { .. } => unreachable!(),
        Command::Status => {
            let status = backend.ping().await?;
            if cli.json {
                print_json(&serde_json::json!({
                    "mode": handle.mode.as_str(),
                    "version": status.version,
                    "pid": status.pid,
                    "uptime_secs": status.uptime_secs,
                }))?;
            } else {
                match handle.mode {
                    BackendMode::Ipc => println!(
                        "daemon running (pid {}, up {}s, v{})",
                        status.pid, status.uptime_secs, status.version
                    ),
                    BackendMode::Direct => {
                        println!("no daemon; stores opened in-process (v{})", status.version)
                    }
                }
            }
            Ok(())
        }
        Command::Session { action } => match action {
            SessionAction::Init { name } => {
                for dir in [
                    paths.memory_db().parent().map(|p| p.to_path_buf()),
                    paths.code_db().parent().map(|p| p.to_path_buf()),
                    paths.findings_db().parent().map(|p| p.to_path_buf()),
                    Some(paths.shared_dir()),
                    paths.config_file().parent().map(|p| p.to_path_buf()),
                ]
                .into_iter()
                .flatten()
                {
                    std::fs::create_dir_all(&dir)?;
                }
                let tags = name
                    .as_deref()
                    .map(|n| vec![format!("session:{n}")])
                    .unwrap_or_default();
                backend
                    .memory_add(
                        format!(
                            "session started{}",
                            name.map(|n| format!(" ({n})")).unwrap_or_default()
                        ),
                        MemoryCategory::Session,
                        tags,
                    )
                    .await?;
                println!("initialised {}", paths.state_dir().display());
                Ok(())
            }
        },
        Command::Memory { action } => run_memory(action, backend.as_ref(), cli.json).await,
        Command::Code { action } => run_code(action, backend.as_ref(), &paths, cli.json).await,
        Command::Task { action } => run_task(action, backend.as_ref(), cli.json).await,
        Command::Decision { action } => run_decision(action, backend.as_ref(), cli.json).await,
        Command::Message { action } => run_message(action, backend.as_ref(), cli.json).await,
        Command::State { action } => run_state(action, backend.as_ref(), cli.json).await,
        Command::Findings { action } => run_findings(action, backend.as_ref(), cli.json).await,
    }
}

async fn run_memory(action: MemoryAction, backend: &dyn Backend, json: bool) -> Result<()> {
    match action {
        MemoryAction::Add {
            content,
            category,
            tags,
        } => {
            let memory = backend
                .memory_add(content, MemoryCategory::parse(&category)?, parse_csv(&tags))
                .await?;
            if json {
                print_json(&memory)?;
            } else {
                println!("added memory {}", memory.id);
            }
        }
        MemoryAction::Get { id } => {
            let memory = backend.memory_get(SortableId::parse(&id)?).await?;
            if json {
                print_json(&memory)?;
            } else {
                println!("[{}] {}", memory.category, memory.id);
                if !memory.tags.is_empty() {
                    println!(
                        "tags: {}",
                        memory.tags.iter().cloned().collect::<Vec<_>>().join(", ")
                    );
                }
                println!("{}", memory.content);
            }
        }
        MemoryAction::Delete { id } => {
            backend.memory_delete(SortableId::parse(&id)?).await?;
            if !json {
                println!("deleted {id}");
            }
        }
        MemoryAction::Tag { id, add, remove } => {
            let memory = backend
                .memory_update_tags(SortableId::parse(&id)?, parse_csv(&add), parse_csv(&remove))
                .await?;
            if json {
                print_json(&memory)?;
            } else {
                println!(
                    "tags now: {}",
                    memory.tags.iter().cloned().collect::<Vec<_>>().join(", ")
                );
            }
        }
        MemoryAction::Search {
            query,
            limit,
            min_score,
            all,
        } => {
            let filter = if all { TagFilter::IncludeAll } else { TagFilter::Default };
            let hits = backend.memory_search(query, min_score, filter, limit).await?;
            if json {
                print_json(&hits)?;
            } else if hits.is_empty() {
                println!("no matches");
            } else {
                for (memory, score) in hits {
                    let first = memory.content.lines().next().unwrap_or("");
                    println!("{score:5.2}  [{}] {}  {first}", memory.category, memory.id);
                }
            }
        }
        MemoryAction::List {
            category,
            tags,
            limit,
            all,
        } => {
            let filter = MemoryFilter {
                category: category.map(|c| MemoryCategory::parse(&c)).transpose()?,
                tags: parse_csv(&tags),
                include_all: all,
                limit,
            };
            let memories = backend.memory_list(filter).await?;
            if json {
                print_json(&memories)?;
            } else {
                for memory in memories {
                    let first = memory.content.lines().next().unwrap_or("");
                    println!("[{}] {}  {first}", memory.category, memory.id);
                }
            }
        }
        MemoryAction::Sessions => {
            let sessions = backend.memory_sessions().await?;
            if json {
                print_json(&sessions)?;
            } else {
                for (tag, count, latest) in sessions {
                    println!("{tag}: {count} memories, latest {latest}");
                }
            }
        }
        MemoryAction::Clear => {
            let removed = backend.memory_clear().await?;
            println!("removed {removed} memories");
        }
        MemoryAction::Reindex => {
            let count = backend.memory_reindex().await?;
            println!("reindexed {count} memories");
        }
    }
    Ok(())
}

async fn run_code(
    action: CodeAction,
    backend: &dyn Backend,
    paths: &ProjectPaths,
    json: bool,
) -> Result<()> {
    match action {
        CodeAction::Index { force } => {
            let stats = backend.code_index(force).await?;
            if json {
                print_json(&stats)?;
            } else {
                println!(
                    "indexed {} files ({} skipped), {} symbols",
                    stats.files_indexed, stats.files_skipped, stats.symbols_indexed
                );
            }
        }
        CodeAction::Search { query, limit } => {
            let hits = backend.code_search(query, limit).await?;
            if json {
                print_json(&hits)?;
            } else {
                for (symbol, score) in hits {
                    println!(
                        "{score:5.2}  {}:{}  {} ({})",
                        symbol.file_path, symbol.start_line, symbol.name, symbol.kind
                    );
                }
            }
        }
        CodeAction::Symbols { path } => {
            let symbols = backend.code_symbols(path).await?;
            if json {
                print_json(&symbols)?;
            } else {
                for symbol in symbols {
                    println!("{:>5}  {:<9} {}", symbol.start_line, symbol.kind.as_str(), symbol.signature);
                }
            }
        }
        CodeAction::References { symbol } => {
            let refs = backend.code_references(symbol).await?;
            if json {
                print_json(&refs)?;
            } else {
                for r in refs {
                    println!("{}:{}:{}  {}", r.file_path, r.line, r.column, r.context);
                }
            }
        }
        CodeAction::Outline {
            path,
            strip_comments,
        } => {
            let symbols = backend.code_symbols(path.clone()).await?;
            let source = std::fs::read_to_string(paths.root.join(&path))?;
            let outline = render_outline(&source, &symbols, &OutlineOptions { strip_comments });
            print!("{outline}");
        }
        CodeAction::Clear => {
            backend.code_clear().await?;
            println!("code index cleared");
        }
        CodeAction::Stats => {
            let stats = backend.code_stats().await?;
            if json {
                print_json(&stats)?;
            } else {
                println!(
                    "{} files, {} symbols, {} references",
                    stats.files, stats.symbols, stats.references
                );
                for (language, count) in &stats.by_language {
                    println!("  {language}: {count}");
                }
            }
        }
    }
    Ok(())
}

async fn run_task(action: TaskAction, backend: &dyn Backend, json: bool) -> Result<()> {
    match action {
        TaskAction::Create {
            title,
            description,
            worktree,
        } => {
            let task = backend.task_create(title, description, worktree).await?;
            if json {
                print_json(&task)?;
            } else {
                println!("created task {}", task.id);
            }
        }
        TaskAction::Claim { id, agent } => {
            let task = backend.task_claim(SortableId::parse(&id)?, agent).await?;
            if json {
                print_json(&task)?;
            } else {
                println!(
                    "claimed {} for {}",
                    task.id,
                    task.claimed_by.as_deref().unwrap_or("?")
                );
            }
        }
        TaskAction::Complete { id, result } => {
            let task = backend.task_complete(SortableId::parse(&id)?, result).await?;
            if json {
                print_json(&task)?;
            } else {
                println!("done: {}", task.title);
            }
        }
        TaskAction::Block { id, reason } => {
            let task = backend.task_block(SortableId::parse(&id)?, reason).await?;
            if json {
                print_json(&task)?;
            } else {
                println!("blocked: {}", task.title);
            }
        }
        TaskAction::List { status } => {
            let status = status.map(|s| TaskStatus::parse(&s)).transpose()?;
            let tasks = backend.task_list(status).await?;
            if json {
                print_json(&tasks)?;
            } else {
                for task in tasks {
                    println!(
                        "[{}] {}  {}{}",
                        task.status,
                        task.id,
                        task.title,
                        task.claimed_by
                            .as_deref()
                            .map(|a| format!("  ({a})"))
                            .unwrap_or_default()
                    );
                }
            }
        }
        TaskAction::Delete { id } => {
            backend.task_delete(SortableId::parse(&id)?).await?;
            println!("deleted {id}");
        }
        TaskAction::Clear { status } => {
            let status = status.map(|s| TaskStatus::parse(&s)).transpose()?;
            let removed = backend.task_clear(status).await?;
            println!("removed {removed} tasks");
        }
    }
    Ok(())
}

async fn run_decision(action: DecisionAction, backend: &dyn Backend, json: bool) -> Result<()> {
    match action {
        DecisionAction::Set {
            topic,
            decision,
            rationale,
            details,
            references,
            by,
        } => {
            let record = backend
                .decision_set(topic, decision, rationale, details, parse_csv(&references), by)
                .await?;
            if json {
                print_json(&record)?;
            } else {
                println!("recorded decision for '{}'", record.topic);
            }
        }
        DecisionAction::Get { topic } => {
            let decision = backend.decision_get(topic).await?;
            if json {
                print_json(&decision)?;
            } else {
                println!("{}: {}", decision.topic, decision.decision);
                if !decision.rationale.is_empty() {
                    println!("rationale: {}", decision.rationale);
                }
            }
        }
        DecisionAction::List => {
            let decisions = backend.decision_list().await?;
            if json {
                print_json(&decisions)?;
            } else {
                for decision in decisions {
                    println!("{}: {}", decision.topic, decision.decision);
                }
            }
        }
        DecisionAction::History { topic } => {
            let history = backend.decision_history(topic).await?;
            if json {
                print_json(&history)?;
            } else {
                for decision in history {
                    println!("{}  {}", decision.created_at, decision.decision);
                }
            }
        }
        DecisionAction::Delete { topic } => {
            let removed = backend.decision_delete_topic(topic).await?;
            println!("removed {removed} appends");
        }
        DecisionAction::Clear => {
            let removed = backend.decision_clear().await?;
            println!("removed {removed} appends");
        }
    }
    Ok(())
}

async fn run_message(action: MessageAction, backend: &dyn Backend, json: bool) -> Result<()> {
    match action {
        MessageAction::Send {
            content,
            from,
            to,
            r#type,
            ttl,
        } => {
            let message = backend.message_send(from, to, content, r#type, ttl).await?;
            if json {
                print_json(&message)?;
            } else {
                println!("sent message {}", message.id);
            }
        }
        MessageAction::List { agent } => {
            let messages = backend.message_list(agent).await?;
            if json {
                print_json(&messages)?;
            } else {
                for message in messages {
                    let target = if message.is_broadcast() {
                        "all".to_string()
                    } else {
                        message.to.clone()
                    };
                    println!(
                        "#{} {} -> {}  [{}]  {}",
                        message.id, message.from, target, message.msg_type, message.content
                    );
                }
            }
        }
        MessageAction::Ack { id, agent } => {
            backend.message_ack(id, agent).await?;
            println!("acknowledged #{id}");
        }
        MessageAction::Prune => {
            let removed = backend.message_prune().await?;
            println!("pruned {removed} messages");
        }
        MessageAction::Clear => {
            let removed = backend.message_clear().await?;
            println!("removed {removed} messages");
        }
    }
    Ok(())
}

async fn run_state(action: StateAction, backend: &dyn Backend, json: bool) -> Result<()> {
    match action {
        StateAction::Set { key, value } => {
            let entry = backend.state_set(key, value).await?;
            if json {
                print_json(&entry)?;
            } else {
                println!("set {}", entry.key);
            }
        }
        StateAction::Get { key } => {
            let entry = backend.state_get(key).await?;
            if json {
                print_json(&entry)?;
            } else {
                println!("{}", entry.value);
            }
        }
        StateAction::Delete { key } => {
            backend.state_delete(key.clone()).await?;
            println!("deleted {key}");
        }
        StateAction::List { prefix } => {
            let entries = backend.state_list(prefix).await?;
            if json {
                print_json(&entries)?;
            } else {
                for entry in entries {
                    println!("{} = {}", entry.key, entry.value);
                }
            }
        }
        StateAction::Clear => {
            let removed = backend.state_clear().await?;
            println!("removed {removed} entries");
        }
        StateAction::Cleanup { max_age_secs } => {
            let removed = backend.state_cleanup(max_age_secs).await?;
            println!("pruned {removed} stale agent entries");
        }
    }
    Ok(())
}

async fn run_findings(action: FindingsAction, backend: &dyn Backend, json: bool) -> Result<()> {
    match action {
        FindingsAction::List {
            analyser,
            severity,
            file,
            include_accepted,
            limit,
        } => {
            let filter = FindingFilter {
                analyser,
                severity: severity.map(|s| Severity::parse(&s)).transpose()?,
                file_path: file,
                include_accepted,
                limit,
                ..Default::default()
            };
            let findings = backend.findings_list(filter).await?;
            if json {
                print_json(&findings)?;
            } else {
                for finding in findings {
                    println!(
                        "{} [{}] {}:{}  {}",
                        finding.severity, finding.analyser, finding.file_path, finding.line,
                        finding.title
                    );
                }
            }
        }
        FindingsAction::Search {
            query,
            analyser,
            limit,
        } => {
            let filter = FindingFilter {
                analyser,
                limit,
                ..Default::default()
            };
            let hits = backend.findings_search(query, filter).await?;
            if json {
                print_json(&hits)?;
            } else {
                for (finding, score) in hits {
                    println!(
                        "{score:5.2}  {} {}:{}  {}",
                        finding.severity, finding.file_path, finding.line, finding.title
                    );
                }
            }
        }
        FindingsAction::Stats => {
            let stats = backend.findings_stats().await?;
            if json {
                print_json(&stats)?;
            } else {
                println!("{} findings ({} accepted)", stats.total, stats.accepted);
                for (analyser, count) in &stats.by_analyser {
                    println!("  {analyser}: {count}");
                }
                for (severity, count) in &stats.by_severity {
                    println!("  {severity}: {count}");
                }
            }
        }
        FindingsAction::Accept {
            ids,
            analyser,
            file,
        } => {
            let accepted = if ids.is_empty() {
                let filter = FindingFilter {
                    analyser,
                    file_path: file,
                    ..Default::default()
                };
                backend.findings_accept_by_filter(filter).await?
            } else {
                backend.findings_accept(ids).await?
            };
            println!("accepted {accepted} findings");
        }
        FindingsAction::Clear { analyser } => {
            let removed = match analyser {
                Some(name) => backend.findings_clear_analyser(name).await?,
                None => backend.findings_clear().await?,
            };
            println!("removed {removed} findings");
        }
    }
    Ok(())
}

async fn run_share(action: &ShareAction, paths: &ProjectPaths, json: bool) -> Result<()> {
    // Direct stores: import preserves memory ids, which has no IPC method.
    let backend = aide::backend::DirectBackend::open(paths).await.map_err(|e| {
        match as_store_error(&e) {
            Some(StoreError::Locked(_)) => anyhow::Error::new(StoreError::Locked(
                "share needs exclusive store access; stop the daemon first".into(),
            )),
            _ => e,
        }
    })?;
    let exporter = ShareExporter {
        memories: backend.memory_store(),
        decisions: backend.decision_store(),
    };
    let shared = paths.shared_dir();
    let report = match action {
        ShareAction::Export { all, dry_run } => exporter.export(&shared, *all, *dry_run).await?,
        ShareAction::Import { dry_run } => exporter.import(&shared, *dry_run).await?,
    };
    backend.close().await?;
    if json {
        print_json(&report)?;
    } else {
        let verb = if report.dry_run { "would touch" } else { "touched" };
        println!(
            "{verb} {} decisions, {} memories ({} skipped, {} stale files removed)",
            report.decisions, report.memories, report.skipped, report.stale_removed
        );
    }
    Ok(())
}
