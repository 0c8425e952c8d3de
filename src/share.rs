// Share exporter
// Materialises decisions and memories into a human-diffable markdown tree
// under .aide/shared/ and imports it back. Writers and parsers are exact
// inverses; re-export reconciles stale files.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::decision_store::{Decision, DecisionStore};
use crate::memory_store::{Memory, MemoryStore};
use crate::types::MemoryCategory;

/// Outcome of an export or import run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShareReport {
    pub decisions: usize,
    pub memories: usize,
    pub skipped: usize,
    pub stale_removed: usize,
    pub dry_run: bool,
}

/// Filesystem-safe slug for a decision topic.
pub fn slugify(topic: &str) -> String {
    let mut slug = String::with_capacity(topic.len());
    let mut last_dash = true;
    for c in topic.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("topic");
    }
    slug
}

/// Memories travel when they are knowledge rather than session scratch:
/// category gotcha/pattern/decision, or explicitly scoped via tags.
pub fn is_shareable(memory: &Memory) -> bool {
    if memory.category == MemoryCategory::Session {
        return false;
    }
    if matches!(
        memory.category,
        MemoryCategory::Gotcha | MemoryCategory::Pattern | MemoryCategory::Decision
    ) {
        return true;
    }
    memory
        .tags
        .iter()
        .any(|t| t == "scope:global" || t.starts_with("project:"))
}

// ---------------------------------------------------------------------------
// Decision markdown
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct DecisionFrontMatter {
    topic: String,
    decision: String,
    decided_by: String,
    date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    references: Vec<String>,
}

/// Render one decision as markdown with YAML front-matter.
pub fn write_decision_markdown(decision: &Decision) -> Result<String> {
    let front = DecisionFrontMatter {
        topic: decision.topic.clone(),
        decision: decision.decision.clone(),
        decided_by: decision.decided_by.clone(),
        date: decision.created_at,
        references: decision.references.clone(),
    };
    let yaml = serde_yaml::to_string(&front).context("Failed to encode decision front-matter")?;
    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(&yaml);
    out.push_str("---\n\n");
    out.push_str("## Rationale\n\n");
    out.push_str(decision.rationale.trim());
    out.push_str("\n\n## Details\n\n");
    out.push_str(decision.details.trim());
    out.push('\n');
    Ok(out)
}

/// Inverse of [`write_decision_markdown`].
pub fn parse_decision_markdown(content: &str) -> Result<Decision> {
    let rest = content
        .strip_prefix("---\n")
        .context("decision file has no front-matter")?;
    let (yaml, body) = rest
        .split_once("\n---\n")
        .context("decision front-matter is unterminated")?;
    let front: DecisionFrontMatter =
        serde_yaml::from_str(yaml).context("Invalid decision front-matter")?;

    let rationale = section_of(body, "## Rationale");
    let details = section_of(body, "## Details");

    Ok(Decision {
        topic: front.topic,
        decision: front.decision,
        rationale,
        details,
        references: front.references,
        decided_by: front.decided_by,
        created_at: front.date,
    })
}

/// Text of one `## `-headed section, trimmed.
fn section_of(body: &str, heading: &str) -> String {
    let Some(start) = body.find(heading) else {
        return String::new();
    };
    let after = &body[start + heading.len()..];
    let end = after.find("\n## ").unwrap_or(after.len());
    after[..end].trim().to_string()
}

// ---------------------------------------------------------------------------
// Memory markdown
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct MemoryFileHeader {
    category: MemoryCategory,
    count: usize,
    exported: DateTime<Utc>,
}

fn first_line_truncated(content: &str, max: usize) -> String {
    let first = content.lines().next().unwrap_or("").trim();
    if first.chars().count() <= max {
        first.to_string()
    } else {
        let cut: String = first.chars().take(max).collect();
        format!("{cut}…")
    }
}

/// Render one category's memories as a markdown file.
pub fn write_memory_markdown(
    category: MemoryCategory,
    memories: &[&Memory],
    exported: DateTime<Utc>,
) -> Result<String> {
    let header = MemoryFileHeader {
        category,
        count: memories.len(),
        exported,
    };
    let yaml = serde_yaml::to_string(&header).context("Failed to encode memory file header")?;
    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(&yaml);
    out.push_str("---\n\n");

    for memory in memories {
        let tags = memory.tags.iter().cloned().collect::<Vec<_>>().join(",");
        out.push_str(&format!("### {}\n", first_line_truncated(&memory.content, 72)));
        // The comment carries everything the section title drops, so import
        // is lossless.
        out.push_str(&format!(
            "<!-- aide:id={}, tags={}, date={} -->\n\n",
            memory.id,
            tags,
            memory.created_at.to_rfc3339()
        ));
        out.push_str(memory.content.trim_end());
        out.push_str("\n\n---\n\n");
    }
    Ok(out)
}

/// One memory recovered from a shared markdown file.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedMemory {
    pub id: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub content: String,
}

/// Inverse of [`write_memory_markdown`]: the category plus every section.
pub fn parse_memory_markdown(content: &str) -> Result<(MemoryCategory, Vec<SharedMemory>)> {
    let rest = content
        .strip_prefix("---\n")
        .context("memory file has no header")?;
    let (yaml, body) = rest
        .split_once("\n---\n")
        .context("memory file header is unterminated")?;
    let header: MemoryFileHeader =
        serde_yaml::from_str(yaml).context("Invalid memory file header")?;

    let mut memories = Vec::new();
    for section in body.split("\n### ").skip(if body.trim_start().starts_with("### ") { 0 } else { 1 }) {
        let section = section.strip_prefix("### ").unwrap_or(section);
        let Some(comment_start) = section.find("<!-- aide:") else {
            continue;
        };
        let after_comment = &section[comment_start..];
        let Some(comment_end) = after_comment.find("-->") else {
            continue;
        };
        let comment = &after_comment["<!-- aide:".len()..comment_end];
        let mut id = String::new();
        let mut tags = Vec::new();
        let mut date = None;
        for part in comment.split(", ") {
            if let Some(value) = part.trim().strip_prefix("id=") {
                id = value.trim().to_string();
            } else if let Some(value) = part.trim().strip_prefix("tags=") {
                tags = value
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect();
            } else if let Some(value) = part.trim().strip_prefix("date=") {
                date = DateTime::parse_from_rfc3339(value.trim())
                    .ok()
                    .map(|d| d.with_timezone(&Utc));
            }
        }
        if id.is_empty() {
            continue;
        }

        let body_after = &after_comment[comment_end + "-->".len()..];
        let content_end = body_after.find("\n---").unwrap_or(body_after.len());
        let content = body_after[..content_end].trim().to_string();

        memories.push(SharedMemory {
            id,
            tags,
            created_at: date.unwrap_or_else(Utc::now),
            content,
        });
    }

    Ok((header.category, memories))
}

// ---------------------------------------------------------------------------
// Export / import
// ---------------------------------------------------------------------------

/// Share exporter over the direct domain stores.
pub struct ShareExporter<'a> {
    pub memories: &'a MemoryStore,
    pub decisions: &'a DecisionStore,
}

impl ShareExporter<'_> {
    /// Export decisions and shareable memories under `shared_dir`.
    ///
    /// Re-export computes the expected filename set and removes every other
    /// `.md` file so stale topics and categories never linger.
    pub async fn export(&self, shared_dir: &Path, all: bool, dry_run: bool) -> Result<ShareReport> {
        let mut report = ShareReport {
            dry_run,
            ..Default::default()
        };
        let decisions_dir = shared_dir.join("decisions");
        let memories_dir = shared_dir.join("memories");
        if !dry_run {
            std::fs::create_dir_all(&decisions_dir)?;
            std::fs::create_dir_all(&memories_dir)?;
        }

        // Decisions: one file per topic, latest append wins.
        let mut expected: BTreeSet<String> = BTreeSet::new();
        for decision in self.decisions.list().await? {
            let name = format!("{}.md", slugify(&decision.topic));
            expected.insert(name.clone());
            report.decisions += 1;
            if !dry_run {
                let content = write_decision_markdown(&decision)?;
                std::fs::write(decisions_dir.join(&name), content)
                    .with_context(|| format!("Failed to write decision {name}"))?;
            }
        }
        report.stale_removed += remove_stale(&decisions_dir, &expected, dry_run)?;

        // Memories: one file per category.
        let listed = self
            .memories
            .list(&crate::memory_store::MemoryFilter {
                include_all: true,
                ..Default::default()
            })
            .await?;
        let mut expected: BTreeSet<String> = BTreeSet::new();
        for category in MemoryCategory::ALL {
            let mut selected: Vec<&Memory> = listed
                .iter()
                .filter(|m| m.category == category && (all || is_shareable(m)))
                .collect();
            if category == MemoryCategory::Session && !all {
                selected.clear();
            }
            report.skipped += listed
                .iter()
                .filter(|m| m.category == category)
                .count()
                - selected.len();
            if selected.is_empty() {
                continue;
            }
            // Oldest first keeps diffs stable as new memories append.
            selected.sort_by_key(|m| m.created_at);
            // The header timestamp derives from the content, not the clock,
            // so an unchanged store re-exports byte-identically.
            let exported_at = selected
                .iter()
                .map(|m| m.updated_at)
                .max()
                .unwrap_or_else(Utc::now);
            let name = format!("{category}.md");
            expected.insert(name.clone());
            report.memories += selected.len();
            if !dry_run {
                let content = write_memory_markdown(category, &selected, exported_at)?;
                std::fs::write(memories_dir.join(&name), content)
                    .with_context(|| format!("Failed to write memories {name}"))?;
            }
        }
        report.stale_removed += remove_stale(&memories_dir, &expected, dry_run)?;

        Ok(report)
    }

    /// Import the shared tree back into the stores. Idempotent: a decision
    /// topic already holding the same decision text is skipped, as is a
    /// memory whose id already exists.
    pub async fn import(&self, shared_dir: &Path, dry_run: bool) -> Result<ShareReport> {
        let mut report = ShareReport {
            dry_run,
            ..Default::default()
        };

        let decisions_dir = shared_dir.join("decisions");
        for path in markdown_files(&decisions_dir)? {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let decision = parse_decision_markdown(&content)
                .with_context(|| format!("Invalid decision file {}", path.display()))?;
            let current = self.decisions.get(&decision.topic).await.ok();
            if current.map_or(false, |c| c.decision == decision.decision) {
                report.skipped += 1;
                continue;
            }
            report.decisions += 1;
            if !dry_run {
                self.decisions
                    .set(
                        decision.topic,
                        decision.decision,
                        decision.rationale,
                        decision.details,
                        decision.references,
                        decision.decided_by,
                    )
                    .await?;
            }
        }

        let memories_dir = shared_dir.join("memories");
        for path in markdown_files(&memories_dir)? {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let (category, shared) = parse_memory_markdown(&content)
                .with_context(|| format!("Invalid memory file {}", path.display()))?;
            for entry in shared {
                let Ok(id) = crate::types::SortableId::parse(&entry.id) else {
                    report.skipped += 1;
                    continue;
                };
                if self.memories.exists(&id).await? {
                    report.skipped += 1;
                    continue;
                }
                report.memories += 1;
                if !dry_run {
                    self.memories
                        .insert(Memory {
                            id,
                            content: entry.content,
                            category,
                            tags: entry.tags.into_iter().collect(),
                            created_at: entry.created_at,
                            updated_at: entry.created_at,
                            access_count: 0,
                        })
                        .await?;
                }
            }
        }

        Ok(report)
    }
}

fn markdown_files(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("md"))
        .collect();
    files.sort();
    Ok(files)
}

/// Remove every `.md` file not in the expected set. Returns the count.
fn remove_stale(dir: &Path, expected: &BTreeSet<String>, dry_run: bool) -> Result<usize> {
    let mut removed = 0usize;
    for path in markdown_files(dir)? {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !expected.contains(name) {
            removed += 1;
            if !dry_run {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove stale {}", path.display()))?;
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet as TagSet;

    fn decision(topic: &str, text: &str) -> Decision {
        Decision {
            topic: topic.to_string(),
            decision: text.to_string(),
            rationale: "Keeps the daemon stateless".to_string(),
            details: "Revisit when sessions need pinning.".to_string(),
            references: vec!["docs/auth.md".to_string()],
            decided_by: "w1".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn decision_markdown_round_trips() {
        let original = decision("auth-strategy", "JWT");
        let markdown = write_decision_markdown(&original).unwrap();
        let parsed = parse_decision_markdown(&markdown).unwrap();
        assert_eq!(parsed.topic, original.topic);
        assert_eq!(parsed.decision, original.decision);
        assert_eq!(parsed.rationale, original.rationale);
        assert_eq!(parsed.details, original.details);
        assert_eq!(parsed.references, original.references);
        assert_eq!(parsed.decided_by, original.decided_by);
    }

    #[test]
    fn memory_markdown_round_trips() {
        let mut tags = TagSet::new();
        tags.insert("scope:global".to_string());
        let memory = Memory {
            id: crate::types::SortableId::new(),
            content: "Watch out for the stale lock file\nIt survives crashes.".to_string(),
            category: MemoryCategory::Gotcha,
            tags,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            access_count: 3,
        };
        let markdown =
            write_memory_markdown(MemoryCategory::Gotcha, &[&memory], Utc::now()).unwrap();
        let (category, parsed) = parse_memory_markdown(&markdown).unwrap();
        assert_eq!(category, MemoryCategory::Gotcha);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, memory.id.to_string());
        assert_eq!(parsed[0].tags, vec!["scope:global"]);
        assert_eq!(parsed[0].content, memory.content);
    }

    #[test]
    fn slugs_are_filesystem_safe() {
        assert_eq!(slugify("Auth Strategy"), "auth-strategy");
        assert_eq!(slugify("db/pool size!!"), "db-pool-size");
        assert_eq!(slugify("---"), "topic");
    }

    #[test]
    fn shareability_rules() {
        let base = Memory {
            id: crate::types::SortableId::new(),
            content: "x".to_string(),
            category: MemoryCategory::Learning,
            tags: TagSet::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            access_count: 0,
        };
        assert!(!is_shareable(&base));

        let mut gotcha = base.clone();
        gotcha.category = MemoryCategory::Gotcha;
        assert!(is_shareable(&gotcha));

        let mut tagged = base.clone();
        tagged.tags.insert("project:billing".to_string());
        assert!(is_shareable(&tagged));

        let mut session = base.clone();
        session.category = MemoryCategory::Session;
        session.tags.insert("scope:global".to_string());
        assert!(!is_shareable(&session));
    }
}
