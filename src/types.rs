// Validated types and shared enumerations
// Strongly-typed wrappers that cannot be constructed with invalid data, plus
// the enumerated attributes shared across the domain stores.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Category of a memory note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Learning,
    Session,
    Decision,
    Gotcha,
    Pattern,
}

impl MemoryCategory {
    pub const ALL: [MemoryCategory; 5] = [
        MemoryCategory::Learning,
        MemoryCategory::Session,
        MemoryCategory::Decision,
        MemoryCategory::Gotcha,
        MemoryCategory::Pattern,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Learning => "learning",
            MemoryCategory::Session => "session",
            MemoryCategory::Decision => "decision",
            MemoryCategory::Gotcha => "gotcha",
            MemoryCategory::Pattern => "pattern",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "learning" => Ok(MemoryCategory::Learning),
            "session" => Ok(MemoryCategory::Session),
            "decision" => Ok(MemoryCategory::Decision),
            "gotcha" => Ok(MemoryCategory::Gotcha),
            "pattern" => Ok(MemoryCategory::Pattern),
            other => Err(crate::error::StoreError::Invalid(format!(
                "unknown memory category '{other}' (expected learning|session|decision|gotcha|pattern)"
            ))
            .into()),
        }
    }
}

impl fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Claimed,
    Done,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Claimed => "claimed",
            TaskStatus::Done => "done",
            TaskStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "claimed" => Ok(TaskStatus::Claimed),
            "done" => Ok(TaskStatus::Done),
            "blocked" => Ok(TaskStatus::Blocked),
            other => Err(crate::error::StoreError::Invalid(format!(
                "unknown task status '{other}' (expected pending|claimed|done|blocked)"
            ))
            .into()),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a static-analysis finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(crate::error::StoreError::Invalid(format!(
                "unknown severity '{other}' (expected info|warning|critical)"
            ))
            .into()),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A time-sortable identifier for memories and tasks.
///
/// UUIDv7 embeds a millisecond timestamp in its high bits, so lexicographic
/// order on the canonical rendering equals creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SortableId {
    inner: Uuid,
}

impl SortableId {
    pub fn new() -> Self {
        Self {
            inner: Uuid::now_v7(),
        }
    }

    /// Parse from string with validation.
    pub fn parse(s: &str) -> Result<Self> {
        let uuid = Uuid::parse_str(s)
            .map_err(|_| crate::error::StoreError::Invalid(format!("'{s}' is not a valid id")))?;
        ensure!(!uuid.is_nil(), "id cannot be the nil UUID");
        Ok(Self { inner: uuid })
    }

    pub fn as_uuid(&self) -> Uuid {
        self.inner
    }
}

impl Default for SortableId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SortableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

/// A tag that has been validated.
///
/// # Invariants
/// - Non-empty after trimming
/// - Length <= 128 characters
/// - No whitespace or commas (they are tag separators in the CLI and the
///   share format)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidatedTag {
    inner: String,
}

impl ValidatedTag {
    const MAX_LENGTH: usize = 128;

    pub fn new(tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        let trimmed = tag.trim();

        ensure!(!trimmed.is_empty(), "Tag cannot be empty");
        ensure!(
            trimmed.len() <= Self::MAX_LENGTH,
            "Tag exceeds maximum length of {} characters",
            Self::MAX_LENGTH
        );
        ensure!(
            !trimmed.chars().any(|c| c.is_whitespace() || c == ','),
            "Tag cannot contain whitespace or commas"
        );

        Ok(Self {
            inner: trimmed.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }
}

impl fmt::Display for ValidatedTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

/// Split a comma-separated tag list into validated tags, dropping empties.
pub fn parse_tag_list(raw: &str) -> Result<Vec<ValidatedTag>> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ValidatedTag::new)
        .collect()
}
