//! Task entity, enums, and validation.
//!
//! Validation is deliberately asymmetric: structural problems (empty
//! title, oversized text) are rejected, while enum-like values coming in
//! as free text (priority) silently coerce to a safe default. Upstream
//! callers feed this API with text derived from natural language, so a
//! throwing parser for those fields would reject half their traffic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum title length in characters
pub const TITLE_MAX_LEN: usize = 500;

/// Maximum description length in characters
pub const DESCRIPTION_MAX_LEN: usize = 2000;

/// Task lifecycle status. Completion is derived: `status == Completed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Pending,
    InProgress,
    Completed,
    Deleted,
}

impl Status {
    /// Strict name lookup; filtering also accepts the `complete` /
    /// `incomplete` aliases, handled in the store's filter.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Status::Pending),
            "in_progress" => Some(Status::InProgress),
            "completed" => Some(Status::Completed),
            "deleted" => Some(Status::Deleted),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
            Status::Deleted => "deleted",
        }
    }

    pub fn is_completed(self) -> bool {
        matches!(self, Status::Completed)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task priority. Unrecognized input never fails: it coerces to `Medium`,
/// both at the API surface and when deserializing a persisted collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Permissive parser: anything that isn't `high`/`medium`/`low`
    /// (case-insensitive) is `Medium`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    /// Sort rank: high < medium < low.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

impl From<String> for Priority {
    fn from(value: String) -> Self {
        Priority::parse(&value)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single task in the collection.
///
/// Ids and timestamps are store-assigned; callers never supply them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurrence: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }

    /// Case-insensitive tag membership.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    /// Case-insensitive substring match on title or description.
    pub fn matches_keyword(&self, keyword: &str) -> bool {
        let keyword = keyword.to_lowercase();
        self.title.to_lowercase().contains(&keyword)
            || self.description.to_lowercase().contains(&keyword)
    }

    /// Full snapshot as a JSON value, for audit diffs and notifications.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Input for creating a task. The store assigns id and timestamps.
#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub recurrence: Option<String>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_title(&self.title)?;
        validate_description(&self.description)
    }
}

/// Partial update: `None` leaves the field untouched. The nested options
/// for `due_date` and `recurrence` distinguish "don't change" from
/// "clear".
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub tags: Option<Vec<String>>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub recurrence: Option<Option<String>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.tags.is_none()
            && self.due_date.is_none()
            && self.recurrence.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(description) = &self.description {
            validate_description(description)?;
        }
        Ok(())
    }
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::InvalidTask("title cannot be empty".to_string()));
    }
    let len = title.chars().count();
    if len > TITLE_MAX_LEN {
        return Err(Error::InvalidTask(format!(
            "title too long: {len} chars (max {TITLE_MAX_LEN})"
        )));
    }
    Ok(())
}

fn validate_description(description: &str) -> Result<()> {
    let len = description.chars().count();
    if len > DESCRIPTION_MAX_LEN {
        return Err(Error::InvalidTask(format!(
            "description too long: {len} chars (max {DESCRIPTION_MAX_LEN})"
        )));
    }
    Ok(())
}
