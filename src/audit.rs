//! Append-only audit log for task operations.
//!
//! Entries live in their own JSON array file, separate from the task
//! collection. Recording is best-effort from the caller's point of view:
//! the CLI logs and continues when a write fails, so a broken audit file
//! never blocks task work. Reads are likewise forgiving; an unparseable
//! log is reported through tracing and treated as empty rather than
//! poisoning every query.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, error};

use crate::error::Result;
use crate::lock::{lock_path_for, write_atomic, FileLock, DEFAULT_LOCK_TIMEOUT_MS};
use crate::task::Task;

/// Metadata string values are clipped to this many characters.
pub const METADATA_MAX_LEN: usize = 500;

/// Default page size for `query` and `task_history` when no limit is set.
pub const DEFAULT_QUERY_LIMIT: usize = 50;

/// Entity-type label for task entries; other producers may use their own.
pub const ENTITY_TASK: &str = "task";

/// Well-known event type names. Dotted `entity.action` form.
pub mod event {
    pub const TASK_CREATED: &str = "task.created";
    pub const TASK_UPDATED: &str = "task.updated";
    pub const TASK_DELETED: &str = "task.deleted";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_UNCOMPLETED: &str = "task.uncompleted";
    pub const TASK_SEARCHED: &str = "task.searched";
}

/// A single audit record. Ids are sequential from 1 and never reused
/// while the log exists; `clear` resets the sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: u64,
    pub event: String,
    #[serde(default)]
    pub entity_id: Option<u64>,
    #[serde(default = "default_entity_type")]
    pub entity_type: String,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    /// Structural diff or event-specific payload; `null` when empty.
    #[serde(default)]
    pub changes: Value,
    /// Free-form context, string values clipped at record time.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

fn default_entity_type() -> String {
    ENTITY_TASK.to_string()
}

/// AND-composed query predicates plus pagination.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub event: Option<String>,
    pub entity_id: Option<u64>,
    pub actor: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// The audit log, backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
    lock_timeout_ms: u64,
}

impl AuditLog {
    /// Open the log at the given path, creating an empty one if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let log = Self {
            path: path.into(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        };
        if !log.path.exists() {
            if let Some(parent) = log.path.parent() {
                fs::create_dir_all(parent)?;
            }
            write_atomic(&log.path, b"[]")?;
        }
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<FileLock> {
        FileLock::acquire(lock_path_for(&self.path), self.lock_timeout_ms)
    }

    /// Load every entry, oldest first. An unreadable or unparseable log
    /// is reported and treated as empty; audit reads never fail hard.
    fn load(&self) -> Vec<AuditEntry> {
        if !self.path.exists() {
            return Vec::new();
        }
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "failed to read audit log");
                return Vec::new();
            }
        };
        match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "audit log is unparseable");
                Vec::new()
            }
        }
    }

    fn save(&self, entries: &[AuditEntry]) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;
        write_atomic(&self.path, json.as_bytes())
    }

    /// Append one task entry. The log assigns the id and timestamp.
    pub fn record(
        &self,
        event: &str,
        task_id: Option<u64>,
        actor: &str,
        changes: Value,
        metadata: Map<String, Value>,
    ) -> Result<AuditEntry> {
        self.record_entity(event, task_id, ENTITY_TASK, actor, changes, metadata)
    }

    /// Append one entry for an arbitrary entity type.
    pub fn record_entity(
        &self,
        event: &str,
        entity_id: Option<u64>,
        entity_type: &str,
        actor: &str,
        changes: Value,
        metadata: Map<String, Value>,
    ) -> Result<AuditEntry> {
        let _lock = self.lock()?;
        let mut entries = self.load();
        let entry = AuditEntry {
            id: entries.iter().map(|e| e.id).max().unwrap_or(0) + 1,
            event: event.to_string(),
            entity_id,
            entity_type: entity_type.to_string(),
            actor: actor.to_string(),
            timestamp: Utc::now(),
            changes,
            metadata: clip_metadata(metadata),
        };
        debug!(id = entry.id, event = %entry.event, "recorded audit entry");
        entries.push(entry.clone());
        self.save(&entries)?;
        Ok(entry)
    }

    pub fn record_created(&self, task: &Task, actor: &str) -> Result<AuditEntry> {
        self.record(
            event::TASK_CREATED,
            Some(task.id),
            actor,
            json!({ "new": task.snapshot() }),
            title_metadata(&task.title),
        )
    }

    pub fn record_updated(&self, old: &Task, new: &Task, actor: &str) -> Result<AuditEntry> {
        self.record(
            event::TASK_UPDATED,
            Some(new.id),
            actor,
            diff(&old.snapshot(), &new.snapshot()),
            title_metadata(&new.title),
        )
    }

    pub fn record_deleted(&self, task: &Task, actor: &str) -> Result<AuditEntry> {
        self.record(
            event::TASK_DELETED,
            Some(task.id),
            actor,
            json!({ "deleted": task.snapshot() }),
            title_metadata(&task.title),
        )
    }

    /// Completion toggles record `task.completed` or `task.uncompleted`
    /// depending on the direction of the flip.
    pub fn record_toggled(&self, task: &Task, actor: &str) -> Result<AuditEntry> {
        let event = if task.is_completed() {
            event::TASK_COMPLETED
        } else {
            event::TASK_UNCOMPLETED
        };
        self.record(
            event,
            Some(task.id),
            actor,
            Value::Null,
            title_metadata(&task.title),
        )
    }

    pub fn record_searched(
        &self,
        keyword: &str,
        result_count: usize,
        actor: &str,
    ) -> Result<AuditEntry> {
        let mut metadata = Map::new();
        metadata.insert("keyword".to_string(), Value::String(keyword.to_string()));
        self.record(
            event::TASK_SEARCHED,
            None,
            actor,
            json!({ "results": result_count }),
            metadata,
        )
    }

    /// Query entries, newest first by timestamp (id as tiebreaker).
    /// Predicates AND-compose; pagination (offset then limit) applies
    /// after the newest-first ordering, so a given offset always means
    /// "skip the N most recent matches".
    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let mut entries: Vec<AuditEntry> = self
            .load()
            .into_iter()
            .filter(|e| {
                filter.event.as_deref().is_none_or(|ev| e.event == ev)
                    && filter.entity_id.is_none_or(|id| e.entity_id == Some(id))
                    && filter.actor.as_deref().is_none_or(|a| e.actor == a)
            })
            .collect();
        sort_newest_first(&mut entries);

        let offset = filter.offset.unwrap_or(0);
        let limit = filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
        entries.into_iter().skip(offset).take(limit).collect()
    }

    /// The most recent entries for one task, newest first.
    pub fn task_history(&self, task_id: u64, limit: Option<usize>) -> Vec<AuditEntry> {
        let mut entries: Vec<AuditEntry> = self
            .load()
            .into_iter()
            .filter(|e| e.entity_id == Some(task_id) && e.entity_type == ENTITY_TASK)
            .collect();
        sort_newest_first(&mut entries);
        entries.truncate(limit.unwrap_or(DEFAULT_QUERY_LIMIT));
        entries
    }

    /// Drop every entry and restart the id sequence. Returns the number
    /// of entries removed.
    pub fn clear(&self) -> Result<usize> {
        let _lock = self.lock()?;
        let removed = self.load().len();
        self.save(&[])?;
        Ok(removed)
    }
}

fn sort_newest_first(entries: &mut [AuditEntry]) {
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
}

/// Structural diff between two JSON object snapshots.
///
/// Produces `{field: {"old": .., "new": ..}}` for every field whose value
/// differs, including fields present on only one side (the missing side
/// reads as `null`). Non-object inputs diff as a single `"value"` field.
pub fn diff(old: &Value, new: &Value) -> Value {
    let (Some(old_map), Some(new_map)) = (old.as_object(), new.as_object()) else {
        if old == new {
            return json!({});
        }
        return json!({ "value": { "old": old, "new": new } });
    };

    let keys: BTreeSet<&String> = old_map.keys().chain(new_map.keys()).collect();
    let mut changes = serde_json::Map::new();
    for key in keys {
        let old_value = old_map.get(key).unwrap_or(&Value::Null);
        let new_value = new_map.get(key).unwrap_or(&Value::Null);
        if old_value != new_value {
            changes.insert(
                key.clone(),
                json!({ "old": old_value, "new": new_value }),
            );
        }
    }
    Value::Object(changes)
}

fn title_metadata(title: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("title".to_string(), Value::String(title.to_string()));
    metadata
}

fn clip_metadata(mut metadata: Map<String, Value>) -> Map<String, Value> {
    for value in metadata.values_mut() {
        if let Value::String(s) = value {
            if s.chars().count() > METADATA_MAX_LEN {
                *s = s.chars().take(METADATA_MAX_LEN).collect();
            }
        }
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn log_in(dir: &TempDir) -> AuditLog {
        AuditLog::open(dir.path().join("audit.json")).unwrap()
    }

    fn record_simple(log: &AuditLog, event: &str, task_id: u64, actor: &str) -> AuditEntry {
        log.record(event, Some(task_id), actor, Value::Null, Map::new())
            .unwrap()
    }

    #[test]
    fn entries_get_sequential_ids() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);

        for i in 1..=3u64 {
            let entry = record_simple(&log, event::TASK_CREATED, i, "alice");
            assert_eq!(entry.id, i);
        }
    }

    #[test]
    fn task_entries_carry_the_task_entity_type() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);

        let entry = record_simple(&log, event::TASK_CREATED, 1, "alice");
        assert_eq!(entry.entity_type, ENTITY_TASK);

        let other = log
            .record_entity("chat.message", Some(9), "chat", "alice", Value::Null, Map::new())
            .unwrap();
        assert_eq!(other.entity_type, "chat");
    }

    #[test]
    fn entity_type_defaults_when_absent_from_persisted_entries() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);

        let legacy = r#"[{
            "id": 1,
            "event": "task.created",
            "entity_id": 1,
            "actor": "alice",
            "timestamp": "2024-06-01T00:00:00Z",
            "changes": null
        }]"#;
        std::fs::write(log.path(), legacy).unwrap();

        let entries = log.query(&AuditFilter::default());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entity_type, ENTITY_TASK);
    }

    #[test]
    fn query_is_newest_first_with_pagination_after_sort() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);

        for i in 1..=5u64 {
            record_simple(&log, event::TASK_CREATED, i, "alice");
        }

        let filter = AuditFilter {
            limit: Some(2),
            offset: Some(1),
            ..AuditFilter::default()
        };
        let page = log.query(&filter);
        assert_eq!(page.iter().map(|e| e.id).collect::<Vec<_>>(), vec![4, 3]);
    }

    #[test]
    fn query_orders_by_timestamp_not_id() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);

        // A skewed clock can hand a lower id the later timestamp.
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let entry = |id: u64, timestamp| AuditEntry {
            id,
            event: event::TASK_CREATED.to_string(),
            entity_id: Some(id),
            entity_type: ENTITY_TASK.to_string(),
            actor: "alice".to_string(),
            timestamp,
            changes: Value::Null,
            metadata: Map::new(),
        };
        let entries = vec![entry(1, base + Duration::minutes(5)), entry(2, base)];
        std::fs::write(log.path(), serde_json::to_string(&entries).unwrap()).unwrap();

        let page = log.query(&AuditFilter::default());
        assert_eq!(page.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn query_predicates_and_compose() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);

        record_simple(&log, event::TASK_CREATED, 1, "alice");
        record_simple(&log, event::TASK_UPDATED, 1, "bob");
        record_simple(&log, event::TASK_UPDATED, 2, "alice");
        record_simple(&log, event::TASK_UPDATED, 1, "alice");

        let filter = AuditFilter {
            event: Some(event::TASK_UPDATED.to_string()),
            entity_id: Some(1),
            actor: Some("alice".to_string()),
            ..AuditFilter::default()
        };
        let matches = log.query(&filter);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, 4);
    }

    #[test]
    fn task_history_is_scoped_and_newest_first() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);

        record_simple(&log, event::TASK_CREATED, 1, "alice");
        record_simple(&log, event::TASK_CREATED, 2, "alice");
        record_simple(&log, event::TASK_COMPLETED, 1, "alice");
        log.record_entity("chat.message", Some(1), "chat", "alice", Value::Null, Map::new())
            .unwrap();

        let history = log.task_history(1, None);
        assert_eq!(history.iter().map(|e| e.id).collect::<Vec<_>>(), vec![3, 1]);
    }

    #[test]
    fn task_history_honors_the_limit() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);

        for _ in 0..4 {
            record_simple(&log, event::TASK_UPDATED, 1, "alice");
        }

        let history = log.task_history(1, Some(2));
        assert_eq!(history.iter().map(|e| e.id).collect::<Vec<_>>(), vec![4, 3]);
    }

    #[test]
    fn clear_resets_the_sequence() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);

        record_simple(&log, event::TASK_CREATED, 1, "alice");
        record_simple(&log, event::TASK_DELETED, 1, "alice");

        assert_eq!(log.clear().unwrap(), 2);
        assert!(log.query(&AuditFilter::default()).is_empty());

        let entry = record_simple(&log, event::TASK_CREATED, 2, "alice");
        assert_eq!(entry.id, 1);
    }

    #[test]
    fn corrupt_log_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        std::fs::write(log.path(), "not json at all").unwrap();

        assert!(log.query(&AuditFilter::default()).is_empty());
        // Recording over a corrupt log restarts the sequence rather than
        // failing the operation that triggered it.
        let entry = record_simple(&log, event::TASK_CREATED, 1, "alice");
        assert_eq!(entry.id, 1);
    }

    #[test]
    fn diff_reports_only_changed_fields() {
        let old = json!({ "title": "a", "priority": "medium", "tags": ["x"] });
        let new = json!({ "title": "b", "priority": "medium", "tags": ["x", "y"] });

        let changes = diff(&old, &new);
        assert_eq!(
            changes,
            json!({
                "title": { "old": "a", "new": "b" },
                "tags": { "old": ["x"], "new": ["x", "y"] },
            })
        );
    }

    #[test]
    fn diff_handles_one_sided_fields() {
        let old = json!({ "title": "a" });
        let new = json!({ "title": "a", "due_date": "2024-06-01T00:00:00Z" });

        let changes = diff(&old, &new);
        assert_eq!(
            changes,
            json!({ "due_date": { "old": null, "new": "2024-06-01T00:00:00Z" } })
        );
    }

    #[test]
    fn metadata_string_values_are_clipped() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);

        let mut metadata = Map::new();
        metadata.insert(
            "title".to_string(),
            Value::String("x".repeat(METADATA_MAX_LEN + 100)),
        );
        metadata.insert("count".to_string(), json!(42));

        let entry = log
            .record(event::TASK_CREATED, Some(1), "alice", Value::Null, metadata)
            .unwrap();
        let title = entry.metadata["title"].as_str().unwrap();
        assert_eq!(title.chars().count(), METADATA_MAX_LEN);
        assert_eq!(entry.metadata["count"], json!(42));
    }
}
