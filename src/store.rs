//! Task store: the sole owner of the persisted task collection.
//!
//! Every operation is a whole-collection round trip: lock, load the full
//! JSON array, mutate in memory, write the full array back atomically.
//! The collection is the unit of consistency; there are no partial writes
//! and no index files. This trades throughput for correctness, which is
//! the right trade at the hundreds-to-low-thousands scale this store is
//! built for. The per-collection file lock serializes mutating operations
//! across threads and processes, so two concurrent read-modify-write
//! cycles cannot interleave; the later writer still wins on content
//! (last-write-wins), but the collection itself can never be corrupted or
//! lose unrelated records.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::lock::{lock_path_for, write_atomic, FileLock, DEFAULT_LOCK_TIMEOUT_MS};
use crate::recurrence::next_due;
use crate::task::{Priority, Status, Task, TaskDraft, TaskPatch};

/// Store for the task collection, backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct TaskStore {
    path: PathBuf,
    lock_timeout_ms: u64,
}

impl TaskStore {
    /// Open a store at the given path, creating an empty collection file
    /// if none exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            path: path.into(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        };
        store.ensure_file()?;
        Ok(store)
    }

    /// Override the lock timeout (mainly for tests).
    pub fn with_lock_timeout(mut self, timeout_ms: u64) -> Self {
        self.lock_timeout_ms = timeout_ms;
        self
    }

    /// Path to the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_file(&self) -> Result<()> {
        if !self.path.exists() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            write_atomic(&self.path, b"[]")?;
        }
        Ok(())
    }

    fn lock(&self) -> Result<FileLock> {
        FileLock::acquire(lock_path_for(&self.path), self.lock_timeout_ms)
    }

    /// Load the full collection.
    ///
    /// A missing file is an empty collection; an unparseable file is a
    /// corrupt-storage failure, never silently treated as empty.
    pub fn load(&self) -> Result<Vec<Task>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|e| Error::CorruptStorage {
            path: self.path.clone(),
            detail: e.to_string(),
        })
    }

    fn save(&self, tasks: &[Task]) -> Result<()> {
        let json = serde_json::to_string_pretty(tasks)?;
        write_atomic(&self.path, json.as_bytes())
    }

    fn next_id(tasks: &[Task]) -> u64 {
        tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1
    }

    /// Add a new task. The store assigns the id and timestamps.
    pub fn add(&self, draft: TaskDraft) -> Result<Task> {
        draft.validate()?;

        let _lock = self.lock()?;
        let mut tasks = self.load()?;
        let now = Utc::now();
        let task = Task {
            id: Self::next_id(&tasks),
            title: draft.title,
            description: draft.description,
            status: Status::Pending,
            priority: draft.priority,
            tags: draft.tags,
            due_date: draft.due_date,
            recurrence: draft.recurrence,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        debug!(id = task.id, title = %task.title, "adding task");
        tasks.push(task.clone());
        self.save(&tasks)?;
        Ok(task)
    }

    /// All tasks in persisted (insertion) order.
    pub fn get_all(&self) -> Result<Vec<Task>> {
        self.load()
    }

    /// Look up a task by id. Absence is `None`, not an error.
    pub fn get_by_id(&self, id: u64) -> Result<Option<Task>> {
        Ok(self.load()?.into_iter().find(|t| t.id == id))
    }

    /// Merge a partial update over an existing task.
    ///
    /// Fields absent from the patch are untouched; `updated_at` is always
    /// restamped. A status change through the patch keeps the
    /// `completed_at` invariant (set on entry to completed, cleared on
    /// exit) but never synthesizes a recurrence successor; that only
    /// happens through `toggle_complete`.
    pub fn update(&self, id: u64, patch: TaskPatch) -> Result<Option<Task>> {
        patch.validate()?;

        let _lock = self.lock()?;
        let mut tasks = self.load()?;
        let Some(task) = tasks.iter_mut().find(|t| t.id == id) else {
            return Ok(None);
        };

        let was_completed = task.is_completed();
        if let Some(title) = patch.title {
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(tags) = patch.tags {
            task.tags = tags;
        }
        if let Some(due_date) = patch.due_date {
            task.due_date = due_date;
        }
        if let Some(recurrence) = patch.recurrence {
            task.recurrence = recurrence;
        }

        let now = Utc::now();
        task.updated_at = now;
        match (was_completed, task.is_completed()) {
            (false, true) => task.completed_at = Some(now),
            (true, false) => task.completed_at = None,
            _ => {}
        }

        let updated = task.clone();
        debug!(id, "updated task");
        self.save(&tasks)?;
        Ok(Some(updated))
    }

    /// Physically remove a task. Returns whether anything was removed.
    pub fn delete(&self, id: u64) -> Result<bool> {
        let _lock = self.lock()?;
        let mut tasks = self.load()?;
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        if tasks.len() == before {
            return Ok(false);
        }
        debug!(id, "deleted task");
        self.save(&tasks)?;
        Ok(true)
    }

    /// Flip a task between pending and completed.
    ///
    /// Completing a task that carries both a recurrence pattern and a due
    /// date appends exactly one successor: fresh id greater than every
    /// live id, same title/description/priority/tags/recurrence, due date
    /// advanced by the pattern, status pending. Un-completing never
    /// creates a successor and clears `completed_at`.
    pub fn toggle_complete(&self, id: u64) -> Result<Option<Task>> {
        let _lock = self.lock()?;
        let mut tasks = self.load()?;
        let Some(idx) = tasks.iter().position(|t| t.id == id) else {
            return Ok(None);
        };

        let now = Utc::now();
        let completing = !tasks[idx].is_completed();
        {
            let task = &mut tasks[idx];
            if completing {
                task.status = Status::Completed;
                task.completed_at = Some(now);
            } else {
                task.status = Status::Pending;
                task.completed_at = None;
            }
            task.updated_at = now;
        }
        let toggled = tasks[idx].clone();

        if completing {
            if let (Some(recurrence), Some(due)) =
                (toggled.recurrence.clone(), toggled.due_date)
            {
                if let Some(next) = next_due(due, &recurrence) {
                    let successor = Task {
                        id: Self::next_id(&tasks),
                        title: toggled.title.clone(),
                        description: toggled.description.clone(),
                        status: Status::Pending,
                        priority: toggled.priority,
                        tags: toggled.tags.clone(),
                        due_date: Some(next),
                        recurrence: Some(recurrence),
                        created_at: now,
                        updated_at: now,
                        completed_at: None,
                    };
                    debug!(
                        id = successor.id,
                        parent = toggled.id,
                        due = %next,
                        "created recurrence successor"
                    );
                    tasks.push(successor);
                }
            }
        }

        self.save(&tasks)?;
        Ok(Some(toggled))
    }

    /// Case-insensitive substring search over title and description,
    /// preserving collection order.
    pub fn search(&self, keyword: &str) -> Result<Vec<Task>> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|t| t.matches_keyword(keyword))
            .collect())
    }
}

/// Optional predicates for `filter_tasks`, AND-composed.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// `complete` / `incomplete`, or an exact status name. An
    /// unrecognized value disables the predicate rather than erroring.
    pub status: Option<String>,
    /// Permissively parsed: unknown values coerce to `medium`.
    pub priority: Option<String>,
    /// Case-insensitive tag membership.
    pub tag: Option<String>,
}

impl TaskFilter {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.priority.is_none() && self.tag.is_none()
    }
}

/// Filter a task list. Each predicate is independently optional; all
/// provided predicates must hold.
pub fn filter_tasks(tasks: &[Task], filter: &TaskFilter) -> Vec<Task> {
    let mut result: Vec<Task> = tasks.to_vec();

    if let Some(status) = filter.status.as_deref() {
        match status.trim().to_ascii_lowercase().as_str() {
            "complete" | "completed" => result.retain(|t| t.is_completed()),
            "incomplete" => result.retain(|t| !t.is_completed()),
            other => {
                if let Some(wanted) = Status::parse(other) {
                    result.retain(|t| t.status == wanted);
                }
            }
        }
    }

    if let Some(priority) = filter.priority.as_deref() {
        let wanted = Priority::parse(priority);
        result.retain(|t| t.priority == wanted);
    }

    if let Some(tag) = filter.tag.as_deref() {
        result.retain(|t| t.has_tag(tag));
    }

    result
}

/// Sort a task list by one of the supported keys.
///
/// - `due-date`: tasks with a due date first, ascending, then the rest in
///   their original relative order.
/// - `priority`: high, medium, low; stable among equals.
/// - `title`: case-insensitive lexicographic.
///
/// An unrecognized key returns the input unchanged.
pub fn sort_tasks(tasks: Vec<Task>, key: &str) -> Vec<Task> {
    match key.trim().to_ascii_lowercase().as_str() {
        "due-date" => {
            let (mut with_due, without_due): (Vec<Task>, Vec<Task>) =
                tasks.into_iter().partition(|t| t.due_date.is_some());
            with_due.sort_by_key(|t| t.due_date);
            with_due.extend(without_due);
            with_due
        }
        "priority" => {
            let mut sorted = tasks;
            sorted.sort_by_key(|t| t.priority.rank());
            sorted
        }
        "title" => {
            let mut sorted = tasks;
            sorted.sort_by_key(|t| t.title.to_lowercase());
            sorted
        }
        _ => tasks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> TaskStore {
        TaskStore::open(dir.path().join("tasks.json")).unwrap()
    }

    fn draft(title: &str) -> TaskDraft {
        TaskDraft::new(title)
    }

    #[test]
    fn ids_are_sequential_from_one() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        for i in 1..=4u64 {
            let task = store.add(draft(&format!("task {i}"))).unwrap();
            assert_eq!(task.id, i);
        }

        let all = store.get_all().unwrap();
        assert_eq!(all.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn deleted_ids_are_never_reused() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.add(draft("a")).unwrap();
        let b = store.add(draft("b")).unwrap();
        let c = store.add(draft("c")).unwrap();

        assert!(store.delete(b.id).unwrap());
        let d = store.add(draft("d")).unwrap();
        assert_eq!(d.id, c.id + 1);
    }

    #[test]
    fn delete_missing_is_false_not_error() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(!store.delete(99).unwrap());
    }

    #[test]
    fn get_by_id_absence_is_none() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.get_by_id(1).unwrap().is_none());
    }

    #[test]
    fn update_merges_partial_fields() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut d = draft("original");
        d.description = "keep me".to_string();
        d.tags = vec!["work".to_string()];
        let task = store.add(d).unwrap();

        let patch = TaskPatch {
            title: Some("renamed".to_string()),
            ..TaskPatch::default()
        };
        let updated = store.update(task.id, patch).unwrap().unwrap();
        assert_eq!(updated.title, "renamed");
        assert_eq!(updated.description, "keep me");
        assert_eq!(updated.tags, vec!["work".to_string()]);
        assert!(updated.updated_at >= updated.created_at);
    }

    #[test]
    fn update_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let patch = TaskPatch {
            title: Some("x".to_string()),
            ..TaskPatch::default()
        };
        assert!(store.update(42, patch).unwrap().is_none());
    }

    #[test]
    fn update_rejects_empty_title() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let task = store.add(draft("ok")).unwrap();
        let patch = TaskPatch {
            title: Some("  ".to_string()),
            ..TaskPatch::default()
        };
        assert!(store.update(task.id, patch).is_err());
    }

    #[test]
    fn update_status_maintains_completed_at() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let task = store.add(draft("t")).unwrap();

        let done = store
            .update(
                task.id,
                TaskPatch {
                    status: Some(Status::Completed),
                    ..TaskPatch::default()
                },
            )
            .unwrap()
            .unwrap();
        assert!(done.completed_at.is_some());

        let reopened = store
            .update(
                task.id,
                TaskPatch {
                    status: Some(Status::Pending),
                    ..TaskPatch::default()
                },
            )
            .unwrap()
            .unwrap();
        assert!(reopened.completed_at.is_none());
    }

    #[test]
    fn toggle_sets_and_clears_completed_at() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let task = store.add(draft("t")).unwrap();

        let done = store.toggle_complete(task.id).unwrap().unwrap();
        assert!(done.is_completed());
        assert!(done.completed_at.is_some());

        let undone = store.toggle_complete(task.id).unwrap().unwrap();
        assert!(!undone.is_completed());
        assert!(undone.completed_at.is_none());
    }

    #[test]
    fn completing_recurring_task_appends_one_successor() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let due = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        let mut d = draft("standup");
        d.recurrence = Some("daily".to_string());
        d.due_date = Some(due);
        d.tags = vec!["team".to_string()];
        let task = store.add(d).unwrap();
        store.add(draft("unrelated")).unwrap();

        store.toggle_complete(task.id).unwrap().unwrap();

        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 3);
        let successor = all.last().unwrap();
        assert!(successor.id > all.iter().take(2).map(|t| t.id).max().unwrap());
        assert_eq!(successor.title, "standup");
        assert_eq!(successor.status, Status::Pending);
        assert_eq!(successor.due_date, Some(due + Duration::days(1)));
        assert_eq!(successor.recurrence.as_deref(), Some("daily"));
        assert_eq!(successor.tags, vec!["team".to_string()]);
        assert!(successor.completed_at.is_none());
    }

    #[test]
    fn no_successor_without_due_date() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut d = draft("no due");
        d.recurrence = Some("weekly".to_string());
        let task = store.add(d).unwrap();

        store.toggle_complete(task.id).unwrap().unwrap();
        assert_eq!(store.get_all().unwrap().len(), 1);
    }

    #[test]
    fn no_successor_for_unrecognized_pattern() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut d = draft("odd pattern");
        d.recurrence = Some("biweekly".to_string());
        d.due_date = Some(Utc::now());
        let task = store.add(d).unwrap();

        store.toggle_complete(task.id).unwrap().unwrap();
        assert_eq!(store.get_all().unwrap().len(), 1);
    }

    #[test]
    fn double_toggle_creates_single_successor() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut d = draft("recurring");
        d.recurrence = Some("daily".to_string());
        d.due_date = Some(Utc::now());
        let task = store.add(d).unwrap();

        store.toggle_complete(task.id).unwrap().unwrap();
        let undone = store.toggle_complete(task.id).unwrap().unwrap();

        assert!(!undone.is_completed());
        // The first toggle appended the successor; the second must not.
        assert_eq!(store.get_all().unwrap().len(), 2);
    }

    #[test]
    fn corrupt_file_is_a_distinguishable_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        let store = TaskStore::open(&path).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        let err = store.get_all().unwrap_err();
        assert!(err.is_corrupt_storage());

        std::fs::write(&path, "{\"id\": 1}").unwrap();
        let err = store.get_all().unwrap_err();
        assert!(err.is_corrupt_storage());
    }

    #[test]
    fn search_matches_title_and_description() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut groceries = draft("Buy groceries");
        groceries.description = "milk and eggs".to_string();
        store.add(groceries).unwrap();
        store.add(draft("Call dentist")).unwrap();

        assert_eq!(store.search("GROCERIES").unwrap().len(), 1);
        assert_eq!(store.search("eggs").unwrap().len(), 1);
        assert_eq!(store.search("plumber").unwrap().len(), 0);
    }

    fn fixture(id: u64, title: &str) -> Task {
        Task {
            id,
            title: title.to_string(),
            description: String::new(),
            status: Status::Pending,
            priority: Priority::Medium,
            tags: Vec::new(),
            due_date: None,
            recurrence: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn filter_by_tag_is_case_insensitive() {
        let mut a = fixture(1, "a");
        a.tags = vec!["work".to_string()];
        let b = fixture(2, "b");

        let filter = TaskFilter {
            tag: Some("Work".to_string()),
            ..TaskFilter::default()
        };
        let out = filter_tasks(&[a, b], &filter);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, 1);
    }

    #[test]
    fn filter_predicates_compose_with_and() {
        let mut a = fixture(1, "a");
        a.priority = Priority::High;
        a.tags = vec!["work".to_string()];
        let mut b = fixture(2, "b");
        b.priority = Priority::High;
        let mut c = fixture(3, "c");
        c.status = Status::Completed;
        c.priority = Priority::High;
        c.tags = vec!["work".to_string()];

        let filter = TaskFilter {
            status: Some("incomplete".to_string()),
            priority: Some("high".to_string()),
            tag: Some("work".to_string()),
        };
        let out = filter_tasks(&[a, b, c], &filter);
        assert_eq!(out.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn sort_due_date_keeps_undated_tail_stable() {
        let later = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        let sooner = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let mut a = fixture(1, "a");
        a.due_date = Some(later);
        let b = fixture(2, "b");
        let mut c = fixture(3, "c");
        c.due_date = Some(sooner);
        let d = fixture(4, "d");

        let out = sort_tasks(vec![a, b, c, d], "due-date");
        assert_eq!(out.iter().map(|t| t.id).collect::<Vec<_>>(), vec![3, 1, 2, 4]);
    }

    #[test]
    fn sort_priority_high_first() {
        let mut a = fixture(1, "a");
        a.priority = Priority::Low;
        let mut b = fixture(2, "b");
        b.priority = Priority::High;
        let c = fixture(3, "c");

        let out = sort_tasks(vec![a, b, c], "priority");
        assert_eq!(out.iter().map(|t| t.id).collect::<Vec<_>>(), vec![2, 3, 1]);
    }

    #[test]
    fn sort_title_ignores_case() {
        let a = fixture(1, "banana");
        let b = fixture(2, "Apple");
        let c = fixture(3, "cherry");

        let out = sort_tasks(vec![a, b, c], "title");
        assert_eq!(out.iter().map(|t| t.id).collect::<Vec<_>>(), vec![2, 1, 3]);
    }

    #[test]
    fn sort_unknown_key_returns_input_unchanged() {
        let tasks = vec![fixture(2, "b"), fixture(1, "a")];
        let out = sort_tasks(tasks.clone(), "urgency");
        assert_eq!(out, tasks);
    }
}
