//! taskflow task command implementations.
//!
//! Handlers orchestrate the side-effect chain: store mutation first, then
//! an audit record, then a notification. Audit and notification failures
//! degrade to warnings; only the store mutation can fail the command.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::warn;

use crate::audit::{event, AuditLog};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::notify::{JsonlSink, Notifier, PublishOutcome, TaskNotification};
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::store::{filter_tasks, sort_tasks, TaskFilter, TaskStore};
use crate::task::{Priority, Status, Task, TaskDraft, TaskPatch};

/// Global flags shared by every subcommand.
#[derive(Debug)]
pub struct Globals {
    pub config: Option<PathBuf>,
    pub tasks_file: Option<PathBuf>,
    pub audit_file: Option<PathBuf>,
    pub actor: Option<String>,
    pub json: bool,
    pub quiet: bool,
}

pub struct AddOptions {
    pub title: String,
    pub description: String,
    pub priority: Option<String>,
    pub tags: Vec<String>,
    pub due: Option<String>,
    pub recur: Option<String>,
    pub globals: Globals,
}

pub struct ListOptions {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub tag: Option<String>,
    pub sort: Option<String>,
    pub globals: Globals,
}

pub struct ShowOptions {
    pub id: u64,
    pub globals: Globals,
}

pub struct UpdateOptions {
    pub id: u64,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub tags: Vec<String>,
    pub due: Option<String>,
    pub recur: Option<String>,
    pub globals: Globals,
}

pub struct DoneOptions {
    pub id: u64,
    pub globals: Globals,
}

pub struct RmOptions {
    pub id: u64,
    pub globals: Globals,
}

pub struct SearchOptions {
    pub keyword: String,
    pub globals: Globals,
}

/// Loaded environment for one command invocation.
pub struct Context {
    pub store: TaskStore,
    pub audit: AuditLog,
    pub notifier: Notifier,
    pub actor: String,
    pub options: OutputOptions,
}

impl Context {
    pub fn load(globals: &Globals) -> Result<Self> {
        let config = match &globals.config {
            Some(path) => Config::load(path)?,
            None => Config::load_from_dir(std::path::Path::new("."))?,
        };

        let tasks_file = globals
            .tasks_file
            .clone()
            .unwrap_or_else(|| config.storage.tasks_file.clone());
        let audit_file = globals
            .audit_file
            .clone()
            .unwrap_or_else(|| config.storage.audit_file.clone());
        let actor = globals
            .actor
            .clone()
            .unwrap_or_else(|| config.actor.default.clone());

        let mut notifier = Notifier::new()
            .with_topic(config.publish.topic.clone())
            .with_timeout(Duration::from_secs(config.publish.timeout_secs));
        if let Some(path) = &config.publish.events_file {
            notifier = notifier.with_primary(Box::new(JsonlSink::new(path)));
        }
        if let Some(path) = &config.publish.fallback_file {
            notifier = notifier.with_fallback(Box::new(JsonlSink::new(path)));
        }

        Ok(Self {
            store: TaskStore::open(tasks_file)?,
            audit: AuditLog::open(audit_file)?,
            notifier,
            actor,
            options: OutputOptions {
                json: globals.json,
                quiet: globals.quiet,
            },
        })
    }

    /// Record an audit entry, downgrading failure to a warning.
    fn record(&self, result: Result<crate::audit::AuditEntry>) -> Option<String> {
        match result {
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "audit record failed");
                Some(format!("audit record failed: {e}"))
            }
        }
    }

    /// Deliver a notification. Never fails the command: the mutation has
    /// already been persisted, so any problem here degrades to a warning.
    fn notify(&self, notification: TaskNotification) -> Option<String> {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "notification runtime unavailable");
                return Some(format!("notification failed: {e}"));
            }
        };
        let report = runtime.block_on(self.notifier.notify(notification));
        if report.outcome == PublishOutcome::Dropped && self.notifier.has_publishers() {
            return Some("event publish failed; notification dropped".to_string());
        }
        None
    }
}

#[derive(Serialize)]
struct TaskListOutput {
    count: usize,
    tasks: Vec<Task>,
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` (midnight UTC).
fn parse_due(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(DateTime::from_naive_utc_and_offset(midnight, Utc));
        }
    }
    Err(Error::InvalidArgument(format!(
        "invalid due date '{value}' (expected RFC 3339 or YYYY-MM-DD)"
    )))
}

fn summarize_task(human: &mut HumanOutput, task: &Task) {
    human.push_summary("ID", task.id.to_string());
    human.push_summary("Title", task.title.clone());
    human.push_summary("Status", task.status.to_string());
    human.push_summary("Priority", task.priority.to_string());
    if !task.tags.is_empty() {
        human.push_summary("Tags", task.tags.join(", "));
    }
    if let Some(due) = task.due_date {
        human.push_summary("Due", due.to_rfc3339());
    }
    if let Some(recurrence) = &task.recurrence {
        human.push_summary("Recurs", recurrence.clone());
    }
}

fn task_line(task: &Task) -> String {
    let mut line = format!(
        "#{} [{}] {} ({})",
        task.id, task.status, task.title, task.priority
    );
    if let Some(due) = task.due_date {
        line.push_str(&format!(" due {}", due.format("%Y-%m-%d")));
    }
    line
}

pub fn run_add(options: AddOptions) -> Result<()> {
    let ctx = Context::load(&options.globals)?;

    let mut draft = TaskDraft::new(options.title);
    draft.description = options.description;
    draft.priority = options
        .priority
        .as_deref()
        .map(Priority::parse)
        .unwrap_or_default();
    draft.tags = options.tags;
    draft.due_date = options.due.as_deref().map(parse_due).transpose()?;
    draft.recurrence = options.recur;

    let task = ctx.store.add(draft)?;

    let mut human = HumanOutput::new("Task created");
    if let Some(warning) = ctx.record(ctx.audit.record_created(&task, &ctx.actor)) {
        human.push_warning(warning);
    }
    if let Some(warning) =
        ctx.notify(TaskNotification::for_task(event::TASK_CREATED, &task, &ctx.actor))
    {
        human.push_warning(warning);
    }
    summarize_task(&mut human, &task);

    emit_success(ctx.options, "task add", &task, Some(&human))
}

pub fn run_list(options: ListOptions) -> Result<()> {
    let ctx = Context::load(&options.globals)?;

    let filter = TaskFilter {
        status: options.status,
        priority: options.priority,
        tag: options.tag,
    };
    let mut tasks = filter_tasks(&ctx.store.get_all()?, &filter);
    if let Some(key) = options.sort.as_deref() {
        tasks = sort_tasks(tasks, key);
    }

    let mut human = HumanOutput::new(format!("{} task(s)", tasks.len()));
    for task in &tasks {
        human.push_detail(task_line(task));
    }

    let output = TaskListOutput {
        count: tasks.len(),
        tasks,
    };
    emit_success(ctx.options, "task list", &output, Some(&human))
}

pub fn run_show(options: ShowOptions) -> Result<()> {
    let ctx = Context::load(&options.globals)?;

    let task = ctx
        .store
        .get_by_id(options.id)?
        .ok_or(Error::TaskNotFound(options.id))?;

    let mut human = HumanOutput::new("Task");
    summarize_task(&mut human, &task);
    if !task.description.is_empty() {
        human.push_detail(task.description.clone());
    }

    emit_success(ctx.options, "task show", &task, Some(&human))
}

pub fn run_update(options: UpdateOptions) -> Result<()> {
    let ctx = Context::load(&options.globals)?;

    let status = options
        .status
        .as_deref()
        .map(|value| {
            Status::parse(value)
                .ok_or_else(|| Error::InvalidArgument(format!("unknown status '{value}'")))
        })
        .transpose()?;

    let due = match options.due.as_deref() {
        None => None,
        Some("none") => Some(None),
        Some(value) => Some(Some(parse_due(value)?)),
    };
    let recurrence = match options.recur.as_deref() {
        None => None,
        Some("none") => Some(None),
        Some(value) => Some(Some(value.to_string())),
    };

    let patch = TaskPatch {
        title: options.title,
        description: options.description,
        status,
        priority: options.priority.as_deref().map(Priority::parse),
        tags: if options.tags.is_empty() {
            None
        } else {
            Some(options.tags)
        },
        due_date: due,
        recurrence,
    };
    if patch.is_empty() {
        return Err(Error::InvalidArgument(
            "nothing to update; pass at least one field".to_string(),
        ));
    }

    let old = ctx
        .store
        .get_by_id(options.id)?
        .ok_or(Error::TaskNotFound(options.id))?;
    let updated = ctx
        .store
        .update(options.id, patch)?
        .ok_or(Error::TaskNotFound(options.id))?;

    let changes = crate::audit::diff(&old.snapshot(), &updated.snapshot());

    let mut human = HumanOutput::new("Task updated");
    if let Some(warning) = ctx.record(ctx.audit.record_updated(&old, &updated, &ctx.actor)) {
        human.push_warning(warning);
    }
    if let Some(warning) =
        ctx.notify(TaskNotification::for_update(&updated, changes, &ctx.actor))
    {
        human.push_warning(warning);
    }
    summarize_task(&mut human, &updated);

    emit_success(ctx.options, "task update", &updated, Some(&human))
}

pub fn run_done(options: DoneOptions) -> Result<()> {
    let ctx = Context::load(&options.globals)?;

    let toggled = ctx
        .store
        .toggle_complete(options.id)?
        .ok_or(Error::TaskNotFound(options.id))?;

    let header = if toggled.is_completed() {
        "Task completed"
    } else {
        "Task reopened"
    };
    let event_name = if toggled.is_completed() {
        event::TASK_COMPLETED
    } else {
        event::TASK_UNCOMPLETED
    };

    let mut human = HumanOutput::new(header);
    if let Some(warning) = ctx.record(ctx.audit.record_toggled(&toggled, &ctx.actor)) {
        human.push_warning(warning);
    }
    if let Some(warning) =
        ctx.notify(TaskNotification::for_task(event_name, &toggled, &ctx.actor))
    {
        human.push_warning(warning);
    }
    summarize_task(&mut human, &toggled);

    emit_success(ctx.options, "task done", &toggled, Some(&human))
}

pub fn run_rm(options: RmOptions) -> Result<()> {
    let ctx = Context::load(&options.globals)?;

    let task = ctx
        .store
        .get_by_id(options.id)?
        .ok_or(Error::TaskNotFound(options.id))?;
    if !ctx.store.delete(options.id)? {
        return Err(Error::TaskNotFound(options.id));
    }

    let mut human = HumanOutput::new("Task deleted");
    if let Some(warning) = ctx.record(ctx.audit.record_deleted(&task, &ctx.actor)) {
        human.push_warning(warning);
    }
    if let Some(warning) =
        ctx.notify(TaskNotification::for_task(event::TASK_DELETED, &task, &ctx.actor))
    {
        human.push_warning(warning);
    }
    human.push_summary("ID", task.id.to_string());
    human.push_summary("Title", task.title.clone());

    emit_success(ctx.options, "task rm", &task, Some(&human))
}

pub fn run_search(options: SearchOptions) -> Result<()> {
    let ctx = Context::load(&options.globals)?;

    let tasks = ctx.store.search(&options.keyword)?;

    let mut human = HumanOutput::new(format!(
        "{} task(s) matching '{}'",
        tasks.len(),
        options.keyword
    ));
    if let Some(warning) = ctx.record(ctx.audit.record_searched(
        &options.keyword,
        tasks.len(),
        &ctx.actor,
    )) {
        human.push_warning(warning);
    }
    for task in &tasks {
        human.push_detail(task_line(task));
    }

    let output = TaskListOutput {
        count: tasks.len(),
        tasks,
    };
    emit_success(ctx.options, "task search", &output, Some(&human))
}
