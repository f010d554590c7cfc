//! taskflow audit command implementations.

use serde::Serialize;

use crate::audit::{AuditEntry, AuditFilter};
use crate::cli::task::{Context, Globals};
use crate::error::Result;
use crate::output::{emit_success, HumanOutput};

pub struct ListOptions {
    pub event: Option<String>,
    pub task_id: Option<u64>,
    pub actor: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub globals: Globals,
}

pub struct HistoryOptions {
    pub id: u64,
    pub limit: Option<usize>,
    pub globals: Globals,
}

pub struct ClearOptions {
    pub globals: Globals,
}

#[derive(Serialize)]
struct EntryListOutput {
    count: usize,
    entries: Vec<AuditEntry>,
}

fn entry_line(entry: &AuditEntry) -> String {
    let task = entry
        .entity_id
        .map(|id| format!(" {} #{id}", entry.entity_type))
        .unwrap_or_default();
    format!(
        "#{} {} {}{} by {}",
        entry.id,
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.event,
        task,
        entry.actor
    )
}

pub fn run_list(options: ListOptions) -> Result<()> {
    let ctx = Context::load(&options.globals)?;

    let filter = AuditFilter {
        event: options.event,
        entity_id: options.task_id,
        actor: options.actor,
        limit: options.limit,
        offset: options.offset,
    };
    let entries = ctx.audit.query(&filter);

    let mut human = HumanOutput::new(format!("{} audit entr(ies)", entries.len()));
    for entry in &entries {
        human.push_detail(entry_line(entry));
    }

    let output = EntryListOutput {
        count: entries.len(),
        entries,
    };
    emit_success(ctx.options, "audit list", &output, Some(&human))
}

pub fn run_history(options: HistoryOptions) -> Result<()> {
    let ctx = Context::load(&options.globals)?;

    let entries = ctx.audit.task_history(options.id, options.limit);

    let mut human = HumanOutput::new(format!(
        "{} entr(ies) for task #{}",
        entries.len(),
        options.id
    ));
    for entry in &entries {
        human.push_detail(entry_line(entry));
    }

    let output = EntryListOutput {
        count: entries.len(),
        entries,
    };
    emit_success(ctx.options, "audit history", &output, Some(&human))
}

pub fn run_clear(options: ClearOptions) -> Result<()> {
    let ctx = Context::load(&options.globals)?;

    let removed = ctx.audit.clear()?;

    #[derive(Serialize)]
    struct ClearOutput {
        removed: usize,
    }

    let mut human = HumanOutput::new("Audit log cleared");
    human.push_summary("Removed", removed.to_string());

    emit_success(ctx.options, "audit clear", &ClearOutput { removed }, Some(&human))
}
