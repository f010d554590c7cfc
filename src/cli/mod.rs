//! Command-line interface for taskflow
//!
//! This module defines the CLI structure using clap derive macros.
//! Each subcommand is defined in its own submodule.

use clap::{Parser, Subcommand};

use crate::error::Result;

mod audit;
mod init;
mod task;

/// taskflow - task management with an audit trail
///
/// A CLI for a JSON-file task collection with recurring tasks, an
/// append-only audit log, and best-effort event publishing.
#[derive(Parser, Debug)]
#[command(name = "taskflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to taskflow.toml (defaults to ./taskflow.toml when present)
    #[arg(long, global = true, env = "TASKFLOW_CONFIG")]
    pub config: Option<std::path::PathBuf>,

    /// Task collection file, overriding the configuration
    #[arg(long, global = true, env = "TASKFLOW_TASKS_FILE")]
    pub tasks_file: Option<std::path::PathBuf>,

    /// Audit log file, overriding the configuration
    #[arg(long, global = true, env = "TASKFLOW_AUDIT_FILE")]
    pub audit_file: Option<std::path::PathBuf>,

    /// Actor identity recorded in the audit log and events
    #[arg(long, global = true, env = "TASKFLOW_ACTOR")]
    pub actor: Option<String>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default taskflow.toml
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Task management
    #[command(subcommand)]
    Task(TaskCommands),

    /// Audit log queries
    #[command(subcommand)]
    Audit(AuditCommands),
}

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Add a new task
    Add {
        /// Task title
        title: String,

        /// Longer description
        #[arg(long, default_value = "")]
        description: String,

        /// Priority: high, medium, low (anything else becomes medium)
        #[arg(long)]
        priority: Option<String>,

        /// Tags (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Due date (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        due: Option<String>,

        /// Recurrence pattern: daily, weekly, monthly
        #[arg(long)]
        recur: Option<String>,
    },

    /// List tasks with optional filters
    List {
        /// Filter by status name, or `complete` / `incomplete`
        #[arg(long)]
        status: Option<String>,

        /// Filter by priority
        #[arg(long)]
        priority: Option<String>,

        /// Filter by tag (case-insensitive)
        #[arg(long)]
        tag: Option<String>,

        /// Sort by: due-date, priority, title
        #[arg(long)]
        sort: Option<String>,
    },

    /// Show a single task
    Show {
        /// Task id
        id: u64,
    },

    /// Update fields on a task
    Update {
        /// Task id
        id: u64,

        /// New title
        #[arg(long)]
        title: Option<String>,

        /// New description
        #[arg(long)]
        description: Option<String>,

        /// New status: pending, in_progress, completed, deleted
        #[arg(long)]
        status: Option<String>,

        /// New priority
        #[arg(long)]
        priority: Option<String>,

        /// Replace the tag list (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// New due date, or `none` to clear
        #[arg(long)]
        due: Option<String>,

        /// New recurrence pattern, or `none` to clear
        #[arg(long)]
        recur: Option<String>,
    },

    /// Toggle a task between pending and completed
    Done {
        /// Task id
        id: u64,
    },

    /// Delete a task
    Rm {
        /// Task id
        id: u64,
    },

    /// Search tasks by keyword in title or description
    Search {
        /// Keyword (case-insensitive substring)
        keyword: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum AuditCommands {
    /// List audit entries, newest first
    List {
        /// Filter by event type (e.g. task.created)
        #[arg(long)]
        event: Option<String>,

        /// Filter by task id
        #[arg(long)]
        task: Option<u64>,

        /// Filter by actor
        #[arg(long)]
        actor: Option<String>,

        /// Page size
        #[arg(long)]
        limit: Option<usize>,

        /// Entries to skip after sorting
        #[arg(long)]
        offset: Option<usize>,
    },

    /// Recent history for one task, newest first
    History {
        /// Task id
        id: u64,

        /// Maximum entries to return
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Remove every audit entry
    Clear,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let globals = task::Globals {
            config: self.config,
            tasks_file: self.tasks_file,
            audit_file: self.audit_file,
            actor: self.actor,
            json: self.json,
            quiet: self.quiet,
        };

        match self.command {
            Commands::Init { force } => init::run_init(init::InitOptions { force, globals }),
            Commands::Task(cmd) => match cmd {
                TaskCommands::Add {
                    title,
                    description,
                    priority,
                    tags,
                    due,
                    recur,
                } => task::run_add(task::AddOptions {
                    title,
                    description,
                    priority,
                    tags,
                    due,
                    recur,
                    globals,
                }),
                TaskCommands::List {
                    status,
                    priority,
                    tag,
                    sort,
                } => task::run_list(task::ListOptions {
                    status,
                    priority,
                    tag,
                    sort,
                    globals,
                }),
                TaskCommands::Show { id } => task::run_show(task::ShowOptions { id, globals }),
                TaskCommands::Update {
                    id,
                    title,
                    description,
                    status,
                    priority,
                    tags,
                    due,
                    recur,
                } => task::run_update(task::UpdateOptions {
                    id,
                    title,
                    description,
                    status,
                    priority,
                    tags,
                    due,
                    recur,
                    globals,
                }),
                TaskCommands::Done { id } => task::run_done(task::DoneOptions { id, globals }),
                TaskCommands::Rm { id } => task::run_rm(task::RmOptions { id, globals }),
                TaskCommands::Search { keyword } => {
                    task::run_search(task::SearchOptions { keyword, globals })
                }
            },
            Commands::Audit(cmd) => match cmd {
                AuditCommands::List {
                    event,
                    task: task_id,
                    actor,
                    limit,
                    offset,
                } => audit::run_list(audit::ListOptions {
                    event,
                    task_id,
                    actor,
                    limit,
                    offset,
                    globals,
                }),
                AuditCommands::History { id, limit } => {
                    audit::run_history(audit::HistoryOptions { id, limit, globals })
                }
                AuditCommands::Clear => audit::run_clear(audit::ClearOptions { globals }),
            },
        }
    }
}
