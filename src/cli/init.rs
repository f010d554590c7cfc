//! taskflow init command implementation.

use std::path::PathBuf;

use crate::cli::task::Globals;
use crate::config::{Config, CONFIG_FILE};
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput, OutputOptions};

pub struct InitOptions {
    pub force: bool,
    pub globals: Globals,
}

pub fn run_init(options: InitOptions) -> Result<()> {
    let path = options
        .globals
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

    if path.exists() && !options.force {
        return Err(Error::InvalidArgument(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }

    let config = Config::default();
    config.save(&path)?;

    let mut human = HumanOutput::new("Configuration written");
    human.push_summary("Path", path.display().to_string());
    human.push_summary("Tasks file", config.storage.tasks_file.display().to_string());
    human.push_summary("Audit file", config.storage.audit_file.display().to_string());

    emit_success(
        OutputOptions {
            json: options.globals.json,
            quiet: options.globals.quiet,
        },
        "init",
        &config,
        Some(&human),
    )
}
