//! CLI command implementations.
//!
//! | Module      | Commands handled                 |
//! |-------------|----------------------------------|
//! | `construct` | `Construct`                      |
//! | `hats`      | `Advance`, `Fail`, `Done`        |
//! | `intent`    | `Resume`, `Reset`, `Status`      |

pub mod construct;
pub mod hats;
pub mod intent;

pub use construct::cmd_construct;
pub use hats::{cmd_advance, cmd_done, cmd_fail};
pub use intent::{cmd_reset, cmd_resume, cmd_status};

use anyhow::Result;
use hatrack::config::Config;
use hatrack::orchestrator::Orchestrator;
use serde::Serialize;
use std::path::PathBuf;

use super::Cli;

/// Production orchestrator for the project at `project_dir`.
pub fn orchestrator(cli: &Cli, project_dir: PathBuf) -> Result<Orchestrator> {
    let config = Config::new(project_dir, cli.verbose)?;
    Orchestrator::from_config(config)
}

/// Print `report` as pretty JSON when `--json` was given. Returns whether it did.
pub fn emit_json<T: Serialize>(cli: &Cli, report: &T) -> Result<bool> {
    if !cli.json {
        return Ok(false);
    }
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(true)
}
