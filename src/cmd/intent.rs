//! Intent lifecycle commands: `resume`, `reset`, `status`.

use anyhow::Result;
use console::style;
use dialoguer::Confirm;
use std::path::PathBuf;

use super::super::Cli;
use super::{emit_json, orchestrator};

pub fn cmd_resume(cli: &Cli, project_dir: PathBuf, intent: Option<&str>) -> Result<()> {
    let report = orchestrator(cli, project_dir)?.resume(intent)?;
    if emit_json(cli, &report)? {
        return Ok(());
    }

    println!();
    println!("Resumed {} from {}", style(&report.intent).bold(), report.source);
    println!("Workspace: {}", report.workspace.display());
    if report.copied > 0 {
        println!("Copied {} artifact file(s) into the workspace", report.copied);
    }
    println!("Hat: {}", report.state.hat);
    if let Some(unit) = &report.state.current_unit {
        println!("Unit: {}", unit);
    }
    println!();
    Ok(())
}

pub fn cmd_reset(cli: &Cli, project_dir: PathBuf, intent: Option<&str>, force: bool) -> Result<()> {
    let orchestrator = orchestrator(cli, project_dir)?;

    if !force {
        let target = intent.unwrap_or("the active intent");
        let confirm = Confirm::new()
            .with_prompt(format!(
                "This will delete the run state of {}. Are you sure?",
                target
            ))
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    let report = orchestrator.reset(intent)?;
    if emit_json(cli, &report)? {
        return Ok(());
    }
    println!(
        "Reset {}: {} entr{} removed",
        report.intent,
        report.removed,
        if report.removed == 1 { "y" } else { "ies" }
    );
    if let Some(archive) = &report.archive {
        println!("Archived to {}", archive.display());
    }
    Ok(())
}

pub fn cmd_status(cli: &Cli, project_dir: PathBuf, intent: Option<&str>) -> Result<()> {
    let reports = orchestrator(cli, project_dir)?.status(intent)?;
    if emit_json(cli, &reports)? {
        return Ok(());
    }

    println!();
    if reports.is_empty() {
        println!("No intents found under .ai-dlc/");
        println!();
        return Ok(());
    }

    for report in &reports {
        println!(
            "{} ({}, {} strategy) [{}]",
            style(&report.intent).bold(),
            report.workflow,
            report.strategy,
            report.status
        );
        println!("  Branch:    {}", report.branch);
        match &report.workspace {
            Some(path) => println!("  Workspace: {}", path.display()),
            None => println!("  Workspace: not created"),
        }
        match &report.state {
            Some(state) => {
                println!("  Hat:       {} (iteration {})", state.hat, state.iteration);
                if let Some(unit) = &state.current_unit {
                    println!("  Unit:      {}", unit);
                }
            }
            None => println!("  Hat:       no run state (run 'hatrack resume')"),
        }

        let units = &report.units;
        println!(
            "  Units:     {}/{} completed, {} in progress, {} pending, {} blocked",
            units.completed, units.total, units.in_progress, units.pending, units.blocked_count
        );
        for blocked in &units.blocked {
            if blocked.unmet_dependencies.is_empty() {
                println!("    - {} is {}", blocked.id, blocked.status.as_str());
            } else {
                println!(
                    "    - {} waits on {}",
                    blocked.id,
                    blocked.unmet_dependencies.join(", ")
                );
            }
        }
        println!();
    }
    Ok(())
}
