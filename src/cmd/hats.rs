//! Direct hat transitions: `advance`, `fail`, `done`.

use anyhow::Result;
use console::style;
use hatrack::integrate::IntegrationOutcome;
use hatrack::workflow::AdvanceOutcome;
use std::path::PathBuf;

use super::super::Cli;
use super::{emit_json, orchestrator};

pub fn cmd_advance(cli: &Cli, project_dir: PathBuf, intent: Option<&str>) -> Result<()> {
    let report = orchestrator(cli, project_dir)?.advance(intent)?;
    if emit_json(cli, &report)? {
        return Ok(());
    }

    match &report.outcome {
        AdvanceOutcome::Moved { from, to } => println!("{} -> {}", from, to),
        AdvanceOutcome::ReadyToFinalize => {
            println!("All units complete. Run 'hatrack done' to finalize.")
        }
        AdvanceOutcome::Retry { hat } => println!(
            "Units remain; back to {} (iteration {})",
            hat, report.state.iteration
        ),
        AdvanceOutcome::Blocked { units } => {
            println!("{} Blocked:", style("✗").red().bold());
            for unit in units {
                println!("  - {}", unit.id);
            }
        }
    }
    Ok(())
}

pub fn cmd_fail(cli: &Cli, project_dir: PathBuf, intent: Option<&str>) -> Result<()> {
    let state = orchestrator(cli, project_dir)?.fail(intent)?;
    if emit_json(cli, &state)? {
        return Ok(());
    }
    println!(
        "Back to {} (iteration {})",
        state.hat, state.iteration
    );
    Ok(())
}

pub async fn cmd_done(cli: &Cli, project_dir: PathBuf, intent: Option<&str>) -> Result<()> {
    let report = orchestrator(cli, project_dir)?.done(intent).await?;
    if emit_json(cli, &report)? {
        return Ok(());
    }

    match &report.integration {
        IntegrationOutcome::Completed => {
            println!("{} Intent complete", style("✓").green().bold())
        }
        IntegrationOutcome::Skipped { reason } => {
            println!("{} Intent complete ({})", style("✓").green().bold(), reason)
        }
        IntegrationOutcome::PrCreated { url } => println!("Waiting for approval: {}", url),
        IntegrationOutcome::Blocked { errors } => {
            println!("{} Integration pending:", style("!").yellow());
            for error in errors {
                println!("  - {}", error);
            }
        }
    }
    Ok(())
}
