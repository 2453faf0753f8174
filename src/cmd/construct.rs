//! The construction loop: `hatrack construct`.

use anyhow::Result;
use console::style;
use hatrack::executor::Outcome;
use hatrack::integrate::UnitLanding;
use hatrack::orchestrator::{ConstructReport, Halt};
use std::path::PathBuf;

use super::super::Cli;
use super::{emit_json, orchestrator};

pub async fn cmd_construct(cli: &Cli, project_dir: PathBuf, intent: Option<&str>) -> Result<()> {
    let orchestrator = orchestrator(cli, project_dir)?;
    let report = orchestrator.construct(intent).await?;
    if emit_json(cli, &report)? {
        return Ok(());
    }
    print_report(&report);
    Ok(())
}

fn print_report(report: &ConstructReport) {
    println!();
    println!("Constructing {}", style(&report.intent).bold());
    println!();

    for round in &report.rounds {
        let outcome = match round.outcome {
            Outcome::Success => style(round.outcome.to_string()).green(),
            Outcome::Issues => style(round.outcome.to_string()).yellow(),
            Outcome::Blocked => style(round.outcome.to_string()).red(),
        };
        println!(
            "  [{:>3}] {:<14} {:<28} {}",
            round.iteration,
            round.hat,
            round.unit.as_deref().unwrap_or("-"),
            outcome
        );
        match &round.landing {
            Some(UnitLanding::Merged) => println!("        merged into the intent branch"),
            Some(UnitLanding::Requested { url }) => println!("        merge request: {}", url),
            _ => {}
        }
    }
    if !report.rounds.is_empty() {
        println!();
    }

    match &report.halt {
        Halt::Completed { .. } => {
            println!("{} Intent complete", style("✓").green().bold());
        }
        Halt::AwaitingApproval { url } => {
            println!("Waiting for approval: {}", url);
            println!("Run 'hatrack construct' again once it is merged.");
        }
        Halt::IntegrationBlocked { errors } => {
            println!("{} Units complete, integration pending:", style("!").yellow());
            for error in errors {
                println!("  - {}", error);
            }
        }
        Halt::ExecutorBlocked { hat, unit, notes } => {
            println!(
                "{} The {} hat is blocked on {}:",
                style("✗").red().bold(),
                hat,
                unit.as_deref().unwrap_or("the intent")
            );
            for line in notes.lines() {
                println!("  {}", line);
            }
        }
        Halt::UnitsBlocked { units } => {
            println!("{} No unit can be scheduled:", style("✗").red().bold());
            for unit in units {
                if unit.unmet_dependencies.is_empty() {
                    println!("  - {} ({})", unit.id, unit.status.as_str());
                } else {
                    println!(
                        "  - {} waits on {}",
                        unit.id,
                        unit.unmet_dependencies.join(", ")
                    );
                }
            }
        }
        Halt::IterationLimit { rounds } => {
            println!("Stopped after {} rounds; run 'hatrack construct' to continue.", rounds);
        }
    }
    println!(
        "Hat: {}  Iteration: {}",
        report.state.hat, report.state.iteration
    );
    println!();
}
