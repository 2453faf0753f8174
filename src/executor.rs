//! The seam between the orchestrator and the agent that does the work.
//!
//! The orchestrator hands a hat, a unit and a workspace to an [`Executor`]
//! and reacts to the reported [`Outcome`]. How the work gets done is not its
//! concern. [`CommandExecutor`] runs an agent CLI (`claude --print` by
//! default) and reads the outcome from tags in its reply:
//!
//! - `<outcome>success|issues|blocked</outcome>`
//! - `<notes>free text</notes>`

use crate::config::Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::LazyLock;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

static OUTCOME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<outcome>\s*([A-Za-z_-]+)\s*</outcome>").unwrap());

static NOTES_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<notes>\s*(.*?)\s*</notes>").unwrap());

/// What a hat's execution reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// Work was done but did not pass; go back to the retry hat
    Issues,
    /// Cannot proceed without a human
    Blocked,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Issues => write!(f, "issues"),
            Outcome::Blocked => write!(f, "blocked"),
        }
    }
}

impl FromStr for Outcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(Outcome::Success),
            "issues" => Ok(Outcome::Issues),
            "blocked" => Ok(Outcome::Blocked),
            _ => anyhow::bail!(
                "Invalid outcome '{}'. Valid values: success, issues, blocked",
                s
            ),
        }
    }
}

/// One dispatch to the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionRequest {
    pub intent: String,
    pub hat: String,
    pub iteration: u32,
    /// `None` while the intent is being decomposed
    pub unit_id: Option<String>,
    pub discipline: Option<String>,
    pub criteria: Vec<String>,
    pub workspace_path: PathBuf,
    /// Scratchpad left by earlier hats in this workspace
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub outcome: Outcome,
    #[serde(default)]
    pub notes: String,
}

impl ExecutionReport {
    pub fn new(outcome: Outcome, notes: impl Into<String>) -> Self {
        Self {
            outcome,
            notes: notes.into(),
        }
    }
}

/// Runs one hat for one unit. Blocking from the orchestrator's point of view;
/// timeouts and cancellation belong to the caller.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn submit(&self, request: &ExecutionRequest) -> Result<ExecutionReport>;
}

/// Read the outcome and notes tags from an agent reply.
///
/// The last `<outcome>` tag wins. A reply without one, or with an unknown
/// value, counts as `issues`.
pub fn parse_report(output: &str) -> ExecutionReport {
    let outcome = OUTCOME_REGEX
        .captures_iter(output)
        .last()
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().parse::<Outcome>());

    let outcome = match outcome {
        Some(Ok(outcome)) => outcome,
        Some(Err(e)) => {
            warn!(error = %e, "unrecognised outcome tag");
            Outcome::Issues
        }
        None => {
            warn!("executor reply has no outcome tag");
            Outcome::Issues
        }
    };

    let notes = NOTES_REGEX
        .captures_iter(output)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect::<Vec<_>>()
        .join("\n\n");

    ExecutionReport { outcome, notes }
}

/// Executor that spawns an agent CLI inside the workspace.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: String,
    args: Vec<String>,
}

impl CommandExecutor {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.executor_cmd.clone(), config.executor_flags())
    }

    /// Prompt written to the agent's stdin.
    pub fn prompt(request: &ExecutionRequest) -> String {
        let mut prompt = format!(
            "You are wearing the '{}' hat for intent '{}' (iteration {}).\n",
            request.hat, request.intent, request.iteration
        );

        match &request.unit_id {
            Some(unit) => {
                prompt.push_str(&format!("Unit: {}\n", unit));
                if let Some(discipline) = &request.discipline {
                    prompt.push_str(&format!("Discipline: {}\n", discipline));
                }
            }
            None => prompt.push_str(
                "No unit is selected yet: decompose the intent into unit files \
                 (.ai-dlc/<intent>/unit-NN-<slug>.md).\n",
            ),
        }

        if !request.criteria.is_empty() {
            prompt.push_str("\nCompletion criteria:\n");
            for criterion in &request.criteria {
                prompt.push_str(&format!("- [ ] {}\n", criterion));
            }
        }

        if let Some(notes) = request.notes.as_deref().filter(|n| !n.trim().is_empty()) {
            prompt.push_str("\nNotes from earlier hats:\n");
            prompt.push_str(notes.trim_end());
            prompt.push('\n');
        }

        prompt.push_str(&format!(
            "\nWork only inside {}.\n\
             When finished, reply with <outcome>success</outcome>, \
             <outcome>issues</outcome> if the work does not meet the criteria, \
             or <outcome>blocked</outcome> if you cannot proceed without a human. \
             Put anything the next hat should know in <notes>...</notes>.\n",
            request.workspace_path.display()
        ));
        prompt
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn submit(&self, request: &ExecutionRequest) -> Result<ExecutionReport> {
        let prompt = Self::prompt(request);
        info!(
            intent = %request.intent,
            hat = %request.hat,
            unit = request.unit_id.as_deref().unwrap_or("-"),
            command = %self.command,
            "dispatching to executor"
        );

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .current_dir(&request.workspace_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn executor '{}'", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await.context("Failed to close stdin")?;
        }

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for executor")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Executor exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(bytes = stdout.len(), "executor finished");
        Ok(parse_report(&stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dir: &std::path::Path) -> ExecutionRequest {
        ExecutionRequest {
            intent: "shop".into(),
            hat: "builder".into(),
            iteration: 2,
            unit_id: Some("unit-01-cart".into()),
            discipline: Some("backend".into()),
            criteria: vec!["Cart persists".into()],
            workspace_path: dir.to_path_buf(),
            notes: Some("## planner\n\nUse the orders table".into()),
        }
    }

    #[test]
    fn test_parse_report_reads_tags() {
        let report = parse_report(
            "Done.\n<notes>\nAdded cart table\n</notes>\n<outcome> success </outcome>\n",
        );
        assert_eq!(report.outcome, Outcome::Success);
        assert_eq!(report.notes, "Added cart table");
    }

    #[test]
    fn test_parse_report_last_outcome_wins() {
        let report = parse_report("<outcome>issues</outcome> retried <outcome>blocked</outcome>");
        assert_eq!(report.outcome, Outcome::Blocked);
        assert!(report.notes.is_empty());
    }

    #[test]
    fn test_parse_report_defaults_to_issues() {
        assert_eq!(parse_report("no tags here").outcome, Outcome::Issues);
        assert_eq!(
            parse_report("<outcome>maybe</outcome>").outcome,
            Outcome::Issues
        );
    }

    #[test]
    fn test_prompt_mentions_hat_unit_and_criteria() {
        let prompt = CommandExecutor::prompt(&request(std::path::Path::new("/tmp/ws")));
        assert!(prompt.contains("'builder' hat"));
        assert!(prompt.contains("Unit: unit-01-cart"));
        assert!(prompt.contains("Discipline: backend"));
        assert!(prompt.contains("- [ ] Cart persists"));
        assert!(prompt.contains("/tmp/ws"));
        assert!(prompt.contains("Use the orders table"));
    }

    #[tokio::test]
    async fn test_command_executor_parses_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let executor = CommandExecutor::new(
            "sh",
            vec![
                "-c".into(),
                "cat > prompt.txt; echo '<outcome>success</outcome><notes>ok</notes>'".into(),
            ],
        );
        let report = executor.submit(&request(dir.path())).await.unwrap();
        assert_eq!(report, ExecutionReport::new(Outcome::Success, "ok"));

        let prompt = std::fs::read_to_string(dir.path().join("prompt.txt")).unwrap();
        assert!(prompt.contains("intent 'shop'"));
    }

    #[tokio::test]
    async fn test_command_executor_nonzero_exit_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let executor = CommandExecutor::new("sh", vec!["-c".into(), "cat >/dev/null; exit 3".into()]);
        let err = executor.submit(&request(dir.path())).await.unwrap_err();
        assert!(err.to_string().contains("Executor exited"));
    }
}
