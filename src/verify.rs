//! Success-criteria verification before `done`.

use crate::intent::Intent;
use crate::workspace::Workspace;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

#[async_trait]
pub trait CriteriaVerifier: Send + Sync {
    /// Whether the intent's success criteria hold in `workspace`.
    async fn verify(&self, intent: &Intent, workspace: &Workspace) -> Result<bool>;
}

/// Runs shell commands in the intent workspace; every one must exit 0.
///
/// With no commands configured the terminal hat's own success is taken as
/// verification.
#[derive(Debug, Clone, Default)]
pub struct CommandVerifier {
    commands: Vec<String>,
}

impl CommandVerifier {
    pub fn new(commands: Vec<String>) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl CriteriaVerifier for CommandVerifier {
    async fn verify(&self, intent: &Intent, workspace: &Workspace) -> Result<bool> {
        for command in &self.commands {
            let output = Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(&workspace.path)
                .output()
                .await
                .with_context(|| format!("Failed to run verification command '{}'", command))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(
                    intent = %intent.slug,
                    command = %command,
                    status = %output.status,
                    stderr = %stderr.trim(),
                    "verification failed"
                );
                return Ok(false);
            }
        }
        info!(intent = %intent.slug, commands = self.commands.len(), "criteria verified");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::ChangeStrategy;

    fn intent() -> Intent {
        Intent {
            slug: "shop".into(),
            workflow_name: "default".into(),
            status: Default::default(),
            success_criteria: vec!["It builds".into()],
            change_strategy: ChangeStrategy::Unit,
            testing_requirements: Default::default(),
        }
    }

    fn workspace(dir: &std::path::Path) -> Workspace {
        Workspace {
            intent: "shop".into(),
            branch: "shop/main".into(),
            path: dir.to_path_buf(),
            unit: None,
        }
    }

    #[tokio::test]
    async fn test_no_commands_accepts() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = CommandVerifier::default();
        assert!(verifier.verify(&intent(), &workspace(dir.path())).await.unwrap());
    }

    #[tokio::test]
    async fn test_commands_run_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), "").unwrap();

        let passing = CommandVerifier::new(vec!["test -f marker".into(), "true".into()]);
        assert!(passing.verify(&intent(), &workspace(dir.path())).await.unwrap());

        let failing = CommandVerifier::new(vec!["true".into(), "test -f missing".into()]);
        assert!(!failing.verify(&intent(), &workspace(dir.path())).await.unwrap());
    }
}
