use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::project_config::{HatrackToml, settings_path};
use crate::workflow::WorkflowRegistry;
use crate::workspace::Vcs;

/// Default worktree directory, relative to the project dir.
const DEFAULT_WORKTREE_DIR: &str = ".worktrees";

/// Runtime configuration.
///
/// Bridges the settings file with the runtime needs of the orchestrator:
/// paths are resolved against the canonical project directory and the
/// workflow registry is validated once.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub worktree_root: PathBuf,
    /// Explicit state root; derived from the git common dir when `None`
    pub state_dir: Option<PathBuf>,
    pub base_branch: Option<String>,
    pub remote: String,
    pub executor_cmd: String,
    pub executor_args: Vec<String>,
    pub skip_permissions: bool,
    pub max_iterations: u32,
    pub verification_commands: Vec<String>,
    pub verbose: bool,
    pub workflows: WorkflowRegistry,
}

impl Config {
    /// Load settings for `project_dir`, overlaying the process environment.
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        Self::with_env(project_dir, verbose, |key| std::env::var(key).ok())
    }

    pub fn with_env(
        project_dir: PathBuf,
        verbose: bool,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;

        let mut settings = HatrackToml::load_or_default(&project_dir)?;
        settings.apply_env(env);
        let workflows = settings.validate(&settings_path(&project_dir))?;

        let worktree_root = project_dir.join(
            settings
                .project
                .worktree_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKTREE_DIR)),
        );
        let state_dir = settings.project.state_dir.map(|dir| project_dir.join(dir));

        Ok(Self {
            project_dir,
            worktree_root,
            state_dir,
            base_branch: settings.project.base_branch,
            remote: settings.project.remote,
            executor_cmd: settings.executor.command,
            executor_args: settings.executor.args,
            skip_permissions: settings.executor.skip_permissions,
            max_iterations: settings.construct.max_iterations,
            verification_commands: settings.verification.commands,
            verbose,
            workflows,
        })
    }

    /// Flags passed to the executor command, before the configured extras.
    pub fn executor_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.skip_permissions {
            flags.push("--dangerously-skip-permissions".to_string());
        }
        flags.push("--print".to_string());
        flags.extend(self.executor_args.iter().cloned());
        flags
    }

    /// State store root: configured, else `<git common dir>/hatrack/state`.
    ///
    /// The common dir is shared by every worktree, so all workspaces of the
    /// repository see the same store.
    pub fn state_root(&self, vcs: &dyn Vcs) -> Result<PathBuf> {
        if let Some(dir) = &self.state_dir {
            return Ok(dir.clone());
        }
        let common = vcs
            .common_dir()
            .context("Failed to locate the git directory for the state store")?;
        Ok(common.join("hatrack").join("state"))
    }
}
