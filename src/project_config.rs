//! Project settings read from `.ai-dlc/settings.toml`.
//!
//! Layering, lowest first: built-in defaults, the settings file, environment
//! (`HATRACK_EXECUTOR_CMD`, `HATRACK_STATE_DIR`), then CLI flags (applied by
//! [`crate::config::Config`]).
//!
//! # Settings File Format
//!
//! ```toml
//! [project]
//! base_branch = "main"
//! worktree_root = ".worktrees"
//! state_dir = "/var/tmp/hatrack"
//! remote = "origin"
//!
//! [executor]
//! command = "claude"
//! args = ["--model", "opus"]
//! skip_permissions = true
//!
//! [construct]
//! max_iterations = 50
//!
//! [verification]
//! commands = ["cargo test"]
//!
//! [workflows.fast]
//! hats = ["planner", "builder"]
//! retry_hat = "builder"
//! integrate = false
//! ```

use crate::errors::ConfigError;
use crate::intent::ARTIFACTS_DIR;
use crate::workflow::{WorkflowRegistry, WorkflowSettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Settings file name inside the artifacts directory.
pub const SETTINGS_FILE: &str = "settings.toml";

/// Environment override for `[executor] command`.
pub const EXECUTOR_CMD_ENV: &str = "HATRACK_EXECUTOR_CMD";

/// Environment override for `[project] state_dir`.
pub const STATE_DIR_ENV: &str = "HATRACK_STATE_DIR";

/// `<project>/.ai-dlc/settings.toml`.
pub fn settings_path(project_dir: &Path) -> PathBuf {
    project_dir.join(ARTIFACTS_DIR).join(SETTINGS_FILE)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Branch new intent branches start from; the main checkout's branch when unset
    #[serde(default)]
    pub base_branch: Option<String>,
    /// Worktree directory, relative to the project dir (default `.worktrees`)
    #[serde(default)]
    pub worktree_root: Option<PathBuf>,
    /// State store root; `<git common dir>/hatrack/state` when unset
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default = "default_remote")]
    pub remote: String,
}

fn default_remote() -> String {
    "origin".to_string()
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            base_branch: None,
            worktree_root: None,
            state_dir: None,
            remote: default_remote(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorSection {
    #[serde(default = "default_executor_command")]
    pub command: String,
    /// Extra arguments after the built-in flags
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_skip_permissions")]
    pub skip_permissions: bool,
}

fn default_executor_command() -> String {
    "claude".to_string()
}

fn default_skip_permissions() -> bool {
    true
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            command: default_executor_command(),
            args: Vec::new(),
            skip_permissions: default_skip_permissions(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructSection {
    /// Dispatch rounds per `construct` invocation
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_max_iterations() -> u32 {
    50
}

impl Default for ConstructSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSection {
    /// Shell commands run in the intent workspace before `done`
    #[serde(default)]
    pub commands: Vec<String>,
}

/// The complete settings.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HatrackToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub construct: ConstructSection,
    #[serde(default)]
    pub verification: VerificationSection,
    #[serde(default)]
    pub workflows: BTreeMap<String, WorkflowSettings>,
}

impl HatrackToml {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &content)
    }

    pub fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Settings {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load `<project>/.ai-dlc/settings.toml`, or defaults if it does not exist.
    pub fn load_or_default(project_dir: &Path) -> Result<Self, ConfigError> {
        let path = settings_path(project_dir);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply environment overrides. `get` is `std::env::var(..).ok()` outside tests.
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(command) = get(EXECUTOR_CMD_ENV).filter(|v| !v.trim().is_empty()) {
            self.executor.command = command;
        }
        if let Some(dir) = get(STATE_DIR_ENV).filter(|v| !v.trim().is_empty()) {
            self.project.state_dir = Some(PathBuf::from(dir));
        }
    }

    /// Resolve the workflow registry and check the remaining fields.
    pub fn validate(&self, path: &Path) -> Result<WorkflowRegistry, ConfigError> {
        if self.construct.max_iterations == 0 {
            return Err(ConfigError::Settings {
                path: path.to_path_buf(),
                message: "construct.max_iterations must be at least 1".to_string(),
            });
        }
        if self.executor.command.trim().is_empty() {
            return Err(ConfigError::Settings {
                path: path.to_path_buf(),
                message: "executor.command must not be empty".to_string(),
            });
        }
        WorkflowRegistry::with_settings(&self.workflows)
    }
}
