//! Typed error hierarchy for the hatrack orchestrator.
//!
//! One enum per failure class:
//! - `ConfigError`: malformed definitions, dependency cycles (fatal, parse time)
//! - `StateError`: missing or corrupt persisted state (remedied by `resume`)
//! - `PreconditionError`: a guarded command was called in the wrong situation
//! - `IntegrationError`: merge / PR finalization failed
//! - `WorkspaceError`: branch or worktree plumbing failed
//!
//! `OrchestratorError` wraps all of them for the driver and command surface.
//! A blocked intent is not an error; see `workflow::AdvanceOutcome::Blocked`.

use std::path::PathBuf;
use thiserror::Error;

/// Malformed definitions, caught when documents are parsed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid frontmatter in {path}: {message}")]
    Frontmatter { path: PathBuf, message: String },

    #[error("Duplicate unit id: {0}")]
    DuplicateUnit(String),

    #[error("Unit id '{0}' is reserved for the intent workspace branch")]
    ReservedUnitId(String),

    #[error("Unknown dependency '{dependency}' in unit '{unit}': no unit with that id exists")]
    UnknownDependency { unit: String, dependency: String },

    #[error("Cycle detected in unit dependencies. Involved units: {0:?}")]
    Cycle(Vec<String>),

    #[error("Unknown workflow '{0}'")]
    UnknownWorkflow(String),

    #[error("Invalid workflow '{name}': {message}")]
    InvalidWorkflow { name: String, message: String },

    #[error("Failed to parse settings file {path}: {message}")]
    Settings { path: PathBuf, message: String },
}

/// Missing or corrupt persisted run state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("No iteration state for intent '{intent}'. Run 'hatrack resume {intent}' first")]
    Missing { intent: String },

    #[error("Corrupt state entry '{key}' for {scope}: {message}. Run 'hatrack resume' to rebuild it")]
    Corrupt {
        scope: String,
        key: String,
        message: String,
    },

    #[error("Hat '{hat}' is not part of workflow '{workflow}'")]
    UnknownHat { hat: String, workflow: String },

    #[error("Intent '{0}' has no units; it needs decomposition. Run 'hatrack resume' to return to the first hat")]
    NoUnits(String),

    #[error("State store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A guarded command was rejected. Rejections never have side effects.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("Intent is already complete")]
    AlreadyComplete,

    #[error("'done' is only legal from the terminal hat '{terminal}' (current hat: '{current}')")]
    NotTerminalHat { current: String, terminal: String },

    #[error("Not all units are complete: {remaining:?}")]
    UnitsIncomplete { remaining: Vec<String> },

    #[error("Success criteria have not been verified")]
    CriteriaNotVerified,

    #[error("Illegal unit transition for '{unit}': {from} -> {to}")]
    IllegalTransition {
        unit: String,
        from: String,
        to: String,
    },

    #[error("Unknown unit '{0}'")]
    UnknownUnit(String),

    #[error("Unit '{unit}' is already claimed (status: {status})")]
    AlreadyClaimed { unit: String, status: String },

    #[error("Unit '{0}' is in progress and the 'intent' strategy runs one unit at a time")]
    SerialStrategyBusy(String),

    #[error("Integration is only possible once every unit is complete")]
    NotReadyToIntegrate,
}

/// Merge / PR finalization failed. The DAG stays all-complete-but-unintegrated,
/// so retrying is safe.
#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("Merge request for '{head}' was closed without merging: {url}")]
    RequestClosed { head: String, url: String },

    #[error("Merge request operation failed: {0}")]
    Requests(String),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

/// Branch or worktree plumbing failed.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Intent '{0}' not found on disk, in local branches, or on the remote")]
    NotFound(String),

    #[error("Path {path} is already a workspace for '{existing}', not '{requested}'")]
    PathConflict {
        path: PathBuf,
        existing: String,
        requested: String,
    },

    #[error("Git operation failed: {0}")]
    Git(String),

    #[error("Failed to copy intent artifacts into {path}: {message}")]
    Copy { path: PathBuf, message: String },
}

/// Errors from the orchestrator driver and command surface.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Integration(#[from] IntegrationError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("Executor failed for hat '{hat}': {message}")]
    Executor { hat: String, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// Whether the failure was a rejected precondition (no side effects happened).
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_))
    }
}
