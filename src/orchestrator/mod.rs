//! The driver behind the command surface.
//!
//! [`Orchestrator`] wires the unit graph, the workflow engine, the state
//! store, workspaces and the integrator to an [`Executor`](crate::executor::Executor).
//! Every command returns a serializable report; a rejected precondition is an
//! error and leaves state untouched.

mod construct;
mod driver;

pub use driver::Orchestrator;

use crate::executor::Outcome;
use crate::graph::{BlockedUnit, GraphSummary};
use crate::integrate::{IntegrationOutcome, UnitLanding};
use crate::intent::{ChangeStrategy, IntentStatus};
use crate::workflow::{AdvanceOutcome, IterationState};
use serde::Serialize;
use std::path::PathBuf;

/// One executor dispatch inside `construct`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Round {
    pub iteration: u32,
    pub hat: String,
    pub unit: Option<String>,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landing: Option<UnitLanding>,
}

/// Why `construct` stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "halt", rename_all = "snake_case")]
pub enum Halt {
    /// Intent marked complete
    Completed { integration: IntegrationOutcome },
    /// Waiting for a merge request to be approved; run `construct` again later
    AwaitingApproval { url: String },
    /// Every unit is done but some work has not landed
    IntegrationBlocked { errors: Vec<String> },
    /// The executor asked for a human
    ExecutorBlocked {
        hat: String,
        unit: Option<String>,
        notes: String,
    },
    /// No unit can be scheduled
    UnitsBlocked { units: Vec<BlockedUnit> },
    IterationLimit { rounds: u32 },
}

impl From<IntegrationOutcome> for Halt {
    fn from(outcome: IntegrationOutcome) -> Self {
        match outcome {
            IntegrationOutcome::PrCreated { url } => Halt::AwaitingApproval { url },
            IntegrationOutcome::Blocked { errors } => Halt::IntegrationBlocked { errors },
            integration => Halt::Completed { integration },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConstructReport {
    pub intent: String,
    pub rounds: Vec<Round>,
    pub halt: Halt,
    pub state: IterationState,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdvanceReport {
    pub state: IterationState,
    pub outcome: AdvanceOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoneReport {
    pub state: IterationState,
    pub integration: IntegrationOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumeReport {
    pub intent: String,
    /// Where the intent was found
    pub source: String,
    /// Artifact files copied into the intent workspace
    pub copied: usize,
    pub workspace: PathBuf,
    pub state: IterationState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetReport {
    pub intent: String,
    pub scopes: Vec<String>,
    pub removed: usize,
    pub archive: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub intent: String,
    pub workflow: String,
    pub strategy: ChangeStrategy,
    pub status: IntentStatus,
    pub branch: String,
    pub workspace: Option<PathBuf>,
    /// `None` until `resume` has run
    pub state: Option<IterationState>,
    pub units: GraphSummary,
}
