//! The hat state machine.
//!
//! Transitions are pure: each takes the current `IterationState` and returns
//! the next one, leaving the input untouched. A rejected transition therefore
//! never has side effects; persisting the result is the driver's job.

use super::{IterationState, WorkflowDefinition};
use crate::errors::{OrchestratorError, PreconditionError, StateError};
use crate::graph::{BlockedUnit, UnitGraph, UnitStatus};
use crate::intent::IntentStatus;
use serde::Serialize;
use tracing::{debug, info};

/// Result of `advance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    /// Moved to the next hat
    Moved { from: String, to: String },
    /// Terminal hat, every unit complete: the caller must run `done`
    ReadyToFinalize,
    /// Terminal hat, more units ready: back to the retry hat
    Retry { hat: String },
    /// Terminal hat, nothing can proceed without a human
    Blocked { units: Vec<BlockedUnit> },
}

#[derive(Debug, Clone)]
pub struct WorkflowEngine {
    workflow: WorkflowDefinition,
}

impl WorkflowEngine {
    pub fn new(workflow: WorkflowDefinition) -> Self {
        Self { workflow }
    }

    pub fn workflow(&self) -> &WorkflowDefinition {
        &self.workflow
    }

    fn position(&self, state: &IterationState) -> Result<usize, StateError> {
        self.workflow
            .position(&state.hat)
            .ok_or_else(|| StateError::UnknownHat {
                hat: state.hat.clone(),
                workflow: self.workflow.name.clone(),
            })
    }

    /// Move one hat forward, or decide what happens after the terminal hat.
    pub fn advance(
        &self,
        state: &IterationState,
        graph: &UnitGraph,
    ) -> Result<(IterationState, AdvanceOutcome), OrchestratorError> {
        if state.is_complete() {
            return Err(PreconditionError::AlreadyComplete.into());
        }
        let index = self.position(state)?;
        let mut next = state.clone();

        if index + 1 < self.workflow.hats.len() {
            let to = self.workflow.hats[index + 1].clone();
            next.hat = to.clone();
            next.touch();
            info!(intent = %state.intent, from = %state.hat, to = %to, "advanced hat");
            return Ok((
                next,
                AdvanceOutcome::Moved {
                    from: state.hat.clone(),
                    to,
                },
            ));
        }

        let summary = graph.summary();
        if summary.all_complete {
            debug!(intent = %state.intent, "all units complete, ready to finalize");
            return Ok((next, AdvanceOutcome::ReadyToFinalize));
        }

        if !graph.ready_units().is_empty() {
            next.hat = self.workflow.retry_hat.clone();
            next.current_unit = None;
            next.iteration += 1;
            next.touch();
            info!(
                intent = %state.intent,
                hat = %next.hat,
                iteration = next.iteration,
                "units remain, returning to retry hat"
            );
            return Ok((
                next,
                AdvanceOutcome::Retry {
                    hat: self.workflow.retry_hat.clone(),
                },
            ));
        }

        info!(intent = %state.intent, blocked = summary.blocked.len(), "intent blocked");
        Ok((
            next,
            AdvanceOutcome::Blocked {
                units: summary.blocked,
            },
        ))
    }

    /// Return to the retry hat unconditionally. The current unit is kept.
    pub fn fail(&self, state: &IterationState) -> Result<IterationState, OrchestratorError> {
        if state.is_complete() {
            return Err(PreconditionError::AlreadyComplete.into());
        }
        self.position(state)?;

        let mut next = state.clone();
        next.hat = self.workflow.retry_hat.clone();
        next.iteration += 1;
        next.touch();
        info!(
            intent = %state.intent,
            from = %state.hat,
            to = %next.hat,
            iteration = next.iteration,
            "hat failed, returning to retry hat"
        );
        Ok(next)
    }

    /// React to an `issues` outcome.
    ///
    /// Hats after the retry hat go back to it (`fail`). The retry hat itself
    /// and the hats before it (decomposition, planning) run again in place,
    /// since sending them "back" would skip ahead.
    pub fn on_issues(&self, state: &IterationState) -> Result<IterationState, OrchestratorError> {
        let index = self.position(state)?;
        let retry = self.workflow.position(&self.workflow.retry_hat).unwrap_or(0);
        if index > retry {
            return self.fail(state);
        }
        if state.is_complete() {
            return Err(PreconditionError::AlreadyComplete.into());
        }

        let mut next = state.clone();
        next.iteration += 1;
        next.touch();
        info!(
            intent = %state.intent,
            hat = %state.hat,
            iteration = next.iteration,
            "hat reported issues, repeating it"
        );
        Ok(next)
    }

    /// Check every guard of `done`, in order, without changing anything.
    pub fn check_done(
        &self,
        state: &IterationState,
        graph: &UnitGraph,
        criteria_verified: bool,
    ) -> Result<(), PreconditionError> {
        if state.is_complete() {
            return Err(PreconditionError::AlreadyComplete);
        }
        if !self.workflow.is_terminal(&state.hat) {
            return Err(PreconditionError::NotTerminalHat {
                current: state.hat.clone(),
                terminal: self.workflow.terminal_hat().to_string(),
            });
        }
        if !graph.summary().all_complete {
            let remaining = graph
                .units()
                .iter()
                .filter(|u| u.status != UnitStatus::Completed)
                .map(|u| u.id.clone())
                .collect();
            return Err(PreconditionError::UnitsIncomplete { remaining });
        }
        if !criteria_verified {
            return Err(PreconditionError::CriteriaNotVerified);
        }
        Ok(())
    }

    /// Guarded terminal transition. Returns the completed state.
    ///
    /// Callers that integrate first use [`check_done`](Self::check_done) and
    /// only then [`complete`](Self::complete).
    pub fn done(
        &self,
        state: &IterationState,
        graph: &UnitGraph,
        criteria_verified: bool,
    ) -> Result<IterationState, PreconditionError> {
        self.check_done(state, graph, criteria_verified)?;
        Ok(self.complete(state))
    }

    pub fn complete(&self, state: &IterationState) -> IterationState {
        let mut next = state.clone();
        next.status = IntentStatus::Complete;
        next.current_unit = None;
        next.touch();
        info!(intent = %state.intent, "intent complete");
        next
    }

    /// Hat to restart from when no run state exists.
    pub fn resume(&self, graph: &UnitGraph) -> &str {
        if graph.is_empty() {
            return self.workflow.decomposition_hat();
        }
        if graph.summary().all_complete {
            return self.workflow.terminal_hat();
        }
        let in_progress = graph
            .units()
            .iter()
            .any(|u| u.status == UnitStatus::InProgress);
        if in_progress || !graph.ready_units().is_empty() {
            return &self.workflow.retry_hat;
        }
        self.workflow.decomposition_hat()
    }
}
