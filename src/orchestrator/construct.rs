//! The `construct` loop: claim, dispatch, react.

use super::driver::IntentContext;
use super::{ConstructReport, Halt, Orchestrator, Round};
use crate::errors::{OrchestratorError, StateError};
use crate::executor::{ExecutionReport, ExecutionRequest, Outcome};
use crate::graph::{Unit, UnitGraph, UnitStatus};
use crate::intent::ChangeStrategy;
use crate::state::{BLOCKERS_KEY, SCRATCHPAD_KEY};
use crate::workflow::{AdvanceOutcome, IterationState, WorkflowEngine};
use crate::workspace::Workspace;
use tracing::{debug, info, warn};

enum Step {
    Continue(Round),
    Halt {
        round: Option<Round>,
        halt: Halt,
        state: IterationState,
    },
}

impl Orchestrator {
    /// Drive the intent until it halts or `max_iterations` rounds have run.
    ///
    /// Every transition is persisted before the next dispatch, so an
    /// interrupted run continues where it stopped.
    pub async fn construct(&self, slug: Option<&str>) -> Result<ConstructReport, OrchestratorError> {
        let slug = self.resolve_slug(slug)?;
        let mut ctx = self.open_intent(&slug)?;
        let mut rounds = Vec::new();

        for _ in 0..self.config.max_iterations {
            let state = self.load_state(&ctx)?;
            if state.is_complete() {
                return Err(crate::errors::PreconditionError::AlreadyComplete.into());
            }
            let engine = self.engine_for(&ctx, &state)?;

            match self.step(&mut ctx, &engine, state).await? {
                Step::Continue(round) => rounds.push(round),
                Step::Halt { round, halt, state } => {
                    rounds.extend(round);
                    info!(intent = %slug, rounds = rounds.len(), halt = ?halt, "construct halted");
                    return Ok(ConstructReport {
                        intent: slug,
                        rounds,
                        halt,
                        state,
                    });
                }
            }
        }

        let state = self.load_state(&ctx)?;
        warn!(intent = %slug, rounds = rounds.len(), "iteration limit reached");
        Ok(ConstructReport {
            intent: slug,
            halt: Halt::IterationLimit {
                rounds: self.config.max_iterations,
            },
            rounds,
            state,
        })
    }

    async fn step(
        &self,
        ctx: &mut IntentContext,
        engine: &WorkflowEngine,
        mut state: IterationState,
    ) -> Result<Step, OrchestratorError> {
        let workflow = engine.workflow();
        let graph = ctx.units.load_graph()?;
        let decomposing = state.hat == workflow.decomposition_hat();

        let unit = if decomposing {
            None
        } else {
            self.select_unit(ctx, &mut state, &graph)?
        };

        if !decomposing && unit.is_none() {
            if graph.is_empty() {
                return Err(StateError::NoUnits(ctx.slug().to_string()).into());
            }
            let summary = graph.summary();
            if !summary.all_complete {
                info!(intent = %state.intent, blocked = summary.blocked.len(), "no unit can be scheduled");
                return Ok(Step::Halt {
                    round: None,
                    halt: Halt::UnitsBlocked {
                        units: summary.blocked,
                    },
                    state,
                });
            }

            if !workflow.is_terminal(&state.hat) {
                state.hat = workflow.terminal_hat().to_string();
                state.touch();
            }
            self.save_state(ctx, &state)?;
            let (state, integration) = self.finalize(ctx, engine, &state, &graph).await?;
            return Ok(Step::Halt {
                round: None,
                halt: integration.into(),
                state,
            });
        }

        let workspace = match &unit {
            Some(unit) => self.workspaces.unit_workspace(
                &ctx.doc.intent,
                unit,
                state.iteration,
                &ctx.workspace,
            )?,
            None => ctx.workspace.clone(),
        };

        let report = self.dispatch(ctx, &state, unit.as_ref(), &workspace).await?;
        let mut round = Round {
            iteration: state.iteration,
            hat: state.hat.clone(),
            unit: unit.as_ref().map(|u| u.id.clone()),
            outcome: report.outcome,
            landing: None,
        };

        match report.outcome {
            Outcome::Blocked => {
                let notes = if report.notes.trim().is_empty() {
                    format!("The {} hat reported blocked without notes", state.hat)
                } else {
                    report.notes.clone()
                };
                self.store.save(&workspace.scope(), BLOCKERS_KEY, &notes)?;
                warn!(intent = %state.intent, hat = %state.hat, unit = ?round.unit, "executor blocked");
                Ok(Step::Halt {
                    halt: Halt::ExecutorBlocked {
                        hat: state.hat.clone(),
                        unit: round.unit.clone(),
                        notes,
                    },
                    round: Some(round),
                    state,
                })
            }
            Outcome::Issues => {
                let next = engine.on_issues(&state)?;
                self.save_state(ctx, &next)?;
                Ok(Step::Continue(round))
            }
            Outcome::Success if !workflow.is_terminal(&state.hat) => {
                let (next, _) = engine.advance(&state, &graph)?;
                self.save_state(ctx, &next)?;
                Ok(Step::Continue(round))
            }
            Outcome::Success => {
                let graph = match &unit {
                    Some(unit) => {
                        let landing = self
                            .integrator
                            .land_unit(&ctx.doc.intent, workflow, unit, &workspace, &ctx.workspace)
                            .await?;
                        round.landing = Some(landing);
                        ctx.units.write_status(&unit.id, UnitStatus::Completed)?;

                        let graph = ctx.units.load_graph()?;
                        let unblocked = graph.newly_ready_after(&unit.id);
                        if !unblocked.is_empty() {
                            info!(unit = %unit.id, unblocked = ?unblocked, "dependents ready");
                        }
                        graph
                    }
                    None => graph,
                };

                let (mut next, outcome) = engine.advance(&state, &graph)?;
                next.current_unit = None;
                self.save_state(ctx, &next)?;

                match outcome {
                    AdvanceOutcome::ReadyToFinalize => {
                        let (state, integration) =
                            self.finalize(ctx, engine, &next, &graph).await?;
                        Ok(Step::Halt {
                            round: Some(round),
                            halt: integration.into(),
                            state,
                        })
                    }
                    AdvanceOutcome::Blocked { units } => Ok(Step::Halt {
                        round: Some(round),
                        halt: Halt::UnitsBlocked { units },
                        state: next,
                    }),
                    AdvanceOutcome::Retry { .. } | AdvanceOutcome::Moved { .. } => {
                        Ok(Step::Continue(round))
                    }
                }
            }
        }
    }

    /// The unit the current hat works on: the recorded one while it is still
    /// in progress, else a lone in-progress unit nobody recorded (a claim
    /// interrupted before the state was saved), else a freshly claimed one.
    /// The choice is persisted before any work starts.
    fn select_unit(
        &self,
        ctx: &IntentContext,
        state: &mut IterationState,
        graph: &UnitGraph,
    ) -> Result<Option<Unit>, OrchestratorError> {
        if let Some(id) = state.current_unit.clone() {
            match graph.get(&id) {
                Some(unit) if unit.status == UnitStatus::InProgress => {
                    return Ok(Some(unit.clone()));
                }
                found => {
                    debug!(
                        unit = %id,
                        status = ?found.map(|u| u.status),
                        "recorded unit is no longer in progress"
                    );
                    state.current_unit = None;
                }
            }
        }

        let mut in_progress = graph
            .units()
            .iter()
            .filter(|u| u.status == UnitStatus::InProgress);
        if let (Some(orphan), None) = (in_progress.next(), in_progress.next()) {
            info!(intent = %state.intent, unit = %orphan.id, "adopting unrecorded claim");
            state.current_unit = Some(orphan.id.clone());
            state.touch();
            self.save_state(ctx, state)?;
            return Ok(Some(orphan.clone()));
        }

        let exclusive = ctx.doc.intent.change_strategy == ChangeStrategy::Intent;
        let claimed = ctx.units.claim_next(exclusive)?;
        if let Some(unit) = &claimed {
            state.current_unit = Some(unit.id.clone());
            state.touch();
            self.save_state(ctx, state)?;
        }
        Ok(claimed)
    }

    async fn dispatch(
        &self,
        ctx: &IntentContext,
        state: &IterationState,
        unit: Option<&Unit>,
        workspace: &Workspace,
    ) -> Result<ExecutionReport, OrchestratorError> {
        let scope = workspace.scope();
        let notes = self.store.load(&scope, SCRATCHPAD_KEY)?;
        let criteria = match unit {
            Some(unit) => unit.criteria.clone(),
            None => ctx.doc.intent.success_criteria.clone(),
        };

        let request = ExecutionRequest {
            intent: ctx.slug().to_string(),
            hat: state.hat.clone(),
            iteration: state.iteration,
            unit_id: unit.map(|u| u.id.clone()),
            discipline: unit.and_then(|u| u.discipline.clone()),
            criteria,
            workspace_path: workspace.path.clone(),
            notes: notes.clone(),
        };

        let report = self
            .executor
            .submit(&request)
            .await
            .map_err(|e| OrchestratorError::Executor {
                hat: state.hat.clone(),
                message: format!("{:#}", e),
            })?;
        info!(
            intent = %request.intent,
            hat = %request.hat,
            unit = request.unit_id.as_deref().unwrap_or("-"),
            iteration = request.iteration,
            outcome = %report.outcome,
            "hat finished"
        );

        if !report.notes.trim().is_empty() {
            let mut pad = notes.unwrap_or_default();
            pad.push_str(&format!(
                "## {} (iteration {}, {})\n\n{}\n\n",
                state.hat,
                state.iteration,
                report.outcome,
                report.notes.trim()
            ));
            self.store.save(&scope, SCRATCHPAD_KEY, &pad)?;
        }
        Ok(report)
    }
}
