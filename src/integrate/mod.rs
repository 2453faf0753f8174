//! Final merge / merge-request reconciliation per change strategy.
//!
//! | strategy | when a unit completes              | when the intent is done                    |
//! |----------|------------------------------------|--------------------------------------------|
//! | trunk    | merge into the intent branch, drop | no unit branch left unmerged               |
//! | unit     | open a request for the unit branch | every unit has a merged request            |
//! | bolt     | open a request for the bolt branch | every unit: a merged bolt, none open       |
//! | intent   | nothing                            | one request for the whole intent, merged   |
//!
//! Everything here is re-checkable: calling `integrate` again after an error
//! or a `pr_created` result is safe.

mod requests;

pub use requests::{GhCli, MergeRequest, MergeRequests, RequestState, parse_gh_list};

use crate::errors::{IntegrationError, OrchestratorError, PreconditionError, WorkspaceError};
use crate::graph::{Unit, UnitGraph};
use crate::intent::{ChangeStrategy, Intent};
use crate::workflow::WorkflowDefinition;
use crate::workspace::{Workspace, WorkspaceManager};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of finalizing an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum IntegrationOutcome {
    Completed,
    /// Waiting for approval of this request; not complete yet
    PrCreated { url: String },
    /// Units whose work has not landed
    Blocked { errors: Vec<String> },
    /// Integration disabled for the workflow
    Skipped { reason: String },
}

impl IntegrationOutcome {
    /// Whether the intent may be marked complete.
    pub fn completes_intent(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped { .. })
    }
}

/// What happened to a unit's work when it completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "landing", rename_all = "snake_case")]
pub enum UnitLanding {
    /// Merged into the intent branch; unit branch and worktree removed
    Merged,
    Requested { url: String },
    /// Lands with the intent (or integration is disabled)
    Deferred,
}

pub struct Integrator {
    workspaces: Arc<WorkspaceManager>,
    requests: Arc<dyn MergeRequests>,
}

fn requests_err(e: anyhow::Error) -> IntegrationError {
    IntegrationError::Requests(format!("{:#}", e))
}

fn vcs_err(e: anyhow::Error) -> IntegrationError {
    IntegrationError::Workspace(WorkspaceError::Git(format!("{:#}", e)))
}

impl Integrator {
    pub fn new(workspaces: Arc<WorkspaceManager>, requests: Arc<dyn MergeRequests>) -> Self {
        Self {
            workspaces,
            requests,
        }
    }

    fn request_body(intent: &Intent, unit: Option<&Unit>) -> String {
        let criteria = match unit {
            Some(unit) => &unit.criteria,
            None => &intent.success_criteria,
        };
        let mut body = String::from("## Criteria\n\n");
        if criteria.is_empty() {
            body.push_str("No criteria recorded.\n");
        }
        for criterion in criteria {
            body.push_str(&format!("- [x] {}\n", criterion));
        }
        body
    }

    /// Land a unit's work after it passed the terminal hat.
    ///
    /// Runs before the unit is marked completed, so a failure leaves the unit
    /// in progress and the call can be repeated.
    pub async fn land_unit(
        &self,
        intent: &Intent,
        workflow: &WorkflowDefinition,
        unit: &Unit,
        unit_ws: &Workspace,
        intent_ws: &Workspace,
    ) -> Result<UnitLanding, IntegrationError> {
        if !workflow.integrate || unit_ws.branch == intent_ws.branch {
            return Ok(UnitLanding::Deferred);
        }

        match intent.change_strategy {
            ChangeStrategy::Intent => Ok(UnitLanding::Deferred),
            ChangeStrategy::Trunk => {
                let vcs = self.workspaces.vcs();
                vcs.merge(&unit_ws.branch, &intent_ws.path).map_err(vcs_err)?;
                vcs.remove_worktree(&unit_ws.path).map_err(vcs_err)?;
                vcs.delete_branch(&unit_ws.branch).map_err(vcs_err)?;
                info!(
                    intent = %intent.slug,
                    unit = %unit.id,
                    into = %intent_ws.branch,
                    "unit merged into intent branch"
                );
                Ok(UnitLanding::Merged)
            }
            ChangeStrategy::Unit | ChangeStrategy::Bolt => {
                let existing = self
                    .requests
                    .list(&unit_ws.branch)
                    .await
                    .map_err(requests_err)?
                    .into_iter()
                    .find(|r| r.head == unit_ws.branch && r.state != RequestState::Closed);
                if let Some(request) = existing {
                    return Ok(UnitLanding::Requested { url: request.url });
                }

                let base = self.workspaces.base_branch()?;
                let title = format!("{}: {}", intent.slug, unit.id);
                let request = self
                    .requests
                    .create(
                        &unit_ws.branch,
                        &base,
                        &title,
                        &Self::request_body(intent, Some(unit)),
                    )
                    .await
                    .map_err(requests_err)?;
                info!(intent = %intent.slug, unit = %unit.id, url = %request.url, "unit request opened");
                Ok(UnitLanding::Requested { url: request.url })
            }
        }
    }

    /// Reconcile the intent once every unit is complete.
    pub async fn integrate(
        &self,
        intent: &Intent,
        workflow: &WorkflowDefinition,
        graph: &UnitGraph,
        intent_ws: &Workspace,
    ) -> Result<IntegrationOutcome, OrchestratorError> {
        if !graph.summary().all_complete {
            return Err(PreconditionError::NotReadyToIntegrate.into());
        }
        if !workflow.integrate {
            return Ok(IntegrationOutcome::Skipped {
                reason: format!("integration is disabled for workflow '{}'", workflow.name),
            });
        }

        let outcome = match intent.change_strategy {
            ChangeStrategy::Trunk => self.check_trunk(intent, graph, intent_ws)?,
            ChangeStrategy::Unit => self.check_unit_requests(intent, graph).await?,
            ChangeStrategy::Bolt => self.check_bolt_requests(intent, graph).await?,
            ChangeStrategy::Intent => self.reconcile_intent_request(intent, intent_ws).await?,
        };
        info!(intent = %intent.slug, strategy = %intent.change_strategy, outcome = ?outcome, "integration checked");
        Ok(outcome)
    }

    fn check_trunk(
        &self,
        intent: &Intent,
        graph: &UnitGraph,
        intent_ws: &Workspace,
    ) -> Result<IntegrationOutcome, IntegrationError> {
        let vcs = self.workspaces.vcs();
        let mut errors = Vec::new();
        for unit in graph.units() {
            let branch = self.workspaces.unit_branch(intent, unit, 0);
            if !vcs.branch_exists(&branch).map_err(vcs_err)? {
                continue;
            }
            if !vcs.is_merged(&branch, &intent_ws.branch).map_err(vcs_err)? {
                errors.push(format!(
                    "{}: branch '{}' is not merged into '{}'",
                    unit.id, branch, intent_ws.branch
                ));
            }
        }
        Ok(blocked_or_completed(errors))
    }

    async fn check_unit_requests(
        &self,
        intent: &Intent,
        graph: &UnitGraph,
    ) -> Result<IntegrationOutcome, IntegrationError> {
        let all = self
            .requests
            .list(&format!("{}/", intent.slug))
            .await
            .map_err(requests_err)?;

        let mut errors = Vec::new();
        for unit in graph.units() {
            let branch = self.workspaces.unit_branch(intent, unit, 0);
            let mine: Vec<&MergeRequest> = all.iter().filter(|r| r.head == branch).collect();
            if mine.iter().any(|r| r.state == RequestState::Merged) {
                continue;
            }
            errors.push(match mine.iter().find(|r| r.state == RequestState::Open) {
                Some(open) => format!("{}: request not merged yet ({})", unit.id, open.url),
                None => format!("{}: no merged request for '{}'", unit.id, branch),
            });
        }
        Ok(blocked_or_completed(errors))
    }

    async fn check_bolt_requests(
        &self,
        intent: &Intent,
        graph: &UnitGraph,
    ) -> Result<IntegrationOutcome, IntegrationError> {
        let all = self
            .requests
            .list(&format!("{}/", intent.slug))
            .await
            .map_err(requests_err)?;

        let mut errors = Vec::new();
        for unit in graph.units() {
            let prefix = format!("{}/{}/", intent.slug, unit.id);
            let bolts: Vec<&MergeRequest> =
                all.iter().filter(|r| r.head.starts_with(&prefix)).collect();

            if let Some(open) = bolts.iter().find(|r| r.state == RequestState::Open) {
                errors.push(format!("{}: bolt request still open ({})", unit.id, open.url));
            } else if !bolts.iter().any(|r| r.state == RequestState::Merged) {
                errors.push(format!("{}: no merged bolt request", unit.id));
            }
        }
        Ok(blocked_or_completed(errors))
    }

    async fn reconcile_intent_request(
        &self,
        intent: &Intent,
        intent_ws: &Workspace,
    ) -> Result<IntegrationOutcome, IntegrationError> {
        let mine: Vec<MergeRequest> = self
            .requests
            .list(&intent_ws.branch)
            .await
            .map_err(requests_err)?
            .into_iter()
            .filter(|r| r.head == intent_ws.branch)
            .collect();

        if mine.iter().any(|r| r.state == RequestState::Merged) {
            return Ok(IntegrationOutcome::Completed);
        }
        if let Some(open) = mine.iter().find(|r| r.state == RequestState::Open) {
            return Ok(IntegrationOutcome::PrCreated {
                url: open.url.clone(),
            });
        }
        if let Some(closed) = mine.first() {
            warn!(intent = %intent.slug, url = %closed.url, "intent request was closed");
            return Err(IntegrationError::RequestClosed {
                head: intent_ws.branch.clone(),
                url: closed.url.clone(),
            });
        }

        let base = self.workspaces.base_branch()?;
        let request = self
            .requests
            .create(
                &intent_ws.branch,
                &base,
                &intent.slug,
                &Self::request_body(intent, None),
            )
            .await
            .map_err(requests_err)?;
        Ok(IntegrationOutcome::PrCreated { url: request.url })
    }
}

fn blocked_or_completed(errors: Vec<String>) -> IntegrationOutcome {
    if errors.is_empty() {
        IntegrationOutcome::Completed
    } else {
        IntegrationOutcome::Blocked { errors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::UnitStatus;
    use crate::testutil::{FakeRequests, commit_file, setup_repo};
    use crate::workflow::WorkflowRegistry;
    use crate::workspace::Git2Vcs;
    use std::path::Path;

    fn intent(strategy: ChangeStrategy) -> Intent {
        Intent {
            slug: "shop".into(),
            workflow_name: "default".into(),
            status: Default::default(),
            success_criteria: vec!["Checkout works".into()],
            change_strategy: strategy,
            testing_requirements: Default::default(),
        }
    }

    fn workflow() -> WorkflowDefinition {
        WorkflowRegistry::default().get("default").unwrap().clone()
    }

    fn manager(dir: &Path) -> Arc<WorkspaceManager> {
        Arc::new(WorkspaceManager::new(
            Arc::new(Git2Vcs::new(dir)),
            dir,
            dir.join(".worktrees"),
            "origin",
            Some("trunk".into()),
        ))
    }

    fn completed(ids: &[&str]) -> UnitGraph {
        UnitGraph::parse(
            ids.iter()
                .map(|id| Unit::new(id, UnitStatus::Completed, vec![]))
                .collect(),
        )
        .unwrap()
    }

    fn request(head: &str, state: RequestState) -> MergeRequest {
        MergeRequest {
            number: 1,
            url: format!("https://example.test/{}", head),
            head: head.into(),
            state,
        }
    }

    fn detached_workspace(branch: &str) -> Workspace {
        Workspace {
            intent: "shop".into(),
            branch: branch.into(),
            path: "/nonexistent".into(),
            unit: None,
        }
    }

    #[tokio::test]
    async fn test_refuses_before_all_complete() {
        let dir = setup_repo();
        let integrator = Integrator::new(manager(dir.path()), Arc::new(FakeRequests::default()));
        let graph = UnitGraph::parse(vec![Unit::new("u1", UnitStatus::InProgress, vec![])]).unwrap();
        let err = integrator
            .integrate(
                &intent(ChangeStrategy::Unit),
                &workflow(),
                &graph,
                &detached_workspace("shop/main"),
            )
            .await
            .unwrap_err();
        assert!(err.is_precondition());
    }

    #[tokio::test]
    async fn test_disabled_workflow_is_skipped() {
        let dir = setup_repo();
        let integrator = Integrator::new(manager(dir.path()), Arc::new(FakeRequests::default()));
        let mut wf = workflow();
        wf.integrate = false;
        let outcome = integrator
            .integrate(
                &intent(ChangeStrategy::Intent),
                &wf,
                &completed(&["u1"]),
                &detached_workspace("shop"),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, IntegrationOutcome::Skipped { .. }));
        assert!(outcome.completes_intent());
    }

    #[tokio::test]
    async fn test_intent_strategy_creates_then_waits_then_completes() {
        let dir = setup_repo();
        let fake = Arc::new(FakeRequests::default());
        let integrator = Integrator::new(manager(dir.path()), fake.clone());
        let ws = detached_workspace("shop");
        let intent = intent(ChangeStrategy::Intent);
        let graph = completed(&["u1"]);

        let first = integrator.integrate(&intent, &workflow(), &graph, &ws).await.unwrap();
        let IntegrationOutcome::PrCreated { url } = first else {
            panic!("Expected PrCreated, got {:?}", first);
        };
        assert!(!IntegrationOutcome::PrCreated { url: url.clone() }.completes_intent());

        let again = integrator.integrate(&intent, &workflow(), &graph, &ws).await.unwrap();
        assert_eq!(again, IntegrationOutcome::PrCreated { url });
        assert_eq!(fake.requests.lock().unwrap().len(), 1);

        fake.set_state("shop", RequestState::Merged);
        let done = integrator.integrate(&intent, &workflow(), &graph, &ws).await.unwrap();
        assert_eq!(done, IntegrationOutcome::Completed);
    }

    #[tokio::test]
    async fn test_intent_strategy_closed_request_is_error() {
        let dir = setup_repo();
        let fake = Arc::new(FakeRequests::with(vec![request("shop", RequestState::Closed)]));
        let integrator = Integrator::new(manager(dir.path()), fake);
        let err = integrator
            .integrate(
                &intent(ChangeStrategy::Intent),
                &workflow(),
                &completed(&["u1"]),
                &detached_workspace("shop"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Integration(IntegrationError::RequestClosed { .. })
        ));
    }

    #[tokio::test]
    async fn test_unit_strategy_lists_unmerged_units() {
        let dir = setup_repo();
        let fake = Arc::new(FakeRequests::with(vec![
            request("shop/u1", RequestState::Merged),
            request("shop/u2", RequestState::Open),
        ]));
        let integrator = Integrator::new(manager(dir.path()), fake.clone());
        let graph = completed(&["u1", "u2", "u3"]);
        let ws = detached_workspace("shop/main");

        let outcome = integrator
            .integrate(&intent(ChangeStrategy::Unit), &workflow(), &graph, &ws)
            .await
            .unwrap();
        let IntegrationOutcome::Blocked { errors } = outcome else {
            panic!("Expected Blocked, got {:?}", outcome);
        };
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("u2"));
        assert!(errors[1].starts_with("u3"));

        fake.set_state("shop/u2", RequestState::Merged);
        fake.requests
            .lock()
            .unwrap()
            .push(request("shop/u3", RequestState::Merged));
        let outcome = integrator
            .integrate(&intent(ChangeStrategy::Unit), &workflow(), &graph, &ws)
            .await
            .unwrap();
        assert_eq!(outcome, IntegrationOutcome::Completed);
    }

    #[tokio::test]
    async fn test_bolt_strategy_needs_merged_and_no_open() {
        let dir = setup_repo();
        let fake = Arc::new(FakeRequests::with(vec![
            request("shop/u1/bolt-01", RequestState::Closed),
            request("shop/u1/bolt-02", RequestState::Merged),
            request("shop/u2/bolt-01", RequestState::Merged),
            request("shop/u2/bolt-03", RequestState::Open),
        ]));
        let integrator = Integrator::new(manager(dir.path()), fake);
        let outcome = integrator
            .integrate(
                &intent(ChangeStrategy::Bolt),
                &workflow(),
                &completed(&["u1", "u2"]),
                &detached_workspace("shop/main"),
            )
            .await
            .unwrap();
        let IntegrationOutcome::Blocked { errors } = outcome else {
            panic!("Expected Blocked, got {:?}", outcome);
        };
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("u2: bolt request still open"));
    }

    #[tokio::test]
    async fn test_trunk_lands_units_and_then_completes() {
        let dir = setup_repo();
        let mgr = manager(dir.path());
        mgr.vcs().create_branch("trunk", "HEAD").unwrap();
        let integrator = Integrator::new(mgr.clone(), Arc::new(FakeRequests::default()));
        let intent = intent(ChangeStrategy::Trunk);
        let intent_ws = mgr.intent_workspace(&intent).unwrap();

        let u1 = Unit::new("u1", UnitStatus::InProgress, vec![]);
        let u2 = Unit::new("u2", UnitStatus::InProgress, vec![]);
        let ws1 = mgr.unit_workspace(&intent, &u1, 1, &intent_ws).unwrap();
        let ws2 = mgr.unit_workspace(&intent, &u2, 1, &intent_ws).unwrap();
        commit_file(&ws1.path, "one.txt", "1", "unit one");
        commit_file(&ws2.path, "two.txt", "2", "unit two");

        let landing = integrator
            .land_unit(&intent, &workflow(), &u1, &ws1, &intent_ws)
            .await
            .unwrap();
        assert_eq!(landing, UnitLanding::Merged);
        assert!(!mgr.vcs().branch_exists("shop/u1").unwrap());
        assert!(intent_ws.path.join("one.txt").exists());

        let graph = completed(&["u1", "u2"]);
        let outcome = integrator
            .integrate(&intent, &workflow(), &graph, &intent_ws)
            .await
            .unwrap();
        assert!(matches!(outcome, IntegrationOutcome::Blocked { ref errors } if errors.len() == 1));

        integrator
            .land_unit(&intent, &workflow(), &u2, &ws2, &intent_ws)
            .await
            .unwrap();
        let outcome = integrator
            .integrate(&intent, &workflow(), &graph, &intent_ws)
            .await
            .unwrap();
        assert_eq!(outcome, IntegrationOutcome::Completed);
    }

    #[tokio::test]
    async fn test_unit_landing_opens_one_request() {
        let dir = setup_repo();
        let fake = Arc::new(FakeRequests::default());
        let integrator = Integrator::new(manager(dir.path()), fake.clone());
        let intent = intent(ChangeStrategy::Unit);
        let unit = Unit::new("u1", UnitStatus::InProgress, vec![]);
        let unit_ws = Workspace {
            intent: "shop".into(),
            branch: "shop/u1".into(),
            path: "/nonexistent".into(),
            unit: Some("u1".into()),
        };
        let intent_ws = detached_workspace("shop/main");

        let first = integrator
            .land_unit(&intent, &workflow(), &unit, &unit_ws, &intent_ws)
            .await
            .unwrap();
        let second = integrator
            .land_unit(&intent, &workflow(), &unit, &unit_ws, &intent_ws)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(fake.requests.lock().unwrap().len(), 1);
    }
}
