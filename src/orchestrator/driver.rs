use super::{AdvanceReport, DoneReport, ResetReport, ResumeReport, StatusReport};
use crate::config::Config;
use crate::errors::{OrchestratorError, PreconditionError, StateError, WorkspaceError};
use crate::executor::{CommandExecutor, Executor};
use crate::graph::{UnitFiles, UnitGraph, UnitStatus};
use crate::integrate::{GhCli, IntegrationOutcome, Integrator, MergeRequests};
use crate::intent::{INTENT_FILE, IntentDocument, IntentStatus, intent_dir, list_intents};
use crate::state::{ITERATION_KEY, StateStore};
use crate::verify::{CommandVerifier, CriteriaVerifier};
use crate::workflow::{IterationState, WorkflowDefinition, WorkflowEngine};
use crate::workspace::{
    Discovery, Git2Vcs, Workspace, WorkspaceManager, copy_artifacts, intent_branch,
    intent_branch_candidates,
};
use anyhow::anyhow;
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// An intent opened for a command: its document and workspace.
pub(super) struct IntentContext {
    pub doc: IntentDocument,
    pub workspace: Workspace,
    pub units: UnitFiles,
    pub workflow: WorkflowDefinition,
    pub discovery: Discovery,
    pub copied: usize,
}

impl IntentContext {
    pub fn slug(&self) -> &str {
        &self.doc.intent.slug
    }
}

pub struct Orchestrator {
    pub(super) config: Config,
    pub(super) workspaces: Arc<WorkspaceManager>,
    pub(super) store: StateStore,
    pub(super) executor: Arc<dyn Executor>,
    pub(super) verifier: Arc<dyn CriteriaVerifier>,
    pub(super) integrator: Integrator,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        workspaces: Arc<WorkspaceManager>,
        store: StateStore,
        executor: Arc<dyn Executor>,
        verifier: Arc<dyn CriteriaVerifier>,
        requests: Arc<dyn MergeRequests>,
    ) -> Self {
        let integrator = Integrator::new(workspaces.clone(), requests);
        Self {
            config,
            workspaces,
            store,
            executor,
            verifier,
            integrator,
        }
    }

    /// Production wiring: git2, the agent CLI, verification commands and `gh`.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let vcs = Arc::new(Git2Vcs::new(&config.project_dir));
        let store = StateStore::new(config.state_root(vcs.as_ref())?);
        let workspaces = Arc::new(WorkspaceManager::new(
            vcs,
            &config.project_dir,
            &config.worktree_root,
            &config.remote,
            config.base_branch.clone(),
        ));
        let executor = Arc::new(CommandExecutor::from_config(&config));
        let verifier = Arc::new(CommandVerifier::new(config.verification_commands.clone()));
        let requests = Arc::new(GhCli::new(&config.project_dir, &config.remote));
        Ok(Self::new(
            config, workspaces, store, executor, verifier, requests,
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn workspaces(&self) -> &Arc<WorkspaceManager> {
        &self.workspaces
    }

    /// Checkout root holding the artifacts of `slug`, without side effects.
    ///
    /// The intent workspace wins over the main checkout.
    fn locate_artifacts(&self, slug: &str) -> Option<PathBuf> {
        intent_branch_candidates(slug)
            .iter()
            .map(|branch| self.workspaces.worktree_path(branch))
            .chain(std::iter::once(self.config.project_dir.clone()))
            .find(|root| intent_dir(root, slug).join(INTENT_FILE).is_file())
    }

    /// Every intent slug found in the main checkout or a workspace.
    pub fn known_intents(&self) -> Vec<String> {
        let mut slugs: BTreeSet<String> = list_intents(&self.config.project_dir).into_iter().collect();
        if let Ok(entries) = fs::read_dir(&self.config.worktree_root) {
            for entry in entries.filter_map(|e| e.ok()) {
                slugs.extend(list_intents(&entry.path()));
            }
        }
        slugs.into_iter().collect()
    }

    /// The given slug, or the single active intent.
    pub(super) fn resolve_slug(&self, slug: Option<&str>) -> Result<String, OrchestratorError> {
        if let Some(slug) = slug {
            return Ok(slug.to_string());
        }

        let active: Vec<String> = self
            .known_intents()
            .into_iter()
            .filter(|slug| {
                self.locate_artifacts(slug)
                    .and_then(|root| IntentDocument::load(&root, slug).ok())
                    .is_some_and(|doc| doc.intent.status == IntentStatus::Active)
            })
            .collect();

        match active.as_slice() {
            [only] => Ok(only.clone()),
            [] => Err(anyhow!("No active intent found; name one explicitly").into()),
            many => Err(anyhow!(
                "Several active intents found ({}); name one explicitly",
                many.join(", ")
            )
            .into()),
        }
    }

    /// Discover the intent and make sure its workspace holds its artifacts.
    pub(super) fn open_intent(&self, slug: &str) -> Result<IntentContext, OrchestratorError> {
        let discovery = self.workspaces.discover_intent(slug)?;
        let root = self.workspaces.artifacts_root(&discovery)?;
        let found = IntentDocument::load(&root, slug)?;
        let workspace = self.workspaces.intent_workspace(&found.intent)?;

        let mut copied = 0;
        let doc = if workspace.path == root {
            found
        } else {
            if !intent_dir(&workspace.path, slug).join(INTENT_FILE).is_file() {
                copied = copy_artifacts(&root, &workspace.path, slug)?;
            }
            IntentDocument::load(&workspace.path, slug)?
        };

        let workflow = self
            .config
            .workflows
            .get(&doc.intent.workflow_name)?
            .clone();
        let units = UnitFiles::new(workspace.artifacts_dir(slug));
        Ok(IntentContext {
            doc,
            workspace,
            units,
            workflow,
            discovery,
            copied,
        })
    }

    /// Engine for the hat sequence recorded in `state`.
    ///
    /// A state created before the workflow was reconfigured keeps its old hats.
    pub(super) fn engine_for(
        &self,
        ctx: &IntentContext,
        state: &IterationState,
    ) -> Result<WorkflowEngine, OrchestratorError> {
        if state.workflow == ctx.workflow.hats {
            return Ok(WorkflowEngine::new(ctx.workflow.clone()));
        }
        let retry_hat = state
            .workflow
            .contains(&ctx.workflow.retry_hat)
            .then(|| ctx.workflow.retry_hat.clone());
        let definition = WorkflowDefinition::new(
            &state.workflow_name,
            state.workflow.clone(),
            retry_hat,
            ctx.workflow.integrate,
        )?;
        Ok(WorkflowEngine::new(definition))
    }

    pub(super) fn load_state(&self, ctx: &IntentContext) -> Result<IterationState, OrchestratorError> {
        self.store
            .load_json(&ctx.workspace.scope(), ITERATION_KEY)?
            .ok_or_else(|| {
                StateError::Missing {
                    intent: ctx.slug().to_string(),
                }
                .into()
            })
    }

    pub(super) fn save_state(
        &self,
        ctx: &IntentContext,
        state: &IterationState,
    ) -> Result<(), OrchestratorError> {
        self.store
            .save_json(&ctx.workspace.scope(), ITERATION_KEY, state)?;
        Ok(())
    }

    /// Verify criteria, check every `done` guard, integrate, and mark the
    /// intent complete only if integration allows it.
    pub(super) async fn finalize(
        &self,
        ctx: &mut IntentContext,
        engine: &WorkflowEngine,
        state: &IterationState,
        graph: &UnitGraph,
    ) -> Result<(IterationState, IntegrationOutcome), OrchestratorError> {
        // Hat and unit guards first, so a misplaced call never runs verification.
        engine.check_done(state, graph, true)?;
        let verified = self
            .verifier
            .verify(&ctx.doc.intent, &ctx.workspace)
            .await?;
        engine.check_done(state, graph, verified)?;

        let integration = self
            .integrator
            .integrate(&ctx.doc.intent, engine.workflow(), graph, &ctx.workspace)
            .await?;
        if !integration.completes_intent() {
            info!(intent = %state.intent, integration = ?integration, "intent not complete yet");
            return Ok((state.clone(), integration));
        }

        // Document first: a failed rewrite leaves the run state active.
        let completed = engine.complete(state);
        ctx.doc.set_status(IntentStatus::Complete)?;
        self.save_state(ctx, &completed)?;
        Ok((completed, integration))
    }

    /// Move the intent one hat forward.
    pub fn advance(&self, slug: Option<&str>) -> Result<AdvanceReport, OrchestratorError> {
        let slug = self.resolve_slug(slug)?;
        let ctx = self.open_intent(&slug)?;
        let state = self.load_state(&ctx)?;
        let engine = self.engine_for(&ctx, &state)?;
        let graph = ctx.units.load_graph()?;

        let (next, outcome) = engine.advance(&state, &graph)?;
        self.save_state(&ctx, &next)?;
        Ok(AdvanceReport {
            state: next,
            outcome,
        })
    }

    /// Send the intent back to its retry hat.
    pub fn fail(&self, slug: Option<&str>) -> Result<IterationState, OrchestratorError> {
        let slug = self.resolve_slug(slug)?;
        let ctx = self.open_intent(&slug)?;
        let state = self.load_state(&ctx)?;
        let engine = self.engine_for(&ctx, &state)?;

        let next = engine.fail(&state)?;
        self.save_state(&ctx, &next)?;
        Ok(next)
    }

    /// Guarded completion from the terminal hat.
    pub async fn done(&self, slug: Option<&str>) -> Result<DoneReport, OrchestratorError> {
        let slug = self.resolve_slug(slug)?;
        let mut ctx = self.open_intent(&slug)?;
        let state = self.load_state(&ctx)?;
        let engine = self.engine_for(&ctx, &state)?;
        let graph = ctx.units.load_graph()?;

        let (state, integration) = self.finalize(&mut ctx, &engine, &state, &graph).await?;
        Ok(DoneReport { state, integration })
    }

    /// Rebuild the run state from the unit files.
    pub fn resume(&self, slug: Option<&str>) -> Result<ResumeReport, OrchestratorError> {
        let slug = self.resolve_slug(slug)?;
        let ctx = self.open_intent(&slug)?;
        if ctx.doc.intent.status == IntentStatus::Complete {
            return Err(PreconditionError::AlreadyComplete.into());
        }

        let graph = ctx.units.load_graph()?;
        let engine = WorkflowEngine::new(ctx.workflow.clone());
        let hat = engine.resume(&graph);

        let in_progress: Vec<&str> = graph
            .units()
            .iter()
            .filter(|u| u.status == UnitStatus::InProgress)
            .map(|u| u.id.as_str())
            .collect();
        let current_unit = match in_progress.as_slice() {
            [only] => Some(only.to_string()),
            _ => None,
        };

        let state = IterationState::fresh(&slug, engine.workflow(), hat, current_unit);
        self.save_state(&ctx, &state)?;
        info!(
            intent = %slug,
            hat = %state.hat,
            unit = state.current_unit.as_deref().unwrap_or("-"),
            source = %ctx.discovery.source,
            "intent resumed"
        );

        Ok(ResumeReport {
            intent: slug,
            source: ctx.discovery.source.to_string(),
            copied: ctx.copied,
            workspace: ctx.workspace.path.clone(),
            state,
        })
    }

    /// Archive, then delete, every state scope of the intent. Branches and
    /// worktrees are left alone.
    pub fn reset(&self, slug: Option<&str>) -> Result<ResetReport, OrchestratorError> {
        let slug = self.resolve_slug(slug)?;
        let prefix = format!("{}/", slug);
        let scopes: Vec<_> = self
            .store
            .scopes()?
            .into_iter()
            .filter(|scope| scope.branch() == slug || scope.branch().starts_with(&prefix))
            .collect();

        let archive = self.store.archive(&slug, &scopes)?;
        let mut removed = 0;
        for scope in &scopes {
            removed += self.store.delete_scope(scope)?;
        }
        info!(intent = %slug, scopes = scopes.len(), removed, "intent state reset");

        Ok(ResetReport {
            intent: slug,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            removed,
            archive,
        })
    }

    /// Read-only overview of one intent, or of every known intent.
    pub fn status(&self, slug: Option<&str>) -> Result<Vec<StatusReport>, OrchestratorError> {
        match slug {
            Some(slug) => Ok(vec![self.status_of(slug)?]),
            None => self
                .known_intents()
                .iter()
                .map(|slug| self.status_of(slug))
                .collect(),
        }
    }

    fn status_of(&self, slug: &str) -> Result<StatusReport, OrchestratorError> {
        let root = self
            .locate_artifacts(slug)
            .ok_or_else(|| WorkspaceError::NotFound(slug.to_string()))?;
        let doc = IntentDocument::load(&root, slug)?;
        let branch = intent_branch(doc.intent.change_strategy, slug);
        let path = self.workspaces.worktree_path(&branch);
        let workspace = Workspace {
            intent: slug.to_string(),
            branch: branch.clone(),
            path: path.clone(),
            unit: None,
        };

        let state = self.store.load_json(&workspace.scope(), ITERATION_KEY)?;
        let units = UnitFiles::new(intent_dir(&root, slug)).load_graph()?.summary();

        Ok(StatusReport {
            intent: slug.to_string(),
            workflow: doc.intent.workflow_name,
            strategy: doc.intent.change_strategy,
            status: doc.intent.status,
            branch,
            workspace: path.exists().then_some(path),
            state,
            units,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrate::RequestState;
    use crate::intent::ChangeStrategy;
    use crate::state::{SCRATCHPAD_KEY, Scope};
    use crate::testutil::{FakeExecutor, harness, write_intent, write_unit};
    use crate::workflow::AdvanceOutcome;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_commands_without_state_point_at_resume() {
        let h = harness(FakeExecutor::default());
        write_intent(h.root(), "shop", "default", "unit");

        let err = h.orchestrator.advance(Some("shop")).unwrap_err();
        assert!(matches!(err, OrchestratorError::State(StateError::Missing { .. })));
        assert!(err.to_string().contains("hatrack resume shop"));
    }

    #[test]
    fn test_resume_copies_artifacts_and_starts_at_decomposition() {
        let h = harness(FakeExecutor::default());
        write_intent(h.root(), "shop", "default", "unit");

        let report = h.orchestrator.resume(None).unwrap();
        assert_eq!(report.intent, "shop");
        assert_eq!(report.state.hat, "elaborator");
        assert_eq!(report.state.iteration, 1);
        assert_eq!(report.copied, 1);
        assert_eq!(report.workspace, h.intent_root("shop"));
        assert!(intent_dir(&report.workspace, "shop").join(INTENT_FILE).is_file());

        let stored: IterationState = h
            .orchestrator
            .store()
            .load_json(&Scope::Branch("shop/main".into()), ITERATION_KEY)
            .unwrap()
            .unwrap();
        assert_eq!(stored, report.state);
    }

    #[test]
    fn test_resume_picks_up_the_single_unit_in_progress() {
        let h = harness(FakeExecutor::default());
        write_intent(h.root(), "shop", "default", "unit");
        write_unit(h.root(), "shop", "unit-01-a", "completed", &[]);
        write_unit(h.root(), "shop", "unit-02-b", "in_progress", &["unit-01-a"]);
        write_unit(h.root(), "shop", "unit-03-c", "pending", &["unit-02-b"]);

        let report = h.orchestrator.resume(Some("shop")).unwrap();
        assert_eq!(report.state.hat, "builder");
        assert_eq!(report.state.current_unit.as_deref(), Some("unit-02-b"));
        assert_eq!(report.copied, 4);
    }

    #[test]
    fn test_resume_requires_a_single_active_intent() {
        let h = harness(FakeExecutor::default());
        let err = h.orchestrator.resume(None).unwrap_err();
        assert!(err.to_string().contains("No active intent"));

        write_intent(h.root(), "one", "default", "unit");
        write_intent(h.root(), "two", "default", "unit");
        let err = h.orchestrator.resume(None).unwrap_err();
        assert!(err.to_string().contains("one, two"));
    }

    #[test]
    fn test_resume_unknown_intent_is_not_found() {
        let h = harness(FakeExecutor::default());
        let err = h.orchestrator.resume(Some("ghost")).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Workspace(WorkspaceError::NotFound(_))
        ));
    }

    #[test]
    fn test_advance_and_fail_persist_state() {
        let h = harness(FakeExecutor::default());
        write_intent(h.root(), "shop", "default", "unit");
        h.orchestrator.resume(Some("shop")).unwrap();

        let report = h.orchestrator.advance(Some("shop")).unwrap();
        assert_eq!(
            report.outcome,
            AdvanceOutcome::Moved {
                from: "elaborator".into(),
                to: "planner".into()
            }
        );
        h.orchestrator.advance(Some("shop")).unwrap();
        h.orchestrator.advance(Some("shop")).unwrap();
        let status = h.orchestrator.status(Some("shop")).unwrap();
        assert_eq!(status[0].state.as_ref().unwrap().hat, "reviewer");

        let failed = h.orchestrator.fail(Some("shop")).unwrap();
        assert_eq!(failed.hat, "builder");
        assert_eq!(failed.iteration, 2);
        let status = h.orchestrator.status(None).unwrap();
        assert_eq!(status[0].state.as_ref().unwrap(), &failed);
    }

    #[tokio::test]
    async fn test_done_from_wrong_hat_leaves_state_unchanged() {
        let h = harness(FakeExecutor::default());
        write_intent(h.root(), "shop", "default", "unit");
        write_unit(h.root(), "shop", "unit-01-a", "completed", &[]);
        h.orchestrator.resume(Some("shop")).unwrap();
        h.orchestrator.fail(Some("shop")).unwrap();
        let before = h.orchestrator.status(Some("shop")).unwrap()[0].state.clone();

        let err = h.orchestrator.done(Some("shop")).await.unwrap_err();
        assert!(err.is_precondition());
        assert!(err.to_string().contains("'reviewer'"));
        let after = h.orchestrator.status(Some("shop")).unwrap()[0].state.clone();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_done_needs_verified_criteria_then_completes_once() {
        let h = harness(FakeExecutor::default());
        write_intent(h.root(), "shop", "default", "intent");
        write_unit(h.root(), "shop", "unit-01-a", "completed", &[]);
        h.orchestrator.resume(Some("shop")).unwrap();

        h.verifier.0.store(false, Ordering::SeqCst);
        let err = h.orchestrator.done(Some("shop")).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Precondition(PreconditionError::CriteriaNotVerified)
        ));

        h.verifier.0.store(true, Ordering::SeqCst);
        let pending = h.orchestrator.done(Some("shop")).await.unwrap();
        assert!(matches!(pending.integration, IntegrationOutcome::PrCreated { .. }));
        assert_eq!(pending.state.status, IntentStatus::Active);

        h.requests.set_state("shop", RequestState::Merged);
        let done = h.orchestrator.done(Some("shop")).await.unwrap();
        assert_eq!(done.integration, IntegrationOutcome::Completed);
        assert!(done.state.is_complete());

        let status = &h.orchestrator.status(Some("shop")).unwrap()[0];
        assert_eq!(status.status, IntentStatus::Complete);
        assert_eq!(status.strategy, ChangeStrategy::Intent);

        let err = h.orchestrator.done(Some("shop")).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Precondition(PreconditionError::AlreadyComplete)
        ));
    }

    #[test]
    fn test_reset_archives_intent_scopes_only() {
        let h = harness(FakeExecutor::default());
        write_intent(h.root(), "shop", "default", "unit");
        h.orchestrator.resume(Some("shop")).unwrap();
        let store = h.orchestrator.store();
        store
            .save(&Scope::Unit("shop/unit-01-a".into()), SCRATCHPAD_KEY, "notes")
            .unwrap();
        store
            .save(&Scope::Branch("shopping/main".into()), ITERATION_KEY, "{}")
            .unwrap();

        let report = h.orchestrator.reset(Some("shop")).unwrap();
        assert_eq!(report.removed, 2);
        assert_eq!(report.scopes.len(), 2);
        let archive = report.archive.unwrap();
        assert!(archive.starts_with(store.root().join("archive").join("shop")));

        assert!(matches!(
            h.orchestrator.advance(Some("shop")).unwrap_err(),
            OrchestratorError::State(StateError::Missing { .. })
        ));
        assert!(
            store
                .load(&Scope::Branch("shopping/main".into()), ITERATION_KEY)
                .unwrap()
                .is_some()
        );
        assert!(
            h.orchestrator
                .workspaces()
                .vcs()
                .branch_exists("shop/main")
                .unwrap()
        );

        let again = h.orchestrator.reset(Some("shop")).unwrap();
        assert_eq!(again.removed, 0);
        assert_eq!(again.archive, None);
    }

    #[test]
    fn test_status_is_read_only() {
        let h = harness(FakeExecutor::default());
        write_intent(h.root(), "shop", "default", "bolt");
        write_unit(h.root(), "shop", "unit-01-a", "pending", &[]);

        let status = &h.orchestrator.status(None).unwrap()[0];
        assert_eq!(status.intent, "shop");
        assert_eq!(status.branch, "shop/main");
        assert_eq!(status.workspace, None);
        assert_eq!(status.state, None);
        assert_eq!(status.units.pending, 1);
        assert!(!h.intent_root("shop").exists());
    }

    #[test]
    fn test_engine_follows_recorded_hats() {
        let h = harness(FakeExecutor::default());
        write_intent(h.root(), "shop", "default", "unit");
        h.orchestrator.resume(Some("shop")).unwrap();
        let ctx = h.orchestrator.open_intent("shop").unwrap();

        let mut state = h.orchestrator.load_state(&ctx).unwrap();
        state.workflow = vec!["elaborator".into(), "builder".into(), "reviewer".into()];
        let engine = h.orchestrator.engine_for(&ctx, &state).unwrap();
        assert_eq!(engine.workflow().hats, state.workflow);
        assert_eq!(engine.workflow().retry_hat, "builder");
    }
}
