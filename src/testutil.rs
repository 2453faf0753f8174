//! Shared fixtures for unit tests.

use crate::config::Config;
use crate::executor::{ExecutionReport, ExecutionRequest, Executor, Outcome};
use crate::graph::{UnitFiles, UnitStatus};
use crate::integrate::{MergeRequest, MergeRequests, RequestState};
use crate::intent::{INTENT_FILE, Intent, intent_dir};
use crate::orchestrator::Orchestrator;
use crate::state::StateStore;
use crate::verify::CriteriaVerifier;
use crate::workspace::{Git2Vcs, Workspace, WorkspaceManager, worktree_dir_name};
use async_trait::async_trait;
use git2::{Repository, Signature};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

/// A fresh repository with one commit, so branches have something to point at.
pub fn setup_repo() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    let mut config = repo.config().unwrap();
    config.set_str("user.name", "test").unwrap();
    config.set_str("user.email", "test@test.com").unwrap();
    drop(config);
    commit_file(dir.path(), "README.md", "# test\n", "initial commit");
    dir
}

/// Write `name` in the working copy at `dir` and commit it on its HEAD.
pub fn commit_file(dir: &Path, name: &str, content: &str, msg: &str) {
    let repo = Repository::open(dir).unwrap();
    fs::write(dir.join(name), content).unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new(name)).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = Signature::now("test", "test@test.com").unwrap();
    match repo.head().ok().and_then(|h| h.peel_to_commit().ok()) {
        Some(parent) => repo
            .commit(Some("HEAD"), &sig, &sig, msg, &tree, &[&parent])
            .unwrap(),
        None => repo
            .commit(Some("HEAD"), &sig, &sig, msg, &tree, &[])
            .unwrap(),
    };
}

/// Write an intent document under `root/.ai-dlc/<slug>/`.
pub fn write_intent(root: &Path, slug: &str, workflow: &str, strategy: &str) {
    let dir = intent_dir(root, slug);
    fs::create_dir_all(&dir).unwrap();
    let text = format!(
        "---\nworkflow: {}\nstatus: active\nchange_strategy: {}\n---\n# {}\n\n## Success Criteria\n- [ ] It works\n",
        workflow, strategy, slug
    );
    fs::write(dir.join(INTENT_FILE), text).unwrap();
}

/// Write a unit document under `root/.ai-dlc/<slug>/`.
pub fn write_unit(root: &Path, slug: &str, id: &str, status: &str, deps: &[&str]) {
    let dir = intent_dir(root, slug);
    fs::create_dir_all(&dir).unwrap();
    let deps = deps
        .iter()
        .map(|d| format!("\"{}\"", d))
        .collect::<Vec<_>>()
        .join(", ");
    let text = format!(
        "---\nstatus: {}\ndepends_on: [{}]\ndiscipline: backend\n---\n# {}\n\n## Completion Criteria\n- [ ] {} done\n",
        status, deps, id, id
    );
    fs::write(dir.join(format!("{}.md", id)), text).unwrap();
}

/// In-memory `MergeRequests`.
#[derive(Default)]
pub struct FakeRequests {
    pub requests: Mutex<Vec<MergeRequest>>,
}

impl FakeRequests {
    pub fn with(requests: Vec<MergeRequest>) -> Self {
        Self {
            requests: Mutex::new(requests),
        }
    }

    pub fn set_state(&self, head: &str, state: RequestState) {
        for request in self.requests.lock().unwrap().iter_mut() {
            if request.head == head {
                request.state = state;
            }
        }
    }
}

#[async_trait]
impl MergeRequests for FakeRequests {
    async fn list(&self, head_prefix: &str) -> anyhow::Result<Vec<MergeRequest>> {
        Ok(self
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.head.starts_with(head_prefix))
            .cloned()
            .collect())
    }

    async fn create(
        &self,
        head: &str,
        _base: &str,
        _title: &str,
        _body: &str,
    ) -> anyhow::Result<MergeRequest> {
        let mut requests = self.requests.lock().unwrap();
        let number = requests.len() as u64 + 1;
        let request = MergeRequest {
            number,
            url: format!("https://example.test/pull/{}", number),
            head: head.to_string(),
            state: RequestState::Open,
        };
        requests.push(request.clone());
        Ok(request)
    }
}

type SubmitHook = Box<dyn Fn(&ExecutionRequest) + Send + Sync>;

/// Scripted `Executor`: replies in order, then `success` forever.
#[derive(Default)]
pub struct FakeExecutor {
    script: Mutex<VecDeque<ExecutionReport>>,
    pub requests: Mutex<Vec<ExecutionRequest>>,
    hook: Option<SubmitHook>,
    fail: AtomicBool,
}

impl FakeExecutor {
    pub fn scripted(outcomes: &[Outcome]) -> Self {
        Self {
            script: Mutex::new(
                outcomes
                    .iter()
                    .map(|o| ExecutionReport::new(*o, format!("{} notes", o)))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    /// Run `hook` on every request before replying (e.g. to write unit files).
    pub fn with_hook(mut self, hook: impl Fn(&ExecutionRequest) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Make every following `submit` fail.
    pub fn break_down(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn hats(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.hat.clone())
            .collect()
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn submit(&self, request: &ExecutionRequest) -> anyhow::Result<ExecutionReport> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("agent crashed");
        }
        self.requests.lock().unwrap().push(request.clone());
        if let Some(hook) = &self.hook {
            hook(request);
        }
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ExecutionReport::new(Outcome::Success, "")))
    }
}

/// `CriteriaVerifier` with a fixed answer.
pub struct FakeVerifier(pub AtomicBool);

impl FakeVerifier {
    pub fn new(verified: bool) -> Self {
        Self(AtomicBool::new(verified))
    }
}

#[async_trait]
impl CriteriaVerifier for FakeVerifier {
    async fn verify(&self, _intent: &Intent, _workspace: &Workspace) -> anyhow::Result<bool> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

/// An orchestrator over a fresh repository with fake collaborators.
pub struct Harness {
    _dir: TempDir,
    pub executor: Arc<FakeExecutor>,
    pub requests: Arc<FakeRequests>,
    pub verifier: Arc<FakeVerifier>,
    pub orchestrator: Orchestrator,
}

pub fn harness(executor: FakeExecutor) -> Harness {
    let dir = setup_repo();
    let config = Config::with_env(dir.path().to_path_buf(), false, |_| None).unwrap();
    let vcs = Arc::new(Git2Vcs::new(&config.project_dir));
    let store = StateStore::new(config.state_root(vcs.as_ref()).unwrap());
    let workspaces = Arc::new(WorkspaceManager::new(
        vcs,
        &config.project_dir,
        &config.worktree_root,
        "origin",
        None,
    ));
    let executor = Arc::new(executor);
    let requests = Arc::new(FakeRequests::default());
    let verifier = Arc::new(FakeVerifier::new(true));
    let orchestrator = Orchestrator::new(
        config,
        workspaces,
        store,
        executor.clone(),
        verifier.clone(),
        requests.clone(),
    );
    Harness {
        _dir: dir,
        executor,
        requests,
        verifier,
        orchestrator,
    }
}

impl Harness {
    /// The main checkout.
    pub fn root(&self) -> &Path {
        &self.orchestrator.config().project_dir
    }

    /// Working copy of `branch`.
    pub fn worktree(&self, branch: &str) -> PathBuf {
        self.orchestrator
            .config()
            .worktree_root
            .join(worktree_dir_name(branch))
    }

    /// Intent workspace root for the trunk, unit and bolt strategies.
    pub fn intent_root(&self, slug: &str) -> PathBuf {
        self.worktree(&format!("{}/main", slug))
    }

    pub fn unit_status(&self, root: &Path, slug: &str, id: &str) -> UnitStatus {
        UnitFiles::new(intent_dir(root, slug))
            .load_graph()
            .unwrap()
            .get(id)
            .unwrap()
            .status
    }
}
