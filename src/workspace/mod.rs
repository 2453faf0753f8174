//! Workspaces: branch naming, worktrees, and intent discovery.
//!
//! A [`Workspace`] value is passed to every operation that touches files or
//! state instead of relying on whatever the process happens to have checked
//! out. Its [`Workspace::scope`] is the only way the driver derives a
//! `StateStore` scope, which keeps intent-level entries tied to the intent
//! workspace.

mod branch;
mod vcs;

pub use branch::{
    INTENT_BRANCH_SUFFIX, bolt_slug, branch_name, intent_branch, intent_branch_candidates,
    worktree_dir_name,
};
pub use vcs::{Git2Vcs, Vcs};

use crate::errors::WorkspaceError;
use crate::graph::Unit;
use crate::intent::{ChangeStrategy, INTENT_FILE, Intent, intent_dir};
use crate::state::Scope;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

/// An isolated working copy for an intent or one of its units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub intent: String,
    pub branch: String,
    pub path: PathBuf,
    /// Unit this workspace was opened for; `None` for the intent workspace
    pub unit: Option<String>,
}

impl Workspace {
    /// State scope bound to this workspace.
    ///
    /// Unit entries are keyed `{intent}/{unit}` whatever branch the unit is
    /// on, so notes survive a move to a new bolt branch.
    pub fn scope(&self) -> Scope {
        match &self.unit {
            None => Scope::Branch(self.branch.clone()),
            Some(unit) => Scope::Unit(format!("{}/{}", self.intent, unit)),
        }
    }

    pub fn is_intent(&self) -> bool {
        self.unit.is_none()
    }

    /// `.ai-dlc/<slug>` inside this working copy.
    pub fn artifacts_dir(&self, slug: &str) -> PathBuf {
        intent_dir(&self.path, slug)
    }
}

/// Where `discover_intent` found an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoverySource {
    /// Artifacts on disk under this checkout root
    Filesystem(PathBuf),
    /// A local intent branch
    LocalBranch(String),
    /// A remote branch, now fetched and tracked locally
    RemoteBranch(String),
}

impl fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoverySource::Filesystem(root) => write!(f, "files under {}", root.display()),
            DiscoverySource::LocalBranch(branch) => write!(f, "local branch '{}'", branch),
            DiscoverySource::RemoteBranch(branch) => write!(f, "remote branch '{}'", branch),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub slug: String,
    pub source: DiscoverySource,
}

pub struct WorkspaceManager {
    vcs: Arc<dyn Vcs>,
    project_dir: PathBuf,
    worktree_root: PathBuf,
    remote: String,
    base_branch: Option<String>,
}

fn git_err(e: anyhow::Error) -> WorkspaceError {
    WorkspaceError::Git(format!("{:#}", e))
}

impl WorkspaceManager {
    pub fn new(
        vcs: Arc<dyn Vcs>,
        project_dir: impl Into<PathBuf>,
        worktree_root: impl Into<PathBuf>,
        remote: impl Into<String>,
        base_branch: Option<String>,
    ) -> Self {
        Self {
            vcs,
            project_dir: project_dir.into(),
            worktree_root: worktree_root.into(),
            remote: remote.into(),
            base_branch,
        }
    }

    pub fn vcs(&self) -> &Arc<dyn Vcs> {
        &self.vcs
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Branch new intent branches start from (configured, else the main checkout's).
    pub fn base_branch(&self) -> Result<String, WorkspaceError> {
        match &self.base_branch {
            Some(branch) => Ok(branch.clone()),
            None => self.vcs.current_branch().map_err(git_err),
        }
    }

    /// Deterministic working-copy location of `branch`.
    pub fn worktree_path(&self, branch: &str) -> PathBuf {
        self.worktree_root.join(worktree_dir_name(branch))
    }

    /// Return the working copy of `branch`, creating branch and worktree if needed.
    ///
    /// Idempotent: an existing worktree of the same branch is returned as is.
    pub fn ensure_worktree(&self, branch: &str, base: &str) -> Result<PathBuf, WorkspaceError> {
        let path = self.worktree_path(branch);

        match self.vcs.worktree_branch(&path).map_err(git_err)? {
            Some(existing) if existing == branch => {
                debug!(branch, path = %path.display(), "reusing workspace");
                return Ok(path);
            }
            Some(existing) => {
                return Err(WorkspaceError::PathConflict {
                    path,
                    existing,
                    requested: branch.to_string(),
                });
            }
            None => {}
        }

        let occupied = fs::read_dir(&path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if occupied {
            return Err(WorkspaceError::PathConflict {
                path,
                existing: "<unmanaged directory>".to_string(),
                requested: branch.to_string(),
            });
        }
        if path.exists() {
            fs::remove_dir(&path).map_err(|e| WorkspaceError::Git(e.to_string()))?;
        }

        if !self.vcs.branch_exists(branch).map_err(git_err)? {
            self.vcs.create_branch(branch, base).map_err(git_err)?;
        }
        self.vcs.add_worktree(branch, &path).map_err(git_err)?;
        info!(branch, path = %path.display(), "created workspace");
        Ok(path)
    }

    /// Workspace of the intent branch.
    pub fn intent_workspace(&self, intent: &Intent) -> Result<Workspace, WorkspaceError> {
        let branch = intent_branch(intent.change_strategy, &intent.slug);
        let base = self.base_branch()?;
        let path = self.ensure_worktree(&branch, &base)?;
        Ok(Workspace {
            intent: intent.slug.clone(),
            branch,
            path,
            unit: None,
        })
    }

    /// Branch a unit works on for the intent's strategy at `iteration`.
    pub fn unit_branch(&self, intent: &Intent, unit: &Unit, iteration: u32) -> String {
        match (intent.change_strategy, &unit.branch) {
            (ChangeStrategy::Trunk | ChangeStrategy::Unit, Some(custom)) => custom.clone(),
            (ChangeStrategy::Bolt, _) => branch_name(
                ChangeStrategy::Bolt,
                &intent.slug,
                Some(&unit.id),
                Some(&bolt_slug(iteration)),
            ),
            (strategy, _) => branch_name(strategy, &intent.slug, Some(&unit.id), None),
        }
    }

    /// Workspace for `unit`. Unit branches start from the intent branch; a
    /// bolt starts from the unit's latest earlier bolt, so a retry keeps the
    /// work of the attempt it retries.
    ///
    /// Under the `intent` strategy every unit shares the intent working copy.
    pub fn unit_workspace(
        &self,
        intent: &Intent,
        unit: &Unit,
        iteration: u32,
        intent_ws: &Workspace,
    ) -> Result<Workspace, WorkspaceError> {
        let branch = self.unit_branch(intent, unit, iteration);
        let path = if branch == intent_ws.branch {
            intent_ws.path.clone()
        } else {
            let base = match intent.change_strategy {
                ChangeStrategy::Bolt => self
                    .previous_bolt(intent, unit, iteration)?
                    .unwrap_or_else(|| intent_ws.branch.clone()),
                _ => intent_ws.branch.clone(),
            };
            self.ensure_worktree(&branch, &base)?
        };
        Ok(Workspace {
            intent: intent.slug.clone(),
            branch,
            path,
            unit: Some(unit.id.clone()),
        })
    }

    /// Latest existing bolt branch of `unit` before `iteration`.
    fn previous_bolt(
        &self,
        intent: &Intent,
        unit: &Unit,
        iteration: u32,
    ) -> Result<Option<String>, WorkspaceError> {
        for earlier in (1..iteration).rev() {
            let branch = self.unit_branch(intent, unit, earlier);
            if self.vcs.branch_exists(&branch).map_err(git_err)? {
                debug!(unit = %unit.id, from = %branch, "continuing from earlier bolt");
                return Ok(Some(branch));
            }
        }
        Ok(None)
    }

    /// Locate an intent: files on disk, then a local branch, then the remote.
    pub fn discover_intent(&self, slug: &str) -> Result<Discovery, WorkspaceError> {
        let found = |source: DiscoverySource| -> Result<Discovery, WorkspaceError> {
            info!(intent = slug, source = ?source, "discovered intent");
            Ok(Discovery {
                slug: slug.to_string(),
                source,
            })
        };

        let candidates = intent_branch_candidates(slug);
        let mut roots = vec![self.project_dir.clone()];
        roots.extend(candidates.iter().map(|b| self.worktree_path(b)));
        for root in roots {
            if intent_dir(&root, slug).join(INTENT_FILE).is_file() {
                return found(DiscoverySource::Filesystem(root));
            }
        }

        for branch in &candidates {
            if self.vcs.branch_exists(branch).map_err(git_err)? {
                return found(DiscoverySource::LocalBranch(branch.clone()));
            }
        }

        for branch in &candidates {
            if self
                .vcs
                .remote_branch_exists(&self.remote, branch)
                .map_err(git_err)?
            {
                self.vcs.fetch(&self.remote, branch).map_err(git_err)?;
                self.vcs
                    .create_tracking_branch(&self.remote, branch)
                    .map_err(git_err)?;
                return found(DiscoverySource::RemoteBranch(branch.clone()));
            }
        }

        Err(WorkspaceError::NotFound(slug.to_string()))
    }

    /// Checkout root holding the artifacts of a discovered intent.
    pub fn artifacts_root(&self, discovery: &Discovery) -> Result<PathBuf, WorkspaceError> {
        match &discovery.source {
            DiscoverySource::Filesystem(root) => Ok(root.clone()),
            DiscoverySource::LocalBranch(branch) | DiscoverySource::RemoteBranch(branch) => {
                self.ensure_worktree(branch, branch)
            }
        }
    }
}

/// Copy `.ai-dlc/<slug>` from one checkout root to another.
///
/// Hidden files (the claim lock) are skipped. Returns the number of files copied.
pub fn copy_artifacts(from_root: &Path, to_root: &Path, slug: &str) -> Result<usize, WorkspaceError> {
    let src = intent_dir(from_root, slug);
    let dest = intent_dir(to_root, slug);
    let copy_err = |message: String| WorkspaceError::Copy {
        path: dest.clone(),
        message,
    };

    let mut copied = 0;
    let walker = WalkDir::new(&src)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
    for entry in walker {
        let entry = entry.map_err(|e| copy_err(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(&src)
            .map_err(|e| copy_err(e.to_string()))?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| copy_err(e.to_string()))?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| copy_err(e.to_string()))?;
            copied += 1;
        }
    }
    info!(intent = slug, files = copied, dest = %dest.display(), "copied intent artifacts");
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::UnitStatus;
    use crate::intent::IntentDocument;
    use crate::testutil::{commit_file, setup_repo, write_intent, write_unit};

    fn manager(dir: &Path) -> WorkspaceManager {
        WorkspaceManager::new(
            Arc::new(Git2Vcs::new(dir)),
            dir,
            dir.join(".worktrees"),
            "origin",
            None,
        )
    }

    fn intent(slug: &str, strategy: ChangeStrategy) -> Intent {
        Intent {
            slug: slug.to_string(),
            workflow_name: "default".into(),
            status: Default::default(),
            success_criteria: vec![],
            change_strategy: strategy,
            testing_requirements: Default::default(),
        }
    }

    #[test]
    fn test_ensure_worktree_is_idempotent() {
        let dir = setup_repo();
        let mgr = manager(dir.path());
        let base = mgr.base_branch().unwrap();

        let first = mgr.ensure_worktree("shop/main", &base).unwrap();
        let second = mgr.ensure_worktree("shop/main", &base).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, dir.path().join(".worktrees").join("shop-main"));
        assert!(first.join("README.md").exists());
    }

    #[test]
    fn test_ensure_worktree_refuses_foreign_occupant() {
        let dir = setup_repo();
        let mgr = manager(dir.path());
        let base = mgr.base_branch().unwrap();
        mgr.ensure_worktree("a/b-c", &base).unwrap();

        let err = mgr.ensure_worktree("a-b/c", &base).unwrap_err();
        assert!(matches!(err, WorkspaceError::PathConflict { .. }));
    }

    #[test]
    fn test_unit_workspaces_are_isolated_per_strategy() {
        let dir = setup_repo();
        let mgr = manager(dir.path());
        let unit_a = Unit::new("unit-01-a", UnitStatus::InProgress, vec![]);
        let unit_b = Unit::new("unit-02-b", UnitStatus::InProgress, vec![]);

        let shop = intent("shop", ChangeStrategy::Unit);
        let intent_ws = mgr.intent_workspace(&shop).unwrap();
        assert_eq!(intent_ws.branch, "shop/main");
        assert_eq!(intent_ws.scope(), Scope::Branch("shop/main".into()));

        let a = mgr.unit_workspace(&shop, &unit_a, 1, &intent_ws).unwrap();
        let b = mgr.unit_workspace(&shop, &unit_b, 1, &intent_ws).unwrap();
        assert_eq!(a.branch, "shop/unit-01-a");
        assert_ne!(a.path, b.path);
        assert_ne!(a.path, intent_ws.path);
        assert_eq!(a.scope(), Scope::Unit("shop/unit-01-a".into()));

        let bolts = intent("bolts", ChangeStrategy::Bolt);
        let bolt_ws = mgr.intent_workspace(&bolts).unwrap();
        let bolt = mgr.unit_workspace(&bolts, &unit_a, 3, &bolt_ws).unwrap();
        assert_eq!(bolt.branch, "bolts/unit-01-a/bolt-03");

        let single = intent("single", ChangeStrategy::Intent);
        let single_ws = mgr.intent_workspace(&single).unwrap();
        let shared = mgr.unit_workspace(&single, &unit_a, 1, &single_ws).unwrap();
        assert_eq!(shared.path, single_ws.path);
        assert_ne!(shared.scope(), single_ws.scope());
    }

    #[test]
    fn test_bolt_continues_from_latest_earlier_bolt() {
        let dir = setup_repo();
        let mgr = manager(dir.path());
        let unit = Unit::new("unit-01-a", UnitStatus::InProgress, vec![]);
        let bolts = intent("bolts", ChangeStrategy::Bolt);
        let intent_ws = mgr.intent_workspace(&bolts).unwrap();

        let first = mgr.unit_workspace(&bolts, &unit, 1, &intent_ws).unwrap();
        commit_file(&first.path, "work.txt", "attempt one", "first bolt");

        // Iteration 2 went to another unit; bolt 3 still builds on bolt 1.
        let third = mgr.unit_workspace(&bolts, &unit, 3, &intent_ws).unwrap();
        assert_eq!(third.branch, "bolts/unit-01-a/bolt-03");
        assert_eq!(
            fs::read_to_string(third.path.join("work.txt")).unwrap(),
            "attempt one"
        );
        assert!(!intent_ws.path.join("work.txt").exists());
        assert_eq!(first.scope(), third.scope());
        assert_eq!(third.scope(), Scope::Unit("bolts/unit-01-a".into()));

        let other = Unit::new("unit-02-b", UnitStatus::InProgress, vec![]);
        let fresh = mgr.unit_workspace(&bolts, &other, 3, &intent_ws).unwrap();
        assert!(!fresh.path.join("work.txt").exists());
    }

    #[test]
    fn test_discover_prefers_filesystem_then_branch() {
        let dir = setup_repo();
        let mgr = manager(dir.path());
        write_intent(dir.path(), "shop", "default", "unit");

        let found = mgr.discover_intent("shop").unwrap();
        assert_eq!(
            found.source,
            DiscoverySource::Filesystem(dir.path().to_path_buf())
        );

        let base = mgr.base_branch().unwrap();
        mgr.vcs().create_branch("other/main", &base).unwrap();
        let found = mgr.discover_intent("other").unwrap();
        assert_eq!(
            found.source,
            DiscoverySource::LocalBranch("other/main".into())
        );

        let err = mgr.discover_intent("ghost").unwrap_err();
        assert!(matches!(err, WorkspaceError::NotFound(_)));
    }

    #[test]
    fn test_copy_artifacts_skips_lock_file() {
        let dir = setup_repo();
        write_intent(dir.path(), "shop", "default", "unit");
        write_unit(dir.path(), "shop", "unit-01-a", "pending", &[]);
        fs::write(intent_dir(dir.path(), "shop").join(".claim.lock"), "").unwrap();

        let dest = tempfile::tempdir().unwrap();
        let copied = copy_artifacts(dir.path(), dest.path(), "shop").unwrap();
        assert_eq!(copied, 2);
        assert!(!intent_dir(dest.path(), "shop").join(".claim.lock").exists());
        assert_eq!(
            IntentDocument::load(dest.path(), "shop").unwrap().intent.slug,
            "shop"
        );
    }
}
