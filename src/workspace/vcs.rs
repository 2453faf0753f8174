//! Version-control collaborator.
//!
//! Every operation names its branch or path explicitly. `Git2Vcs` re-opens
//! the repository on each call, so nothing depends on which branch the
//! caller's checkout happens to be on.

use anyhow::{Context, Result, bail};
use git2::build::CheckoutBuilder;
use git2::{BranchType, Direction, Repository, Signature, WorktreeAddOptions, WorktreePruneOptions};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::branch::worktree_dir_name;

/// Discrete VCS operations used by the workspace manager and integrator.
pub trait Vcs: Send + Sync {
    /// Shared git directory of the repository (same for every worktree).
    fn common_dir(&self) -> Result<PathBuf>;

    /// Branch checked out in the main working copy.
    fn current_branch(&self) -> Result<String>;

    fn branch_exists(&self, branch: &str) -> Result<bool>;

    fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool>;

    fn fetch(&self, remote: &str, branch: &str) -> Result<()>;

    /// Create `branch` at the commit `base` resolves to.
    fn create_branch(&self, branch: &str, base: &str) -> Result<()>;

    /// Create a local branch tracking `{remote}/{branch}`.
    fn create_tracking_branch(&self, remote: &str, branch: &str) -> Result<()>;

    /// Delete a local branch. Deleting a missing branch is not an error.
    fn delete_branch(&self, branch: &str) -> Result<()>;

    /// Check out an existing `branch` in a new working copy at `path`.
    fn add_worktree(&self, branch: &str, path: &Path) -> Result<()>;

    /// Branch of the working copy at `path`, or `None` if there is none.
    fn worktree_branch(&self, path: &Path) -> Result<Option<String>>;

    fn remove_worktree(&self, path: &Path) -> Result<()>;

    /// Whether every commit of `branch` is reachable from `into`.
    fn is_merged(&self, branch: &str, into: &str) -> Result<bool>;

    /// Merge `branch` into whatever is checked out at `worktree`.
    fn merge(&self, branch: &str, worktree: &Path) -> Result<()>;
}

/// `Vcs` backed by libgit2.
#[derive(Debug, Clone)]
pub struct Git2Vcs {
    project_dir: PathBuf,
}

impl Git2Vcs {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
        }
    }

    fn repo(&self) -> Result<Repository> {
        Repository::discover(&self.project_dir).with_context(|| {
            format!(
                "Failed to open git repository at {}",
                self.project_dir.display()
            )
        })
    }
}

fn local_ref(branch: &str) -> String {
    format!("refs/heads/{}", branch)
}

fn signature(repo: &Repository) -> Result<Signature<'static>> {
    match repo.signature() {
        Ok(sig) => Ok(sig.to_owned()),
        Err(_) => Ok(Signature::now("hatrack", "hatrack@localhost")?),
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

impl Vcs for Git2Vcs {
    fn common_dir(&self) -> Result<PathBuf> {
        Ok(self.repo()?.commondir().to_path_buf())
    }

    fn current_branch(&self) -> Result<String> {
        let repo = self.repo()?;
        let head = repo.head().context("Repository has no HEAD")?;
        head.shorthand()
            .map(String::from)
            .context("HEAD is not a valid UTF-8 branch name")
    }

    fn branch_exists(&self, branch: &str) -> Result<bool> {
        Ok(self.repo()?.find_branch(branch, BranchType::Local).is_ok())
    }

    fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool> {
        let repo = self.repo()?;
        let Ok(mut handle) = repo.find_remote(remote) else {
            return Ok(false);
        };
        if repo
            .find_reference(&format!("refs/remotes/{}/{}", remote, branch))
            .is_ok()
        {
            return Ok(true);
        }

        handle
            .connect(Direction::Fetch)
            .with_context(|| format!("Failed to connect to remote '{}'", remote))?;
        let wanted = local_ref(branch);
        let found = handle.list()?.iter().any(|head| head.name() == wanted);
        handle.disconnect()?;
        Ok(found)
    }

    fn fetch(&self, remote: &str, branch: &str) -> Result<()> {
        let repo = self.repo()?;
        let mut handle = repo
            .find_remote(remote)
            .with_context(|| format!("Unknown remote '{}'", remote))?;
        let refspec = format!("+refs/heads/{b}:refs/remotes/{r}/{b}", b = branch, r = remote);
        handle
            .fetch(&[refspec.as_str()], None, None)
            .with_context(|| format!("Failed to fetch '{}' from '{}'", branch, remote))?;
        debug!(remote, branch, "fetched remote branch");
        Ok(())
    }

    fn create_branch(&self, branch: &str, base: &str) -> Result<()> {
        let repo = self.repo()?;
        let commit = repo
            .revparse_single(base)
            .and_then(|obj| obj.peel_to_commit())
            .with_context(|| format!("Cannot resolve base '{}' for branch '{}'", base, branch))?;
        repo.branch(branch, &commit, false)
            .with_context(|| format!("Failed to create branch '{}'", branch))?;
        debug!(branch, base, "created branch");
        Ok(())
    }

    fn create_tracking_branch(&self, remote: &str, branch: &str) -> Result<()> {
        let repo = self.repo()?;
        let oid = repo
            .refname_to_id(&format!("refs/remotes/{}/{}", remote, branch))
            .with_context(|| format!("No remote-tracking ref for {}/{}", remote, branch))?;
        let commit = repo.find_commit(oid)?;
        let mut local = repo.branch(branch, &commit, false)?;
        local.set_upstream(Some(format!("{}/{}", remote, branch).as_str()))?;
        Ok(())
    }

    fn delete_branch(&self, branch: &str) -> Result<()> {
        let repo = self.repo()?;
        let Ok(mut handle) = repo.find_branch(branch, BranchType::Local) else {
            return Ok(());
        };
        handle
            .delete()
            .with_context(|| format!("Failed to delete branch '{}'", branch))?;
        debug!(branch, "deleted branch");
        Ok(())
    }

    fn add_worktree(&self, branch: &str, path: &Path) -> Result<()> {
        let repo = self.repo()?;
        let name = worktree_dir_name(branch);

        // A registration whose directory was removed by hand blocks the name.
        if let Ok(stale) = repo.find_worktree(&name)
            && stale.validate().is_err()
        {
            stale.prune(None).context("Failed to prune stale worktree")?;
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let reference = repo
            .find_reference(&local_ref(branch))
            .with_context(|| format!("Branch '{}' does not exist", branch))?;
        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(&reference));
        repo.worktree(&name, path, Some(&opts))
            .with_context(|| format!("Failed to add worktree for '{}' at {}", branch, path.display()))?;
        Ok(())
    }

    fn worktree_branch(&self, path: &Path) -> Result<Option<String>> {
        if !path.exists() {
            return Ok(None);
        }
        let Ok(worktree) = Repository::open(path) else {
            return Ok(None);
        };
        if !worktree.is_worktree() {
            return Ok(None);
        }
        let repo = self.repo()?;
        if !same_path(worktree.commondir(), repo.commondir()) {
            return Ok(None);
        }
        match worktree.workdir() {
            Some(workdir) if same_path(workdir, path) => {}
            _ => return Ok(None),
        }

        let head = worktree.head().context("Worktree has no HEAD")?;
        Ok(head.shorthand().map(String::from))
    }

    fn remove_worktree(&self, path: &Path) -> Result<()> {
        let repo = self.repo()?;
        for name in repo.worktrees()?.iter().flatten() {
            let worktree = repo.find_worktree(name)?;
            if !same_path(worktree.path(), path) {
                continue;
            }
            let mut opts = WorktreePruneOptions::new();
            opts.valid(true).working_tree(true);
            worktree
                .prune(Some(&mut opts))
                .with_context(|| format!("Failed to remove worktree {}", path.display()))?;
            debug!(path = %path.display(), "removed worktree");
            return Ok(());
        }
        Ok(())
    }

    fn is_merged(&self, branch: &str, into: &str) -> Result<bool> {
        let repo = self.repo()?;
        let tip = repo
            .refname_to_id(&local_ref(branch))
            .with_context(|| format!("Branch '{}' does not exist", branch))?;
        let target = repo
            .refname_to_id(&local_ref(into))
            .with_context(|| format!("Branch '{}' does not exist", into))?;
        Ok(tip == target || repo.graph_descendant_of(target, tip)?)
    }

    fn merge(&self, branch: &str, worktree: &Path) -> Result<()> {
        let repo = Repository::open(worktree)
            .with_context(|| format!("Failed to open worktree {}", worktree.display()))?;
        let reference = repo
            .find_reference(&local_ref(branch))
            .with_context(|| format!("Branch '{}' does not exist", branch))?;
        let theirs = repo.reference_to_annotated_commit(&reference)?;
        let (analysis, _) = repo.merge_analysis(&[&theirs])?;

        if analysis.is_up_to_date() {
            return Ok(());
        }

        // Safe checkouts only: uncommitted edits in the worktree (unit status
        // rewrites among them) are kept, and a clash fails before HEAD moves.
        let theirs_commit = repo.find_commit(theirs.id())?;
        if analysis.is_fast_forward() {
            repo.checkout_tree(theirs_commit.as_object(), Some(CheckoutBuilder::new().safe()))
                .with_context(|| format!("Cannot fast-forward to '{}' over local changes", branch))?;
            repo.head()?
                .set_target(theirs.id(), &format!("hatrack: fast-forward to {}", branch))?;
            debug!(branch, "fast-forwarded");
            return Ok(());
        }

        let ours = repo.head()?.peel_to_commit()?;
        let mut index = repo.merge_commits(&ours, &theirs_commit, None)?;
        if index.has_conflicts() {
            bail!("Merging '{}' produced conflicts", branch);
        }
        let tree = repo.find_tree(index.write_tree_to(&repo)?)?;
        repo.checkout_tree(tree.as_object(), Some(CheckoutBuilder::new().safe()))
            .with_context(|| format!("Cannot merge '{}' over local changes", branch))?;

        let sig = signature(&repo)?;
        repo.commit(
            Some("HEAD"),
            &sig,
            &sig,
            &format!("Merge branch '{}'", branch),
            &tree,
            &[&ours, &theirs_commit],
        )?;
        debug!(branch, "merged");
        Ok(())
    }
}
