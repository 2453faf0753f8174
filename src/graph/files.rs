//! Unit definition files on disk and atomic claiming.
//!
//! Units live next to the intent document as `unit-NN-<slug>.md`. File-name
//! order is declaration order. Every mutation (status rewrite, claim) runs
//! under an exclusive `fs2` lock on `.claim.lock` in the same directory, so
//! concurrent `construct` processes cannot claim the same unit.

use super::builder::UnitGraph;
use super::unit::{Unit, UnitStatus};
use crate::errors::{ConfigError, OrchestratorError, PreconditionError, StateError};
use crate::util::{render_frontmatter, section_items, split_frontmatter};
use anyhow::Context;
use fs2::FileExt;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

const LOCK_FILE: &str = ".claim.lock";

/// Serializes claims between threads of one process; the file lock covers
/// other processes.
static CLAIM_MUTEX: Mutex<()> = Mutex::new(());

#[derive(Debug, Deserialize)]
struct UnitFrontmatter {
    #[serde(default)]
    status: UnitStatus,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    discipline: Option<String>,
    #[serde(default)]
    criteria: Vec<String>,
}

/// Parse one unit definition document.
pub fn parse_unit(path: &Path, text: &str) -> Result<Unit, ConfigError> {
    let id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ConfigError::Frontmatter {
            path: path.to_path_buf(),
            message: "file name is not valid UTF-8".to_string(),
        })?
        .to_string();

    let (yaml, body) = split_frontmatter(text).ok_or_else(|| ConfigError::Frontmatter {
        path: path.to_path_buf(),
        message: "missing frontmatter block".to_string(),
    })?;

    let fm: UnitFrontmatter =
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Frontmatter {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let criteria = if fm.criteria.is_empty() {
        let from_body = section_items(body, "Completion Criteria");
        if from_body.is_empty() {
            section_items(body, "Success Criteria")
        } else {
            from_body
        }
    } else {
        fm.criteria
    };

    Ok(Unit {
        id,
        status: fm.status,
        depends_on: fm.depends_on,
        branch: fm.branch,
        discipline: fm.discipline,
        criteria,
    })
}

/// Replace the `status` key of a unit document, preserving everything else.
pub fn rewrite_status(path: &Path, text: &str, status: UnitStatus) -> Result<String, ConfigError> {
    let (yaml, body) = split_frontmatter(text).ok_or_else(|| ConfigError::Frontmatter {
        path: path.to_path_buf(),
        message: "missing frontmatter block".to_string(),
    })?;

    let mut mapping: serde_yaml::Mapping =
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Frontmatter {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    mapping.insert(
        serde_yaml::Value::String("status".to_string()),
        serde_yaml::Value::String(status.as_str().to_string()),
    );

    let yaml = serde_yaml::to_string(&mapping).map_err(|e| ConfigError::Frontmatter {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(render_frontmatter(&yaml, body))
}

/// The unit files of one intent.
#[derive(Debug, Clone)]
pub struct UnitFiles {
    dir: PathBuf,
}

impl UnitFiles {
    /// `dir` is the intent artifact directory (`.ai-dlc/<slug>`).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn unit_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.md", id))
    }

    /// Read every `unit-*.md` in declaration (file-name) order.
    pub fn load_definitions(&self) -> Result<Vec<Unit>, ConfigError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let pattern = self.dir.join("unit-*.md").to_string_lossy().to_string();
        let mut paths: Vec<PathBuf> = glob::glob(&pattern)
            .map_err(|e| ConfigError::Frontmatter {
                path: self.dir.clone(),
                message: e.to_string(),
            })?
            .filter_map(|entry| entry.ok())
            .collect();
        paths.sort();

        paths
            .iter()
            .map(|path| {
                let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                parse_unit(path, &text)
            })
            .collect()
    }

    /// Load and validate the unit graph.
    pub fn load_graph(&self) -> Result<UnitGraph, ConfigError> {
        UnitGraph::parse(self.load_definitions()?)
    }

    fn with_lock<T>(
        &self,
        f: impl FnOnce() -> Result<T, OrchestratorError>,
    ) -> Result<T, OrchestratorError> {
        let _guard = CLAIM_MUTEX.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        fs::create_dir_all(&self.dir).map_err(|source| StateError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let lock_path = self.dir.join(LOCK_FILE);
        let lock = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|source| StateError::Io {
                path: lock_path.clone(),
                source,
            })?;
        lock.lock_exclusive().map_err(|source| StateError::Io {
            path: lock_path.clone(),
            source,
        })?;

        let result = f();
        let _ = FileExt::unlock(&lock);
        result
    }

    fn write_unit_status(&self, id: &str, status: UnitStatus) -> Result<(), OrchestratorError> {
        let path = self.unit_path(id);
        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let updated = rewrite_status(&path, &text, status)?;

        let tmp = path.with_extension("md.tmp");
        fs::write(&tmp, updated)
            .and_then(|_| fs::rename(&tmp, &path))
            .with_context(|| format!("Failed to write unit file {}", path.display()))?;
        Ok(())
    }

    /// Validate and persist a status transition. Returns the previous status.
    pub fn write_status(&self, id: &str, to: UnitStatus) -> Result<UnitStatus, OrchestratorError> {
        self.with_lock(|| {
            let mut graph = self.load_graph()?;
            let from = graph.mark_status(id, to)?;
            self.write_unit_status(id, to)?;
            info!(unit = id, from = %from, to = %to, "unit status changed");
            Ok(from)
        })
    }

    /// Atomically claim the head of the ready queue.
    ///
    /// With `exclusive` set, a claim is refused while any unit is in progress
    /// (all units share one workspace under the `intent` strategy).
    pub fn claim_next(&self, exclusive: bool) -> Result<Option<Unit>, OrchestratorError> {
        self.with_lock(|| {
            let mut graph = self.load_graph()?;

            if exclusive
                && let Some(busy) = graph
                    .units()
                    .iter()
                    .find(|u| u.status == UnitStatus::InProgress)
            {
                return Err(PreconditionError::SerialStrategyBusy(busy.id.clone()).into());
            }

            let Some(id) = graph.claim_next() else {
                debug!(dir = %self.dir.display(), "no ready unit to claim");
                return Ok(None);
            };
            self.write_unit_status(&id, UnitStatus::InProgress)?;
            info!(unit = %id, "claimed unit");
            Ok(graph.get(&id).cloned())
        })
    }
}
