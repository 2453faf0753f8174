//! Intent documents (`.ai-dlc/<slug>/intent.md`).
//!
//! Intents are created by an external elaboration step. The orchestrator only
//! ever rewrites their `status`; criteria are read-only.

use crate::errors::ConfigError;
use crate::util::{render_frontmatter, section_items, split_frontmatter};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Directory that holds intent artifacts inside a checkout.
pub const ARTIFACTS_DIR: &str = ".ai-dlc";

/// File name of the intent document.
pub const INTENT_FILE: &str = "intent.md";

/// Default workflow name when the intent does not name one.
pub const DEFAULT_WORKFLOW: &str = "default";

/// Directory holding one intent's artifacts under `root`.
pub fn intent_dir(root: &Path, slug: &str) -> PathBuf {
    root.join(ARTIFACTS_DIR).join(slug)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    #[default]
    Active,
    Complete,
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntentStatus::Active => write!(f, "active"),
            IntentStatus::Complete => write!(f, "complete"),
        }
    }
}

/// Policy for branch naming and merge timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStrategy {
    /// Unit branches merge into the intent branch as each unit completes
    Trunk,
    /// One merge request per unit
    #[default]
    Unit,
    /// One branch (and request) per iteration of a unit
    Bolt,
    /// A single branch and merge request for the whole intent
    Intent,
}

impl fmt::Display for ChangeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeStrategy::Trunk => write!(f, "trunk"),
            ChangeStrategy::Unit => write!(f, "unit"),
            ChangeStrategy::Bolt => write!(f, "bolt"),
            ChangeStrategy::Intent => write!(f, "intent"),
        }
    }
}

impl FromStr for ChangeStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trunk" => Ok(ChangeStrategy::Trunk),
            "unit" => Ok(ChangeStrategy::Unit),
            "bolt" => Ok(ChangeStrategy::Bolt),
            "intent" => Ok(ChangeStrategy::Intent),
            _ => anyhow::bail!(
                "Invalid change strategy '{}'. Valid values: trunk, unit, bolt, intent",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestingRequirements {
    #[serde(default)]
    pub unit: bool,
    #[serde(default)]
    pub integration: bool,
    #[serde(default)]
    pub e2e: bool,
    /// Minimum coverage percentage, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<u8>,
}

/// A top-level task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub slug: String,
    pub workflow_name: String,
    pub status: IntentStatus,
    pub success_criteria: Vec<String>,
    pub change_strategy: ChangeStrategy,
    pub testing_requirements: TestingRequirements,
}

#[derive(Debug, Deserialize)]
struct IntentFrontmatter {
    #[serde(default)]
    workflow: Option<String>,
    #[serde(default)]
    status: IntentStatus,
    #[serde(default)]
    change_strategy: ChangeStrategy,
    #[serde(default)]
    success_criteria: Vec<String>,
    #[serde(default)]
    testing: TestingRequirements,
}

/// An intent document bound to its location on disk.
#[derive(Debug, Clone)]
pub struct IntentDocument {
    pub path: PathBuf,
    pub intent: Intent,
}

impl IntentDocument {
    /// Parse the document text of intent `slug`.
    pub fn parse(path: &Path, slug: &str, text: &str) -> Result<Intent, ConfigError> {
        let (yaml, body) = split_frontmatter(text).ok_or_else(|| ConfigError::Frontmatter {
            path: path.to_path_buf(),
            message: "missing frontmatter block".to_string(),
        })?;
        let fm: IntentFrontmatter =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Frontmatter {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let success_criteria = if fm.success_criteria.is_empty() {
            section_items(body, "Success Criteria")
        } else {
            fm.success_criteria
        };

        Ok(Intent {
            slug: slug.to_string(),
            workflow_name: fm
                .workflow
                .unwrap_or_else(|| DEFAULT_WORKFLOW.to_string()),
            status: fm.status,
            success_criteria,
            change_strategy: fm.change_strategy,
            testing_requirements: fm.testing,
        })
    }

    /// Load `<root>/.ai-dlc/<slug>/intent.md`.
    pub fn load(root: &Path, slug: &str) -> Result<Self, ConfigError> {
        let path = intent_dir(root, slug).join(INTENT_FILE);
        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let intent = Self::parse(&path, slug, &text)?;
        Ok(Self { path, intent })
    }

    /// Rewrite only the `status` key of the document.
    pub fn set_status(&mut self, status: IntentStatus) -> anyhow::Result<()> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let (yaml, body) = split_frontmatter(&text)
            .with_context(|| format!("Missing frontmatter in {}", self.path.display()))?;

        let mut mapping: serde_yaml::Mapping =
            serde_yaml::from_str(yaml).context("Failed to parse intent frontmatter")?;
        mapping.insert(
            serde_yaml::Value::String("status".to_string()),
            serde_yaml::Value::String(status.to_string()),
        );
        let yaml = serde_yaml::to_string(&mapping).context("Failed to serialize frontmatter")?;

        fs::write(&self.path, render_frontmatter(&yaml, body))
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        self.intent.status = status;
        Ok(())
    }
}

/// Slugs of every intent with an `intent.md` under `root/.ai-dlc`, sorted.
pub fn list_intents(root: &Path) -> Vec<String> {
    let dir = root.join(ARTIFACTS_DIR);
    let Ok(entries) = fs::read_dir(&dir) else {
        return Vec::new();
    };

    let mut slugs: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().join(INTENT_FILE).is_file())
        .filter_map(|e| e.file_name().to_str().map(String::from))
        .collect();
    slugs.sort();
    slugs
}
