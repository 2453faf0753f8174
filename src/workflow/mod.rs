//! Workflows (ordered hat sequences) and the hat state machine.
//!
//! A workflow names the phases an intent moves through. The first hat is the
//! decomposition hat, the last one is terminal: `done` is only legal there.
//! `fail` and the retry branch of `advance` send the intent back to the
//! workflow's retry hat.

mod engine;
mod state;

pub use engine::{AdvanceOutcome, WorkflowEngine};
pub use state::IterationState;

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Index of the default retry hat (first hat after elaboration and planning).
const DEFAULT_RETRY_INDEX: usize = 2;

/// `[workflows.<name>]` entry of the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Hat sequence; empty keeps the built-in sequence of the same name
    #[serde(default)]
    pub hats: Vec<String>,
    #[serde(default)]
    pub retry_hat: Option<String>,
    /// Whether `done` runs the integrator
    #[serde(default)]
    pub integrate: Option<bool>,
}

/// A validated workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub hats: Vec<String>,
    pub retry_hat: String,
    pub integrate: bool,
}

impl WorkflowDefinition {
    /// Validate a hat sequence: two or more hats, no duplicates, and a retry
    /// hat (default `hats[min(2, last)]`) that belongs to the workflow.
    pub fn new(
        name: &str,
        hats: Vec<String>,
        retry_hat: Option<String>,
        integrate: bool,
    ) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidWorkflow {
            name: name.to_string(),
            message,
        };

        if hats.len() < 2 {
            return Err(invalid(format!(
                "needs at least two hats, found {}",
                hats.len()
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = hats.iter().find(|h| !seen.insert(h.as_str())) {
            return Err(invalid(format!("hat '{}' appears more than once", dup)));
        }

        let retry_hat = match retry_hat {
            Some(hat) if hats.contains(&hat) => hat,
            Some(hat) => return Err(invalid(format!("retry hat '{}' is not in the workflow", hat))),
            None => hats[DEFAULT_RETRY_INDEX.min(hats.len() - 1)].clone(),
        };

        Ok(Self {
            name: name.to_string(),
            hats,
            retry_hat,
            integrate,
        })
    }

    fn builtin(name: &str, hats: &[&str]) -> Self {
        let hats: Vec<String> = hats.iter().map(|h| h.to_string()).collect();
        let retry_hat = hats[DEFAULT_RETRY_INDEX.min(hats.len() - 1)].clone();
        Self {
            name: name.to_string(),
            hats,
            retry_hat,
            integrate: true,
        }
    }

    /// First hat; also where an intent goes when it needs (re)decomposition.
    pub fn decomposition_hat(&self) -> &str {
        &self.hats[0]
    }

    pub fn terminal_hat(&self) -> &str {
        &self.hats[self.hats.len() - 1]
    }

    pub fn position(&self, hat: &str) -> Option<usize> {
        self.hats.iter().position(|h| h == hat)
    }

    pub fn is_terminal(&self, hat: &str) -> bool {
        hat == self.terminal_hat()
    }
}

/// Built-in workflows.
pub fn builtin_workflows() -> Vec<WorkflowDefinition> {
    vec![
        WorkflowDefinition::builtin("default", &["elaborator", "planner", "builder", "reviewer"]),
        WorkflowDefinition::builtin(
            "adversarial",
            &["elaborator", "planner", "builder", "red-team", "blue-team", "reviewer"],
        ),
        WorkflowDefinition::builtin("design", &["elaborator", "planner", "designer", "reviewer"]),
        WorkflowDefinition::builtin(
            "hypothesis",
            &["elaborator", "observer", "hypothesizer", "experimenter", "analyst"],
        ),
        WorkflowDefinition::builtin(
            "tdd",
            &["elaborator", "planner", "test-writer", "implementer", "refactorer", "reviewer"],
        ),
    ]
}

/// Named workflows available to intents.
#[derive(Debug, Clone)]
pub struct WorkflowRegistry {
    workflows: BTreeMap<String, WorkflowDefinition>,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self {
            workflows: builtin_workflows()
                .into_iter()
                .map(|w| (w.name.clone(), w))
                .collect(),
        }
    }
}

impl WorkflowRegistry {
    /// Built-ins overlaid with settings-file entries.
    pub fn with_settings(
        settings: &BTreeMap<String, WorkflowSettings>,
    ) -> Result<Self, ConfigError> {
        let mut registry = Self::default();
        for (name, entry) in settings {
            let builtin = registry.workflows.get(name);
            let hats = if entry.hats.is_empty() {
                builtin
                    .map(|w| w.hats.clone())
                    .ok_or_else(|| ConfigError::InvalidWorkflow {
                        name: name.clone(),
                        message: "no hats configured".to_string(),
                    })?
            } else {
                entry.hats.clone()
            };
            let integrate = entry
                .integrate
                .or_else(|| builtin.map(|w| w.integrate))
                .unwrap_or(true);
            let definition =
                WorkflowDefinition::new(name, hats, entry.retry_hat.clone(), integrate)?;
            registry.workflows.insert(name.clone(), definition);
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Result<&WorkflowDefinition, ConfigError> {
        self.workflows
            .get(name)
            .ok_or_else(|| ConfigError::UnknownWorkflow(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.workflows.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hats(names: &[&str]) -> Vec<String> {
        names.iter().map(|h| h.to_string()).collect()
    }

    #[test]
    fn test_builtin_retry_hats() {
        let registry = WorkflowRegistry::default();
        assert_eq!(registry.get("default").unwrap().retry_hat, "builder");
        assert_eq!(registry.get("hypothesis").unwrap().retry_hat, "hypothesizer");
        assert_eq!(registry.get("tdd").unwrap().terminal_hat(), "reviewer");
        assert_eq!(
            registry.names(),
            vec!["adversarial", "default", "design", "hypothesis", "tdd"]
        );
    }

    #[test]
    fn test_short_workflow_defaults_retry_to_last_hat() {
        let def = WorkflowDefinition::new("mini", hats(&["plan", "do"]), None, true).unwrap();
        assert_eq!(def.retry_hat, "do");
        assert_eq!(def.decomposition_hat(), "plan");
    }

    #[test]
    fn test_invalid_workflows_rejected() {
        assert!(matches!(
            WorkflowDefinition::new("x", hats(&["only"]), None, true),
            Err(ConfigError::InvalidWorkflow { .. })
        ));
        assert!(WorkflowDefinition::new("x", hats(&["a", "b", "a"]), None, true).is_err());
        assert!(
            WorkflowDefinition::new("x", hats(&["a", "b"]), Some("c".into()), true).is_err()
        );
    }

    #[test]
    fn test_settings_override_and_add() {
        let mut settings = BTreeMap::new();
        settings.insert(
            "default".to_string(),
            WorkflowSettings {
                retry_hat: Some("planner".into()),
                ..Default::default()
            },
        );
        settings.insert(
            "docs".to_string(),
            WorkflowSettings {
                hats: hats(&["elaborator", "writer", "editor"]),
                integrate: Some(false),
                ..Default::default()
            },
        );

        let registry = WorkflowRegistry::with_settings(&settings).unwrap();
        let default = registry.get("default").unwrap();
        assert_eq!(default.hats.len(), 4);
        assert_eq!(default.retry_hat, "planner");

        let docs = registry.get("docs").unwrap();
        assert_eq!(docs.retry_hat, "editor");
        assert!(!docs.integrate);

        assert!(matches!(
            registry.get("nope"),
            Err(ConfigError::UnknownWorkflow(_))
        ));
    }
}
