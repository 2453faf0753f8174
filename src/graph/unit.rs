//! Unit definitions and the unit status transition table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a unit.
///
/// Legal transitions:
///
/// | From          | To                        |
/// |---------------|---------------------------|
/// | `pending`     | `in_progress`             |
/// | `in_progress` | `completed`, `blocked`    |
/// | `blocked`     | `pending`                 |
///
/// Everything else (including a transition to the same status) is illegal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Blocked,
}

impl UnitStatus {
    /// Check whether `self -> to` is in the transition table.
    pub fn can_transition_to(self, to: UnitStatus) -> bool {
        matches!(
            (self, to),
            (UnitStatus::Pending, UnitStatus::InProgress)
                | (UnitStatus::InProgress, UnitStatus::Completed)
                | (UnitStatus::InProgress, UnitStatus::Blocked)
                | (UnitStatus::Blocked, UnitStatus::Pending)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::InProgress => "in_progress",
            UnitStatus::Completed => "completed",
            UnitStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UnitStatus::Pending),
            "in_progress" => Ok(UnitStatus::InProgress),
            "completed" => Ok(UnitStatus::Completed),
            "blocked" => Ok(UnitStatus::Blocked),
            _ => anyhow::bail!(
                "Invalid unit status '{}'. Valid values: pending, in_progress, completed, blocked",
                s
            ),
        }
    }
}

/// An independently schedulable piece of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Unit id, the stem of its definition file (e.g. `unit-01-setup`)
    pub id: String,
    pub status: UnitStatus,
    /// Ids of units that must be completed first
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Explicit branch from the definition; derived from the change strategy when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Routing tag for the executor, opaque to the orchestrator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discipline: Option<String>,
    #[serde(default)]
    pub criteria: Vec<String>,
}

impl Unit {
    pub fn new(id: &str, status: UnitStatus, depends_on: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            status,
            depends_on,
            branch: None,
            discipline: None,
            criteria: Vec::new(),
        }
    }

    pub fn with_discipline(mut self, discipline: &str) -> Self {
        self.discipline = Some(discipline.to_string());
        self
    }

    pub fn with_criteria(mut self, criteria: Vec<String>) -> Self {
        self.criteria = criteria;
        self
    }
}
