//! Aggregate view over a unit graph.

use super::unit::UnitStatus;
use serde::{Deserialize, Serialize};

/// A unit that cannot be scheduled right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedUnit {
    pub id: String,
    pub status: UnitStatus,
    /// Dependencies that are not completed yet
    pub unmet_dependencies: Vec<String>,
}

/// Counts per status plus the units that are stuck.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub blocked_count: usize,
    /// Units with status `blocked`, and pending units that are not ready
    pub blocked: Vec<BlockedUnit>,
    /// True when the graph is non-empty and every unit is completed
    pub all_complete: bool,
}

impl GraphSummary {
    /// Number of units not completed yet.
    pub fn remaining(&self) -> usize {
        self.total - self.completed
    }
}
