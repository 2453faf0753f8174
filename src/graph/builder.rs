//! Unit graph construction and scheduling queries.
//!
//! The graph is validated once, when it is built: duplicate ids, dangling
//! `depends_on` references, and cycles are all `ConfigError`s. Scheduling
//! queries never discover structural problems at runtime.

use super::summary::{BlockedUnit, GraphSummary};
use super::unit::{Unit, UnitStatus};
use crate::errors::{ConfigError, PreconditionError};
use crate::workspace::INTENT_BRANCH_SUFFIX;
use std::collections::HashMap;

/// Index into the unit list (declaration order).
pub type UnitIndex = usize;

/// A validated directed acyclic graph of units.
#[derive(Debug, Clone, Default)]
pub struct UnitGraph {
    /// Units in declaration order
    units: Vec<Unit>,
    /// Map from unit id to index
    index_map: HashMap<String, UnitIndex>,
    /// index -> units that depend on it
    forward_edges: Vec<Vec<UnitIndex>>,
    /// index -> units it depends on
    reverse_edges: Vec<Vec<UnitIndex>>,
}

impl UnitGraph {
    /// Build and validate a graph from unit definitions in declaration order.
    pub fn parse(units: Vec<Unit>) -> Result<Self, ConfigError> {
        let mut index_map = HashMap::new();
        for (i, unit) in units.iter().enumerate() {
            if unit.id == INTENT_BRANCH_SUFFIX {
                return Err(ConfigError::ReservedUnitId(unit.id.clone()));
            }
            if index_map.insert(unit.id.clone(), i).is_some() {
                return Err(ConfigError::DuplicateUnit(unit.id.clone()));
            }
        }

        let mut forward_edges: Vec<Vec<UnitIndex>> = vec![Vec::new(); units.len()];
        let mut reverse_edges: Vec<Vec<UnitIndex>> = vec![Vec::new(); units.len()];

        for (to_idx, unit) in units.iter().enumerate() {
            for dep in &unit.depends_on {
                let from_idx =
                    *index_map
                        .get(dep)
                        .ok_or_else(|| ConfigError::UnknownDependency {
                            unit: unit.id.clone(),
                            dependency: dep.clone(),
                        })?;
                forward_edges[from_idx].push(to_idx);
                reverse_edges[to_idx].push(from_idx);
            }
        }

        let graph = Self {
            units,
            index_map,
            forward_edges,
            reverse_edges,
        };
        graph.validate_no_cycles()?;
        Ok(graph)
    }

    /// Kahn's algorithm; any node left with in-degree > 0 sits on a cycle.
    fn validate_no_cycles(&self) -> Result<(), ConfigError> {
        let mut in_degree: Vec<usize> = self.reverse_edges.iter().map(Vec::len).collect();
        let mut queue: Vec<UnitIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut processed = 0;
        while let Some(node) = queue.pop() {
            processed += 1;
            for &dependent in &self.forward_edges[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        if processed != self.units.len() {
            let involved = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .map(|(i, _)| self.units[i].id.clone())
                .collect();
            return Err(ConfigError::Cycle(involved));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// All units in declaration order.
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn get(&self, id: &str) -> Option<&Unit> {
        self.index_map.get(id).map(|&i| &self.units[i])
    }

    fn index_of(&self, id: &str) -> Result<UnitIndex, PreconditionError> {
        self.index_map
            .get(id)
            .copied()
            .ok_or_else(|| PreconditionError::UnknownUnit(id.to_string()))
    }

    fn is_ready(&self, index: UnitIndex) -> bool {
        self.units[index].status == UnitStatus::Pending
            && self.reverse_edges[index]
                .iter()
                .all(|&dep| self.units[dep].status == UnitStatus::Completed)
    }

    /// Pending units whose every dependency is completed, in declaration order.
    pub fn ready_units(&self) -> Vec<&Unit> {
        (0..self.units.len())
            .filter(|&i| self.is_ready(i))
            .map(|i| &self.units[i])
            .collect()
    }

    /// Dependencies of a unit that are not yet completed.
    pub fn unmet_dependencies(&self, id: &str) -> Vec<String> {
        let Some(&index) = self.index_map.get(id) else {
            return Vec::new();
        };
        self.reverse_edges[index]
            .iter()
            .filter(|&&dep| self.units[dep].status != UnitStatus::Completed)
            .map(|&dep| self.units[dep].id.clone())
            .collect()
    }

    /// Validate a transition without applying it.
    pub fn check_transition(&self, id: &str, to: UnitStatus) -> Result<(), PreconditionError> {
        let index = self.index_of(id)?;
        let from = self.units[index].status;
        if !from.can_transition_to(to) {
            return Err(PreconditionError::IllegalTransition {
                unit: id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    /// Apply a validated status transition. Returns the previous status.
    ///
    /// An illegal transition leaves the graph untouched.
    pub fn mark_status(&mut self, id: &str, to: UnitStatus) -> Result<UnitStatus, PreconditionError> {
        self.check_transition(id, to)?;
        let index = self.index_of(id)?;
        let from = self.units[index].status;
        self.units[index].status = to;
        Ok(from)
    }

    /// Claim the head of `ready_units()`: mark it in progress and return its id.
    ///
    /// Readiness check and status change happen under one `&mut` borrow, so a
    /// graph shared behind a lock can never hand the same unit out twice.
    pub fn claim_next(&mut self) -> Option<String> {
        let index = (0..self.units.len()).find(|&i| self.is_ready(i))?;
        self.units[index].status = UnitStatus::InProgress;
        Some(self.units[index].id.clone())
    }

    /// Dependents of `id` that are ready now (fan-out after a completion).
    pub fn newly_ready_after(&self, id: &str) -> Vec<String> {
        let Some(&index) = self.index_map.get(id) else {
            return Vec::new();
        };
        self.forward_edges[index]
            .iter()
            .filter(|&&i| self.is_ready(i))
            .map(|&i| self.units[i].id.clone())
            .collect()
    }

    /// Counts per status, stuck units, and overall completion.
    pub fn summary(&self) -> GraphSummary {
        let mut summary = GraphSummary {
            total: self.units.len(),
            ..Default::default()
        };

        for (i, unit) in self.units.iter().enumerate() {
            match unit.status {
                UnitStatus::Pending => summary.pending += 1,
                UnitStatus::InProgress => summary.in_progress += 1,
                UnitStatus::Completed => summary.completed += 1,
                UnitStatus::Blocked => summary.blocked_count += 1,
            }

            let stuck = unit.status == UnitStatus::Blocked
                || (unit.status == UnitStatus::Pending && !self.is_ready(i));
            if stuck {
                summary.blocked.push(BlockedUnit {
                    id: unit.id.clone(),
                    status: unit.status,
                    unmet_dependencies: self.unmet_dependencies(&unit.id),
                });
            }
        }

        summary.all_complete = !self.units.is_empty() && summary.completed == summary.total;
        summary
    }
}
