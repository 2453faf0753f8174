use super::WorkflowDefinition;
use crate::intent::IntentStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-intent run state, persisted as `iteration.json` in the intent scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationState {
    pub intent: String,
    pub iteration: u32,
    /// Current hat
    pub hat: String,
    pub workflow_name: String,
    /// Resolved hat sequence at the time the state was created
    pub workflow: Vec<String>,
    pub status: IntentStatus,
    #[serde(default)]
    pub current_unit: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl IterationState {
    /// Fresh state at `hat`, iteration 1.
    pub fn fresh(
        intent: &str,
        workflow: &WorkflowDefinition,
        hat: &str,
        current_unit: Option<String>,
    ) -> Self {
        Self {
            intent: intent.to_string(),
            iteration: 1,
            hat: hat.to_string(),
            workflow_name: workflow.name.clone(),
            workflow: workflow.hats.clone(),
            status: IntentStatus::Active,
            current_unit,
            updated_at: Utc::now(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == IntentStatus::Complete
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
