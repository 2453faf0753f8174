//! Branch naming per change strategy.

use crate::intent::ChangeStrategy;

/// Suffix of the intent workspace branch (`{slug}/main`) for strategies that
/// also create `{slug}/...` unit branches.
pub const INTENT_BRANCH_SUFFIX: &str = "main";

/// Branch name of a unit workspace.
///
/// | strategy     | branch                         |
/// |--------------|--------------------------------|
/// | trunk / unit | `{intent}/{unit}`              |
/// | bolt         | `{intent}/{unit}/{bolt}`       |
/// | intent       | `{intent}`                     |
///
/// `unit` and `bolt` are ignored where the pattern has no slot for them.
pub fn branch_name(
    strategy: ChangeStrategy,
    intent: &str,
    unit: Option<&str>,
    bolt: Option<&str>,
) -> String {
    match (strategy, unit) {
        (ChangeStrategy::Intent, _) | (_, None) => intent.to_string(),
        (ChangeStrategy::Trunk | ChangeStrategy::Unit, Some(unit)) => {
            format!("{}/{}", intent, unit)
        }
        (ChangeStrategy::Bolt, Some(unit)) => match bolt {
            Some(bolt) => format!("{}/{}/{}", intent, unit, bolt),
            None => format!("{}/{}", intent, unit),
        },
    }
}

/// Branch of the intent workspace.
pub fn intent_branch(strategy: ChangeStrategy, intent: &str) -> String {
    match strategy {
        ChangeStrategy::Intent => intent.to_string(),
        _ => format!("{}/{}", intent, INTENT_BRANCH_SUFFIX),
    }
}

/// Bolt slug for an iteration counter (`bolt-03`).
pub fn bolt_slug(iteration: u32) -> String {
    format!("bolt-{:02}", iteration)
}

/// Candidate intent branches, in lookup order, when the strategy is unknown.
pub fn intent_branch_candidates(intent: &str) -> [String; 2] {
    [
        format!("{}/{}", intent, INTENT_BRANCH_SUFFIX),
        intent.to_string(),
    ]
}

/// Directory name of the worktree for `branch`.
pub fn worktree_dir_name(branch: &str) -> String {
    branch.replace('/', "-")
}
