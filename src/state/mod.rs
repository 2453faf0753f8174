//! Branch-scoped persistent key/value state.

mod store;

pub use store::{Scope, StateStore};

/// Key of the persisted `IterationState` in an intent scope.
pub const ITERATION_KEY: &str = "iteration.json";

/// Key holding executor notes.
pub const SCRATCHPAD_KEY: &str = "scratchpad.md";

/// Key holding the notes of a `blocked` executor outcome.
pub const BLOCKERS_KEY: &str = "blockers.md";
