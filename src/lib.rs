pub mod config;
pub mod errors;
pub mod executor;
pub mod graph;
pub mod integrate;
pub mod intent;
pub mod logging;
pub mod orchestrator;
pub mod project_config;
pub mod state;
pub mod util;
pub mod verify;
pub mod workflow;
pub mod workspace;

#[cfg(test)]
mod testutil;
