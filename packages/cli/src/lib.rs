// ABOUTME: Replinet orchestrator service wiring configuration, state, sandboxes and threads
// ABOUTME: Library half of the replinet binary so the service can be driven from tests

pub mod error;
pub mod logging;
pub mod orchestrator;

pub use error::{OrchestratorError, Result};
pub use orchestrator::{manager_config, Orchestrator};
