// ABOUTME: Orchestrator crate for aegis: configuration and the task graph executor.
// ABOUTME: Ties the agent registry, feedback store, risk gate, and metrics together per run.

pub mod config;
pub mod executor;

pub use config::{ConfigError, OrchestratorConfig};
pub use executor::{
    BuildError, ExecutableFlow, ExecuteError, FlowState, Orchestrator, RunError, RunReport,
    RunStatus, TaskUnit,
};
