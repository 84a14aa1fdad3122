// ABOUTME: Core library for aegis, containing the task graph model, manifest types, and policies.
// ABOUTME: Shared by the store, agent registry, and orchestrator crates.

pub mod graph;
pub mod manifest;
pub mod metrics;
pub mod planner;
pub mod risk;
pub mod variant;

pub use graph::{GraphError, Params, TaskGraph, TaskSpec, ToolSelector};
pub use manifest::{AgentManifestEntry, AgentStatus};
pub use metrics::Metrics;
pub use planner::{FallbackPlanner, PlanOutcome, Planner, StaticPlanner};
pub use risk::{ReviewMode, ReviewStatus, ReviewVerdict, RiskCategory, RiskError, RiskGate};
pub use variant::{FeedbackRecord, VariantStat, select_best};
