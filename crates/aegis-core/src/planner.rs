// ABOUTME: Planner contract: turns a free-text directive into a TaskGraph or an explicit failure.
// ABOUTME: FallbackPlanner makes the primary-then-fallback chain an ordinary branch on PlanOutcome.

use async_trait::async_trait;

use crate::graph::TaskGraph;

/// Result of one planning attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    Planned(TaskGraph),
    Failed { reason: String },
}

impl PlanOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn into_graph(self) -> Option<TaskGraph> {
        match self {
            Self::Planned(graph) => Some(graph),
            Self::Failed { .. } => None,
        }
    }
}

/// External component producing task graphs from directives.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, directive: &str) -> PlanOutcome;

    /// Provenance tag written into `TaskGraph::generated_by`.
    fn name(&self) -> &str;
}

/// Always returns a copy of a fixed graph, stamped with the directive.
#[derive(Debug, Clone)]
pub struct StaticPlanner {
    graph: TaskGraph,
}

impl StaticPlanner {
    pub fn new(graph: TaskGraph) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn plan(&self, directive: &str) -> PlanOutcome {
        let mut graph = self.graph.clone();
        graph.trigger_instruction = directive.to_string();
        graph.generated_by = self.name().to_string();
        PlanOutcome::Planned(graph)
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Tries `primary`; on `Failed` consults `fallback`. A fallback failure
/// carries both reasons.
pub struct FallbackPlanner<P, F> {
    primary: P,
    fallback: F,
}

impl<P: Planner, F: Planner> FallbackPlanner<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl<P: Planner, F: Planner> Planner for FallbackPlanner<P, F> {
    async fn plan(&self, directive: &str) -> PlanOutcome {
        let primary_reason = match self.primary.plan(directive).await {
            PlanOutcome::Planned(graph) => return PlanOutcome::Planned(graph),
            PlanOutcome::Failed { reason } => reason,
        };
        tracing::warn!(
            planner = self.primary.name(),
            reason = %primary_reason,
            fallback = self.fallback.name(),
            "primary planner failed, using fallback"
        );
        match self.fallback.plan(directive).await {
            PlanOutcome::Planned(graph) => PlanOutcome::Planned(graph),
            PlanOutcome::Failed { reason } => PlanOutcome::failed(format!(
                "{}: {}; {}: {}",
                self.primary.name(),
                primary_reason,
                self.fallback.name(),
                reason
            )),
        }
    }

    fn name(&self) -> &str {
        self.primary.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TaskSpec;

    struct Unavailable;

    #[async_trait]
    impl Planner for Unavailable {
        async fn plan(&self, _directive: &str) -> PlanOutcome {
            PlanOutcome::failed("llm unavailable")
        }

        fn name(&self) -> &str {
            "llm"
        }
    }

    fn onboarding_graph() -> TaskGraph {
        TaskGraph::new("pipeline.onboarding.v0", "")
            .with_task(TaskSpec::new("collect_info", "DataGatherer").with_tool("FormAPI"))
    }

    #[tokio::test]
    async fn static_planner_stamps_directive() {
        let planner = StaticPlanner::new(onboarding_graph());
        let graph = planner.plan("onboard alice").await.into_graph().unwrap();
        assert_eq!(graph.trigger_instruction, "onboard alice");
        assert_eq!(graph.generated_by, "static");
        assert_eq!(graph.tasks.len(), 1);
    }

    #[tokio::test]
    async fn fallback_is_used_when_primary_fails() {
        let planner = FallbackPlanner::new(Unavailable, StaticPlanner::new(onboarding_graph()));
        let outcome = planner.plan("onboard bob").await;
        let graph = outcome.into_graph().expect("fallback should plan");
        assert_eq!(graph.id, "pipeline.onboarding.v0");
    }

    #[tokio::test]
    async fn both_failures_are_reported() {
        let planner = FallbackPlanner::new(Unavailable, Unavailable);
        match planner.plan("anything").await {
            PlanOutcome::Failed { reason } => {
                assert_eq!(reason, "llm: llm unavailable; llm: llm unavailable");
            }
            PlanOutcome::Planned(_) => panic!("expected failure"),
        }
    }
}
