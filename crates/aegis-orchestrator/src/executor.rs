// ABOUTME: Task graph executor: resolves a graph into ordered task units, then runs them in order.
// ABOUTME: Applies the risk gate, fans out multi-tool tasks, and records feedback and metrics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use aegis_agent::tool::{error_result, fault_message};
use aegis_agent::{AgentRegistry, RegistryError, Resolved, Tool};
use aegis_core::metrics::{FLOW_COST_USD, TASK_DURATION_SECONDS, TASK_TOTAL};
use aegis_core::{
    FeedbackRecord, GraphError, Metrics, Params, ReviewMode, ReviewVerdict, RiskGate, TaskGraph,
    TaskSpec,
};
use aegis_store::FeedbackStore;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::{ConfigError, OrchestratorConfig};

const PIPELINE_START: &str = "PipelineStart";
const PIPELINE_END: &str = "PipelineEnd";

/// Errors that can occur while turning a graph into an executable flow.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid task graph: {0}")]
    InvalidGraph(#[from] GraphError),

    #[error("task '{task_id}': cannot resolve agent '{agent_id}': {source}")]
    Registry {
        task_id: String,
        agent_id: String,
        #[source]
        source: RegistryError,
    },
}

/// Errors that stop a run as a whole. Task faults are not errors; they show
/// up in the report.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("review required for pipeline '{pipeline_id}': risk score {:.2}", .verdict.score)]
    ReviewRequired {
        pipeline_id: String,
        verdict: ReviewVerdict,
    },

    #[error("flow cannot be run from state {0:?}")]
    InvalidState(FlowState),
}

/// Either stage of `Orchestrator::execute`.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Run(#[from] RunError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "status")]
pub enum FlowState {
    Built,
    Running,
    /// Halted by the risk gate in blocking mode.
    Blocked,
    Completed(RunStatus),
}

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub pipeline_id: String,
    pub variant: String,
    /// Per-task results keyed by task id.
    pub outputs: Params,
    pub status: RunStatus,
    /// First task fault, as `Error in task <id>: <message>`.
    pub error: Option<String>,
    pub review: ReviewVerdict,
    pub duration: Duration,
    pub cost_estimate: f64,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// One task with its tools resolved and its params finalized.
pub struct TaskUnit {
    spec: TaskSpec,
    agent: Resolved,
    tools: Vec<(String, Arc<dyn Tool>)>,
}

impl TaskUnit {
    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn params(&self) -> &Params {
        &self.spec.params
    }

    pub fn tool_ids(&self) -> Vec<&str> {
        self.tools.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn agent_version(&self) -> &str {
        &self.agent.entry.version
    }

    pub fn fans_out(&self) -> bool {
        self.spec.fans_out()
    }
}

/// Owns the registry, feedback store, and metrics shared by every flow it builds.
pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    feedback: Arc<FeedbackStore>,
    metrics: Arc<Metrics>,
    config: OrchestratorConfig,
    gate: RiskGate,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        feedback: Arc<FeedbackStore>,
        metrics: Arc<Metrics>,
        config: OrchestratorConfig,
    ) -> Result<Self, ConfigError> {
        let gate = config.risk_gate()?;
        Ok(Self {
            registry,
            feedback,
            metrics,
            config,
            gate,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    async fn resolve(&self, task_id: &str, agent_id: &str) -> Result<Resolved, BuildError> {
        self.registry
            .get(agent_id)
            .await
            .map_err(|source| {
                tracing::error!(task_id, agent_id, error = %source, "agent resolution failed");
                BuildError::Registry {
                    task_id: task_id.to_string(),
                    agent_id: agent_id.to_string(),
                    source,
                }
            })
    }

    /// Resolve every agent and tool in `graph`, pick the variant, and
    /// inject the `pipeline_id` and `variant` params.
    pub async fn build(&self, mut graph: TaskGraph) -> Result<ExecutableFlow, BuildError> {
        graph.validate()?;

        let variant = match self
            .feedback
            .best_variant(&graph.id, &self.config.default_variant)
        {
            Ok(variant) => variant,
            Err(e) => {
                tracing::warn!(pipeline_id = %graph.id, error = %e, "variant lookup failed, using default");
                self.config.default_variant.clone()
            }
        };

        let mut units = Vec::with_capacity(graph.tasks.len());
        for mut spec in std::mem::take(&mut graph.tasks) {
            let agent = self.resolve(&spec.id, &spec.agent).await?;

            let tool_ids: Vec<String> = spec.tool_ids().into_iter().map(str::to_string).collect();
            let mut tools = Vec::with_capacity(tool_ids.len());
            for tool_id in tool_ids {
                let resolved = self.resolve(&spec.id, &tool_id).await?;
                tools.push((tool_id, resolved.tool));
            }

            spec.set_default_param("pipeline_id", graph.id.clone());
            spec.set_default_param("variant", variant.clone());
            units.push(TaskUnit { spec, agent, tools });
        }

        tracing::info!(
            pipeline_id = %graph.id,
            variant = %variant,
            tasks = units.len(),
            generated_by = %graph.generated_by,
            "flow built"
        );

        Ok(ExecutableFlow {
            pipeline_id: graph.id,
            trigger_instruction: graph.trigger_instruction,
            variant,
            units,
            state: FlowState::Built,
            feedback: Arc::clone(&self.feedback),
            metrics: Arc::clone(&self.metrics),
            gate: self.gate.clone(),
            cost_rate_per_sec: self.config.cost_rate_per_sec,
            tool_timeout: self.config.tool_timeout,
        })
    }

    /// Build and run in one step.
    pub async fn execute(&self, graph: TaskGraph) -> Result<RunReport, ExecuteError> {
        let mut flow = self.build(graph).await?;
        Ok(flow.run().await?)
    }
}

/// A built flow, ready to run once.
pub struct ExecutableFlow {
    pipeline_id: String,
    trigger_instruction: String,
    variant: String,
    units: Vec<TaskUnit>,
    state: FlowState,
    feedback: Arc<FeedbackStore>,
    metrics: Arc<Metrics>,
    gate: RiskGate,
    cost_rate_per_sec: f64,
    tool_timeout: Option<Duration>,
}

impl ExecutableFlow {
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    pub fn variant(&self) -> &str {
        &self.variant
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn task_ids(&self) -> Vec<&str> {
        self.units.iter().map(TaskUnit::id).collect()
    }

    pub fn units(&self) -> &[TaskUnit] {
        &self.units
    }

    fn marker(&self, tool: &str, success: bool) -> FeedbackRecord {
        FeedbackRecord::new(&self.pipeline_id, &self.variant, success).tool(tool)
    }

    /// Run every task in declared order. Task faults mark the run as a
    /// partial failure but never stop it.
    pub async fn run(&mut self) -> Result<RunReport, RunError> {
        if self.state != FlowState::Built {
            return Err(RunError::InvalidState(self.state));
        }
        self.state = FlowState::Running;
        let started = Instant::now();

        let review = self.gate.assess(&self.trigger_instruction);
        tracing::info!(
            pipeline_id = %self.pipeline_id,
            score = review.score,
            status = ?review.status,
            categories = ?review.categories,
            "risk review"
        );
        if review.requires_review() && self.gate.mode() == ReviewMode::Blocking {
            let message = format!("review required: risk score {:.2}", review.score);
            tracing::warn!(pipeline_id = %self.pipeline_id, %message, "run blocked");
            // Audit row only; variant counters stay untouched.
            let record = self
                .marker(PIPELINE_END, false)
                .output(json!({}))
                .error(Some(message));
            if let Err(e) = self.feedback.log_execution(&record) {
                tracing::warn!(pipeline_id = %self.pipeline_id, error = %e, "could not log blocked run");
            }
            self.state = FlowState::Blocked;
            return Err(RunError::ReviewRequired {
                pipeline_id: self.pipeline_id.clone(),
                verdict: review,
            });
        }

        self.feedback.record(&self.marker(PIPELINE_START, true).inputs(json!({
            "graph_id": self.pipeline_id,
            "trigger_instruction": self.trigger_instruction,
        })));
        tracing::info!(
            pipeline_id = %self.pipeline_id,
            variant = %self.variant,
            tasks = self.units.len(),
            "run started"
        );

        let mut outputs = Params::new();
        let mut first_error: Option<String> = None;

        for unit in &self.units {
            let task_started = Instant::now();
            let output = run_unit(unit, self.tool_timeout).await;
            let elapsed = task_started.elapsed().as_secs_f64();

            let labels = [("task_id", unit.id())];
            self.metrics.inc_counter(TASK_TOTAL, &labels);
            self.metrics.observe(TASK_DURATION_SECONDS, &labels, elapsed);

            let fault = task_fault(&output);
            match &fault {
                Some(message) => {
                    tracing::warn!(task_id = %unit.id(), error = %message, "task faulted");
                    if first_error.is_none() {
                        first_error = Some(format!("Error in task {}: {}", unit.id(), message));
                    }
                }
                None => tracing::debug!(task_id = %unit.id(), elapsed, "task completed"),
            }

            let record = FeedbackRecord::new(&self.pipeline_id, &self.variant, fault.is_none())
                .tool(unit.tool_ids().join(","))
                .inputs(Value::Object(unit.params().clone()))
                .output(output.clone())
                .error(fault);
            if let Err(e) = self.feedback.log_execution(&record) {
                tracing::warn!(task_id = %unit.id(), error = %e, "could not log task execution");
            }

            outputs.insert(unit.id().to_string(), output);
        }

        let duration = started.elapsed();
        let cost_estimate = estimate_cost(duration, self.cost_rate_per_sec);
        self.metrics.observe(
            FLOW_COST_USD,
            &[("flow_id", self.pipeline_id.as_str())],
            cost_estimate,
        );

        let status = if first_error.is_none() {
            RunStatus::Success
        } else {
            RunStatus::PartialFailure
        };
        self.feedback.record(
            &self
                .marker(PIPELINE_END, status == RunStatus::Success)
                .output(Value::Object(outputs.clone()))
                .error(first_error.clone()),
        );
        self.state = FlowState::Completed(status);

        tracing::info!(
            pipeline_id = %self.pipeline_id,
            status = ?status,
            duration_ms = duration.as_millis() as u64,
            cost_estimate,
            "run finished"
        );

        Ok(RunReport {
            pipeline_id: self.pipeline_id.clone(),
            variant: self.variant.clone(),
            outputs,
            status,
            error: first_error,
            review,
            duration,
            cost_estimate,
        })
    }
}

async fn run_unit(unit: &TaskUnit, timeout: Option<Duration>) -> Value {
    if unit.fans_out() {
        let calls = unit.tools.iter().map(|(tool_id, tool)| async move {
            let result = invoke_tool(tool.as_ref(), tool_id, unit.params().clone(), timeout).await;
            let mut slot = Params::new();
            slot.insert(tool_id.clone(), Value::Object(result));
            Value::Object(slot)
        });
        Value::Array(join_all(calls).await)
    } else {
        match unit.tools.first() {
            Some((tool_id, tool)) => Value::Object(
                invoke_tool(tool.as_ref(), tool_id, unit.params().clone(), timeout).await,
            ),
            None => Value::Object(error_result("no tool to invoke")),
        }
    }
}

async fn invoke_tool(
    tool: &dyn Tool,
    tool_id: &str,
    params: Params,
    timeout: Option<Duration>,
) -> Params {
    tracing::debug!(tool_id, implementation = tool.name(), "invoking tool");
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, tool.invoke(params)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return error_result(format!(
                    "tool '{tool_id}' timed out after {}ms",
                    limit.as_millis()
                ));
            }
        },
        None => tool.invoke(params).await,
    };
    outcome.unwrap_or_else(|e| error_result(e.to_string()))
}

/// First fault in a task's output: the `error` key of a single result, or
/// of any fan-out slot.
fn task_fault(output: &Value) -> Option<String> {
    match output {
        Value::Array(slots) => slots
            .iter()
            .filter_map(Value::as_object)
            .flat_map(|slot| slot.values())
            .find_map(fault_message),
        other => fault_message(other),
    }
}

fn estimate_cost(duration: Duration, rate_per_sec: f64) -> f64 {
    (duration.as_secs_f64() * rate_per_sec * 10_000.0).round() / 10_000.0
}
