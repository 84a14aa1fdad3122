// ABOUTME: Defines TaskSpec and TaskGraph, the planner-produced unit of work consumed by the executor.
// ABOUTME: Tasks keep declared order; tool selectors accept either a single id or an ordered list.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use ulid::Ulid;

/// Named parameters passed to a tool invocation, and the shape tools return.
pub type Params = Map<String, Value>;

/// Errors raised while parsing or validating a task graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("duplicate task id in graph: {0}")]
    DuplicateTaskId(String),

    #[error("task '{0}' has an empty tool list")]
    EmptyToolList(String),

    #[error("invalid task graph json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Which tool(s) a task invokes. Serialized untagged so planners can emit
/// either `"tool": "SlackAPI"` or `"tool": ["OktaAPI", "SlackAPI"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolSelector {
    One(String),
    Many(Vec<String>),
}

impl ToolSelector {
    /// Tool ids in declared order.
    pub fn ids(&self) -> Vec<&str> {
        match self {
            ToolSelector::One(id) => vec![id.as_str()],
            ToolSelector::Many(ids) => ids.iter().map(String::as_str).collect(),
        }
    }
}

/// A single step of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolSelector>,
    #[serde(default)]
    pub params: Params,
    /// Fan-out hint: invoke the task's tools concurrently.
    #[serde(default)]
    pub parallel: bool,
    /// Advisory retry budget. Recorded, not acted upon.
    #[serde(default)]
    pub retry: u32,
    /// Declared dependencies. Accepted as data; execution order is the
    /// order of `TaskGraph::tasks`.
    #[serde(default, alias = "dependencies", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl TaskSpec {
    pub fn new(id: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent: agent.into(),
            tool: None,
            params: Params::new(),
            parallel: false,
            retry: 0,
            depends_on: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(ToolSelector::One(tool.into()));
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tool = Some(ToolSelector::Many(tools.into_iter().map(Into::into).collect()));
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Ids the executor must invoke for this task. A task without a tool
    /// selector invokes its agent directly.
    pub fn tool_ids(&self) -> Vec<&str> {
        match &self.tool {
            Some(selector) => selector.ids(),
            None => vec![self.agent.as_str()],
        }
    }

    /// True when the task's tools run as a concurrent fan-out whose result
    /// is an ordered list rather than a single mapping.
    pub fn fans_out(&self) -> bool {
        self.parallel || matches!(self.tool, Some(ToolSelector::Many(_)))
    }

    /// Set `key` to `value` unless the task already defines it.
    pub fn set_default_param(&mut self, key: &str, value: impl Into<Value>) {
        self.params
            .entry(key.to_string())
            .or_insert_with(|| value.into());
    }
}

fn generated_graph_id() -> String {
    format!("flow-{}", Ulid::new())
}

fn default_instruction() -> String {
    "No instruction provided".to_string()
}

fn default_generated_by() -> String {
    "unknown".to_string()
}

/// A pipeline: an identity plus an ordered sequence of tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskGraph {
    #[serde(default = "generated_graph_id")]
    pub id: String,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
    #[serde(default = "default_instruction")]
    pub trigger_instruction: String,
    #[serde(default = "default_generated_by")]
    pub generated_by: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl TaskGraph {
    pub fn new(id: impl Into<String>, trigger_instruction: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tasks: Vec::new(),
            trigger_instruction: trigger_instruction.into(),
            generated_by: default_generated_by(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_task(mut self, task: TaskSpec) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn generated_by(mut self, tag: impl Into<String>) -> Self {
        self.generated_by = tag.into();
        self
    }

    /// Parse a graph from planner JSON output and validate it.
    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        let graph: TaskGraph = serde_json::from_str(json)?;
        graph.validate()?;
        Ok(graph)
    }

    /// Check that task ids are unique and that no task lists zero tools.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(GraphError::DuplicateTaskId(task.id.clone()));
            }
            if matches!(&task.tool, Some(ToolSelector::Many(ids)) if ids.is_empty()) {
                return Err(GraphError::EmptyToolList(task.id.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_selector_accepts_string_or_list() {
        let one: TaskSpec =
            serde_json::from_value(json!({"id": "a", "agent": "X", "tool": "SlackAPI"})).unwrap();
        assert_eq!(one.tool, Some(ToolSelector::One("SlackAPI".into())));
        assert!(!one.fans_out());

        let many: TaskSpec = serde_json::from_value(
            json!({"id": "b", "agent": "X", "tool": ["OktaAPI", "SlackAPI"]}),
        )
        .unwrap();
        assert_eq!(many.tool_ids(), vec!["OktaAPI", "SlackAPI"]);
        assert!(many.fans_out());

        let none: TaskSpec =
            serde_json::from_value(json!({"id": "c", "agent": "Planner", "tool": null})).unwrap();
        assert!(none.tool.is_none());
        assert_eq!(none.tool_ids(), vec!["Planner"]);
    }

    #[test]
    fn parallel_flag_forces_fan_out() {
        let task = TaskSpec::new("t", "Agent").with_tool("T1").parallel(true);
        assert!(task.fans_out());
    }

    #[test]
    fn set_default_param_keeps_explicit_values() {
        let mut task = TaskSpec::new("t", "Agent").with_param("variant", "B");
        task.set_default_param("variant", "default");
        task.set_default_param("pipeline_id", "p1");
        assert_eq!(task.params["variant"], json!("B"));
        assert_eq!(task.params["pipeline_id"], json!("p1"));
    }

    #[test]
    fn graph_defaults_fill_missing_fields() {
        let graph = TaskGraph::from_json(r#"{"tasks": []}"#).unwrap();
        assert!(graph.id.starts_with("flow-"));
        assert_eq!(graph.trigger_instruction, "No instruction provided");
        assert_eq!(graph.generated_by, "unknown");
    }

    #[test]
    fn graph_rejects_duplicate_task_ids() {
        let graph = TaskGraph::new("p", "x")
            .with_task(TaskSpec::new("t1", "A"))
            .with_task(TaskSpec::new("t1", "B"));
        let err = graph.validate().unwrap_err();
        assert!(matches!(err, GraphError::DuplicateTaskId(ref id) if id == "t1"));
    }

    #[test]
    fn graph_rejects_empty_tool_list() {
        let err = TaskGraph::from_json(
            r#"{"id": "p", "tasks": [{"id": "noop", "agent": "A", "tool": []}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::EmptyToolList(ref id) if id == "noop"));
    }

    #[test]
    fn dependencies_are_parsed_but_order_is_declared_order() {
        let graph = TaskGraph::from_json(
            r#"{"id": "p", "tasks": [
                {"id": "second", "agent": "A", "dependencies": ["first"]},
                {"id": "first", "agent": "B", "retry": 2}
            ]}"#,
        )
        .unwrap();
        let ids: Vec<&str> = graph.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["second", "first"]);
        assert_eq!(graph.tasks[0].depends_on, vec!["first".to_string()]);
        assert_eq!(graph.tasks[1].retry, 2);
    }
}
