// ABOUTME: Placeholder tool that echoes its params, used when no real adapter is wired for an agent.
// ABOUTME: register_stubs fills an ImplementationTable with a stub for every manifest entry.

use std::sync::Arc;

use aegis_core::{AgentManifestEntry, Params};
use async_trait::async_trait;
use serde_json::Value;

use crate::registry::ImplementationTable;
use crate::tool::{Tool, ToolError};

/// Logs the call and reports it as stubbed. Manifest default params fill in
/// any key the caller did not pass.
#[derive(Debug, Clone)]
pub struct StubTool {
    name: String,
    version: String,
    defaults: Params,
}

impl StubTool {
    pub fn from_entry(entry: &AgentManifestEntry) -> Self {
        Self {
            name: entry.impl_name.clone(),
            version: entry.version.clone(),
            defaults: entry.default_params.clone(),
        }
    }
}

#[async_trait]
impl Tool for StubTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, params: Params) -> Result<Params, ToolError> {
        let mut effective = self.defaults.clone();
        effective.extend(params);
        tracing::info!(tool = %self.name, version = %self.version, params = ?effective, "stub tool invoked");

        let mut result = Params::new();
        result.insert("status".into(), Value::String("stubbed".into()));
        result.insert("tool".into(), Value::String(self.name.clone()));
        result.insert("version".into(), Value::String(self.version.clone()));
        result.insert("params".into(), Value::Object(effective));
        Ok(result)
    }
}

/// Register a `StubTool` factory for each entry's implementation reference.
pub fn register_stubs(table: &mut ImplementationTable, entries: &[AgentManifestEntry]) {
    for entry in entries {
        table.register(&entry.module_ref, &entry.impl_name, |entry| {
            Arc::new(StubTool::from_entry(entry))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn stub_merges_defaults_under_params() {
        let mut entry = AgentManifestEntry::new("CRM", "tools.crm_api", "CRMAPI", "0.3.0");
        entry.default_params.insert("region".into(), json!("eu"));
        entry.default_params.insert("limit".into(), json!(10));

        let tool = StubTool::from_entry(&entry);
        let mut params = Params::new();
        params.insert("limit".into(), json!(50));
        let result = tool.invoke(params).await.unwrap();

        assert_eq!(result["status"], "stubbed");
        assert_eq!(result["version"], "0.3.0");
        assert_eq!(result["params"]["region"], "eu");
        assert_eq!(result["params"]["limit"], 50);
    }

    #[test]
    fn register_stubs_covers_every_entry() {
        let entries = vec![
            AgentManifestEntry::new("Slack", "tools.slack_api", "SlackAPI", "0.1.0"),
            AgentManifestEntry::new("CRM", "tools.crm_api", "CRMAPI", "0.1.0"),
        ];
        let mut table = ImplementationTable::new();
        register_stubs(&mut table, &entries);
        assert_eq!(table.len(), 2);
        assert!(table.contains("tools.crm_api", "CRMAPI"));
    }
}
