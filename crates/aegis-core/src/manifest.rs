// ABOUTME: Defines AgentManifestEntry and AgentStatus, the declarative agent-id to implementation mapping.
// ABOUTME: Field names follow the manifest file format (module, classname) via serde renames.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::graph::Params;

/// Lifecycle status of a manifest entry. Deprecated entries are never resolvable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Beta,
    Deprecated,
}

impl AgentStatus {
    pub fn is_resolvable(self) -> bool {
        !matches!(self, AgentStatus::Deprecated)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Beta => write!(f, "beta"),
            Self::Deprecated => write!(f, "deprecated"),
        }
    }
}

/// One agent in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentManifestEntry {
    pub id: String,
    #[serde(rename = "module")]
    pub module_ref: String,
    #[serde(rename = "classname")]
    pub impl_name: String,
    pub version: String,
    pub status: AgentStatus,
    #[serde(default)]
    pub default_params: Params,
}

impl AgentManifestEntry {
    pub fn new(
        id: impl Into<String>,
        module_ref: impl Into<String>,
        impl_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            module_ref: module_ref.into(),
            impl_name: impl_name.into(),
            version: version.into(),
            status: AgentStatus::Active,
            default_params: Params::new(),
        }
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_uses_manifest_field_names() {
        let entry = AgentManifestEntry::new("SlackAPI", "tools.slack_api", "SlackAPI", "0.1.0")
            .with_status(AgentStatus::Beta);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["module"], "tools.slack_api");
        assert_eq!(json["classname"], "SlackAPI");
        assert_eq!(json["status"], "beta");
        assert!(json.get("module_ref").is_none());
    }

    #[test]
    fn only_deprecated_is_unresolvable() {
        assert!(AgentStatus::Active.is_resolvable());
        assert!(AgentStatus::Beta.is_resolvable());
        assert!(!AgentStatus::Deprecated.is_resolvable());
    }
}
