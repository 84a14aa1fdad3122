// ABOUTME: Hot-swappable agent registry resolving agent ids to Tool instances through the manifest.
// ABOUTME: Resolutions are cached per id; upgrade rewrites the manifest and evicts only that id.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use aegis_core::{AgentManifestEntry, AgentStatus};
use aegis_store::{ManifestError, ManifestSource};
use tokio::sync::{Mutex, MutexGuard};

use crate::tool::Tool;

/// How long `get`/`upgrade` wait for the registry lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur while resolving or upgrading agents.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("agent '{0}' not found/available")]
    NotFound(String),

    #[error("agent '{agent_id}' references unregistered implementation {module_ref}.{impl_name}")]
    Resolution {
        agent_id: String,
        module_ref: String,
        impl_name: String,
    },

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("timed out after {0:?} waiting for the registry lock")]
    Timeout(Duration),
}

/// Builds a tool instance from its manifest entry.
pub type ToolFactory = Arc<dyn Fn(&AgentManifestEntry) -> Arc<dyn Tool> + Send + Sync>;

/// Startup-time table mapping implementation references (`module`,
/// `classname`) to factories.
#[derive(Clone, Default)]
pub struct ImplementationTable {
    factories: HashMap<(String, String), ToolFactory>,
}

impl ImplementationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, module_ref: &str, impl_name: &str, factory: F) -> &mut Self
    where
        F: Fn(&AgentManifestEntry) -> Arc<dyn Tool> + Send + Sync + 'static,
    {
        self.factories.insert(
            (module_ref.to_string(), impl_name.to_string()),
            Arc::new(factory),
        );
        self
    }

    pub fn contains(&self, module_ref: &str, impl_name: &str) -> bool {
        self.factories
            .contains_key(&(module_ref.to_string(), impl_name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    fn instantiate(&self, entry: &AgentManifestEntry) -> Option<Arc<dyn Tool>> {
        self.factories
            .get(&(entry.module_ref.clone(), entry.impl_name.clone()))
            .map(|factory| factory(entry))
    }
}

impl fmt::Debug for ImplementationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .factories
            .keys()
            .map(|(m, c)| format!("{m}.{c}"))
            .collect();
        keys.sort();
        f.debug_struct("ImplementationTable")
            .field("implementations", &keys)
            .finish()
    }
}

/// A resolved agent: the tool instance and the manifest entry it was built from.
#[derive(Clone)]
pub struct Resolved {
    pub tool: Arc<dyn Tool>,
    pub entry: AgentManifestEntry,
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolved")
            .field("tool", &self.tool.name())
            .field("entry", &self.entry)
            .finish()
    }
}

/// Lazily resolves agent ids against the manifest. Cache and manifest IO
/// share one lock, acquired with a bounded wait.
pub struct AgentRegistry {
    manifest: Arc<dyn ManifestSource>,
    table: ImplementationTable,
    cache: Mutex<HashMap<String, Resolved>>,
    lock_timeout: Duration,
}

impl AgentRegistry {
    pub fn new(manifest: Arc<dyn ManifestSource>, table: ImplementationTable) -> Self {
        Self {
            manifest,
            table,
            cache: Mutex::new(HashMap::new()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    async fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Resolved>>, RegistryError> {
        tokio::time::timeout(self.lock_timeout, self.cache.lock())
            .await
            .map_err(|_| RegistryError::Timeout(self.lock_timeout))
    }

    /// Resolve `agent_id`. Cached ids return the same instance without
    /// reading the manifest; uncached ids read it exactly once.
    pub async fn get(&self, agent_id: &str) -> Result<Resolved, RegistryError> {
        let mut cache = self.lock().await?;
        if let Some(resolved) = cache.get(agent_id) {
            tracing::debug!(agent_id, "registry cache hit");
            return Ok(resolved.clone());
        }

        let entry = self
            .manifest
            .load()?
            .into_iter()
            .find(|e| e.id == agent_id)
            .filter(|e| e.status.is_resolvable())
            .ok_or_else(|| RegistryError::NotFound(agent_id.to_string()))?;

        let tool = self
            .table
            .instantiate(&entry)
            .ok_or_else(|| RegistryError::Resolution {
                agent_id: agent_id.to_string(),
                module_ref: entry.module_ref.clone(),
                impl_name: entry.impl_name.clone(),
            })?;

        tracing::info!(
            agent_id,
            version = %entry.version,
            implementation = %format!("{}.{}", entry.module_ref, entry.impl_name),
            "agent resolved"
        );
        let resolved = Resolved { tool, entry };
        cache.insert(agent_id.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// Point `agent_id` at a new version (and optionally a new
    /// implementation), persist the manifest, and evict the cached instance.
    /// Unknown ids are added as active entries.
    pub async fn upgrade(
        &self,
        agent_id: &str,
        new_version: &str,
        new_module: Option<&str>,
        new_impl: Option<&str>,
    ) -> Result<AgentManifestEntry, RegistryError> {
        let mut cache = self.lock().await?;
        let mut entries = self.manifest.load()?;

        let idx = match entries.iter().position(|e| e.id == agent_id) {
            Some(idx) => idx,
            None => {
                entries.push(AgentManifestEntry::new(
                    agent_id,
                    new_module.unwrap_or_default(),
                    new_impl.unwrap_or_default(),
                    new_version,
                ));
                entries.len() - 1
            }
        };

        let entry = &mut entries[idx];
        entry.version = new_version.to_string();
        if let Some(module) = new_module {
            entry.module_ref = module.to_string();
        }
        if let Some(impl_name) = new_impl {
            entry.impl_name = impl_name.to_string();
        }
        let updated = entry.clone();

        self.manifest.save(&entries)?;
        cache.remove(agent_id);

        tracing::info!(agent_id, version = new_version, "agent upgraded");
        Ok(updated)
    }

    /// Manifest entries, optionally filtered by status.
    pub async fn list(
        &self,
        status: Option<AgentStatus>,
    ) -> Result<Vec<AgentManifestEntry>, RegistryError> {
        let _guard = self.lock().await?;
        let entries = self.manifest.load()?;
        Ok(match status {
            Some(status) => entries.into_iter().filter(|e| e.status == status).collect(),
            None => entries,
        })
    }

    pub async fn is_cached(&self, agent_id: &str) -> Result<bool, RegistryError> {
        Ok(self.lock().await?.contains_key(agent_id))
    }

    /// Drop a cached resolution so the next `get` re-reads the manifest.
    pub async fn evict(&self, agent_id: &str) -> Result<bool, RegistryError> {
        Ok(self.lock().await?.remove(agent_id).is_some())
    }
}
