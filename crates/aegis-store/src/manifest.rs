// ABOUTME: Manifest Store: reads and writes the declarative agent manifest as a YAML sequence.
// ABOUTME: Writes go through a temp file and rename so a crash never leaves a truncated manifest.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use aegis_core::AgentManifestEntry;
use thiserror::Error;

/// Errors that can occur while reading or writing the manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("missing agent manifest {0}")]
    Missing(PathBuf),

    #[error("manifest io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("duplicate agent id in manifest: {0}")]
    DuplicateId(String),
}

/// Storage backend for the agent manifest. The registry reads it on cache
/// misses and rewrites it on upgrades.
pub trait ManifestSource: Send + Sync {
    /// Load every entry, in file order.
    fn load(&self) -> Result<Vec<AgentManifestEntry>, ManifestError>;

    /// Replace the stored manifest with `entries`.
    fn save(&self, entries: &[AgentManifestEntry]) -> Result<(), ManifestError>;
}

/// Manifest backed by a YAML file on disk.
#[derive(Debug, Clone)]
pub struct YamlManifest {
    path: PathBuf,
}

impl YamlManifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parse manifest YAML. An empty document is an empty manifest.
pub fn parse_manifest(yaml: &str) -> Result<Vec<AgentManifestEntry>, ManifestError> {
    if yaml.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<AgentManifestEntry> = serde_yaml::from_str(yaml)?;
    let mut seen = HashSet::new();
    for entry in &entries {
        if !seen.insert(entry.id.as_str()) {
            return Err(ManifestError::DuplicateId(entry.id.clone()));
        }
    }
    Ok(entries)
}

impl ManifestSource for YamlManifest {
    fn load(&self) -> Result<Vec<AgentManifestEntry>, ManifestError> {
        if !self.path.exists() {
            return Err(ManifestError::Missing(self.path.clone()));
        }
        let yaml = fs::read_to_string(&self.path)?;
        let entries = parse_manifest(&yaml)?;
        tracing::debug!(path = %self.path.display(), entries = entries.len(), "manifest loaded");
        Ok(entries)
    }

    fn save(&self, entries: &[AgentManifestEntry]) -> Result<(), ManifestError> {
        let yaml = serde_yaml::to_string(entries)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("yaml.tmp");
        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(yaml.as_bytes())?;
        tmp_file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;

        tracing::info!(path = %self.path.display(), entries = entries.len(), "manifest saved");
        Ok(())
    }
}
