// ABOUTME: Test doubles for tools and manifests, shared by this crate and downstream test suites.
// ABOUTME: Provides recording, failing, error-result, and slow tools plus a load-counting manifest.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use aegis_core::{AgentManifestEntry, Params};
use aegis_store::{ManifestError, ManifestSource};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use crate::tool::{Tool, ToolError, error_result};

/// Records every invocation's params and answers with a fixed response.
pub struct RecordingTool {
    name: String,
    response: Params,
    calls: Mutex<Vec<Params>>,
}

impl RecordingTool {
    pub fn new(name: &str) -> Self {
        let mut response = Params::new();
        response.insert("status".into(), Value::String("ok".into()));
        response.insert("tool".into(), Value::String(name.to_string()));
        Self {
            name: name.to_string(),
            response,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_response(mut self, response: Params) -> Self {
        self.response = response;
        self
    }

    pub fn calls(&self) -> Vec<Params> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, params: Params) -> Result<Params, ToolError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(params);
        }
        Ok(self.response.clone())
    }
}

/// Always raises `ToolError::Failed`.
pub struct FailingTool {
    name: String,
    message: String,
}

impl FailingTool {
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, _params: Params) -> Result<Params, ToolError> {
        Err(ToolError::Failed(self.message.clone()))
    }
}

/// Returns successfully, but with an `error` key in the result.
pub struct ErrorResultTool {
    name: String,
    message: String,
}

impl ErrorResultTool {
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Tool for ErrorResultTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, _params: Params) -> Result<Params, ToolError> {
        Ok(error_result(self.message.clone()))
    }
}

/// Sleeps before answering; used to exercise invocation timeouts.
pub struct SlowTool {
    name: String,
    delay: Duration,
}

impl SlowTool {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
        }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, _params: Params) -> Result<Params, ToolError> {
        tokio::time::sleep(self.delay).await;
        let mut result = Params::new();
        result.insert("status".into(), Value::String("slow-ok".into()));
        Ok(result)
    }
}

/// In-memory manifest that counts loads and saves.
pub struct CountingManifest {
    entries: Mutex<Vec<AgentManifestEntry>>,
    loads: AtomicUsize,
    saves: AtomicUsize,
    load_delay: Option<Duration>,
    loaded: Notify,
}

impl CountingManifest {
    pub fn new(entries: Vec<AgentManifestEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            loads: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
            load_delay: None,
            loaded: Notify::new(),
        }
    }

    /// Block the calling thread for `delay` inside every load.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Resolves once a load has started.
    pub async fn wait_for_load(&self) {
        self.loaded.notified().await;
    }
}

impl ManifestSource for CountingManifest {
    fn load(&self) -> Result<Vec<AgentManifestEntry>, ManifestError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.loaded.notify_one();
        if let Some(delay) = self.load_delay {
            std::thread::sleep(delay);
        }
        Ok(self
            .entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default())
    }

    fn save(&self, entries: &[AgentManifestEntry]) -> Result<(), ManifestError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut stored) = self.entries.lock() {
            *stored = entries.to_vec();
        }
        Ok(())
    }
}
