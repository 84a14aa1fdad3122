// ABOUTME: Agent layer for aegis: the Tool contract and the hot-swappable agent registry.
// ABOUTME: Implementations are registered at startup and resolved lazily through the manifest.

pub mod registry;
pub mod stub;
pub mod testing;
pub mod tool;

pub use registry::{AgentRegistry, ImplementationTable, RegistryError, Resolved, ToolFactory};
pub use stub::{StubTool, register_stubs};
pub use tool::{Tool, ToolError};
