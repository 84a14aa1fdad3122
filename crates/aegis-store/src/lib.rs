// ABOUTME: Persistence layer for aegis, covering the agent manifest and variant feedback.
// ABOUTME: Provides a YAML-backed ManifestSource and a SQLite-backed FeedbackStore.

pub mod feedback;
pub mod manifest;

pub use feedback::{FeedbackError, FeedbackStore};
pub use manifest::{ManifestError, ManifestSource, YamlManifest, parse_manifest};
