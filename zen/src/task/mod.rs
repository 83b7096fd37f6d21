//! Task directories
//!
//! A task directory holds a `manifest.yaml` describing the task, optional
//! external-source snapshots under `metadata/`, and the artifacts rendered
//! into it from template assets.

pub mod external;
pub mod manifest;
pub mod renderer;
pub mod suggest;

pub use external::{ExternalSnapshot, ExternalTask};
pub use manifest::{Priority, TaskManifest, TaskStatus, TaskType, WorkflowState};
pub use renderer::{CommandCatalog, RenderOutcome, RenderRequest, TaskRenderer};
