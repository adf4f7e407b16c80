//! Workflow orchestration over the remote tool client.
//!
//! The engine turns named step sequences into finished
//! [`state::WorkflowState`]s: the [`catalog::WorkflowCatalog`] instantiates
//! reusable templates, [`resolve`] substitutes `${{ ... }}` parameter
//! references, and the [`orchestrator::WorkflowOrchestrator`] executes steps
//! strictly in order with per-step retry, side-channel value passing, and
//! transparent polling for asynchronous tools.

pub mod catalog;
pub mod orchestrator;
pub mod resolve;
pub mod state;

pub use catalog::{CatalogError, WorkflowCatalog};
pub use orchestrator::{OrchestratorConfig, WorkflowOrchestrator};
pub use resolve::{
    RunContext, apply_runtime_parameters, extract_template_expressions,
    find_unresolved_references, interpolate_value, lookup_path,
};
pub use state::{WorkflowState, WorkflowStep};
