//! Mutable run state for an executing workflow.
//!
//! A [`WorkflowState`] is created when a caller requests execution, mutated
//! only by the orchestrator while it runs, and returned to the caller once
//! the aggregate status is terminal. The orchestrator does not retain it.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use opsflow_types::{ErrorDescriptor, PollSpec, StepStatus, WorkflowStatus, WorkflowStepSpec};

use crate::resolve::RunContext;

/// One named unit of work inside a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step name, unique within the workflow.
    pub name: String,
    /// Remote tool the step invokes.
    pub tool: String,
    /// Parameter template, resolved against the run context at execution
    /// time.
    pub params: Value,
    /// Polling configuration when the step is asynchronous.
    pub poll: Option<PollSpec>,
    /// Side-channel captures applied on success: scratch key -> payload path.
    pub captures: IndexMap<String, String>,
    /// Current execution status.
    pub status: StepStatus,
    /// Result payload once the step completed.
    pub result: Option<Value>,
    /// Classified error once the step terminally failed.
    pub error: Option<ErrorDescriptor>,
    /// Retries consumed; never exceeds the orchestrator's per-step maximum.
    pub retry_count: u32,
}

impl WorkflowStep {
    /// Builds a pending step from its instantiated spec.
    pub fn from_spec(spec: WorkflowStepSpec) -> Self {
        Self {
            name: spec.name,
            tool: spec.tool,
            params: spec.params,
            poll: spec.poll,
            captures: spec.captures,
            status: StepStatus::Pending,
            result: None,
            error: None,
            retry_count: 0,
        }
    }
}

/// Aggregate state of one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Identifier of this execution.
    pub workflow_id: String,
    /// Ordered steps; execution is strictly sequential.
    pub steps: Vec<WorkflowStep>,
    /// Index of the step currently (or last) being executed.
    pub current_step: usize,
    /// Aggregate status.
    pub status: WorkflowStatus,
    /// Results of completed steps, keyed by step name.
    pub results: IndexMap<String, Value>,
    /// Workflow-scoped side-channel values written by steps.
    pub scratch: IndexMap<String, Value>,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When the aggregate status became terminal.
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    /// Creates a pending state for the given step list.
    pub fn new(workflow_id: impl Into<String>, specs: Vec<WorkflowStepSpec>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            steps: specs.into_iter().map(WorkflowStep::from_spec).collect(),
            current_step: 0,
            status: WorkflowStatus::Pending,
            results: IndexMap::new(),
            scratch: IndexMap::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Looks a step up by name.
    pub fn step(&self, name: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|step| step.name == name)
    }

    /// Builds the template-resolution context from the values accumulated so
    /// far.
    pub(crate) fn run_context(&self) -> RunContext {
        let mut context = RunContext::default();
        for (name, payload) in &self.results {
            context.steps.insert(name.clone(), payload.clone());
        }
        for (key, value) in &self.scratch {
            context.scratch.insert(key.clone(), value.clone());
        }
        context
    }

    /// Computes the aggregate status from per-step statuses.
    ///
    /// Completed iff every step completed (vacuously true for an empty
    /// list); PartiallyCompleted iff at least one step completed and at
    /// least one failed; Failed iff the list is non-empty, none completed,
    /// and at least one failed.
    pub fn compute_aggregate(&self) -> WorkflowStatus {
        let completed = self
            .steps
            .iter()
            .filter(|step| step.status == StepStatus::Completed)
            .count();
        let failed = self
            .steps
            .iter()
            .filter(|step| step.status == StepStatus::Failed)
            .count();

        if completed == self.steps.len() {
            WorkflowStatus::Completed
        } else if completed > 0 && failed > 0 {
            WorkflowStatus::PartiallyCompleted
        } else if failed > 0 {
            WorkflowStatus::Failed
        } else if self
            .steps
            .iter()
            .any(|step| step.status != StepStatus::Pending)
        {
            WorkflowStatus::InProgress
        } else {
            WorkflowStatus::Pending
        }
    }

    /// Seals the state with its terminal status.
    pub(crate) fn mark_finished(&mut self, status: WorkflowStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}
