//! Workflow template schema shared by the catalog and the orchestrator.
//!
//! Templates are authored once (in code or YAML) and instantiated many times.
//! The schema intentionally preserves authoring order via `IndexMap` so
//! instantiated step lists run in the sequence the author wrote them.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named, reusable sequence of tool steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// Canonical template identifier used for lookups.
    pub name: String,
    /// Optional human-readable title.
    #[serde(default)]
    pub title: Option<String>,
    /// Optional descriptive copy.
    #[serde(default)]
    pub description: Option<String>,
    /// Runtime parameters the template accepts, keyed by parameter name.
    #[serde(default)]
    pub parameters: IndexMap<String, TemplateParameter>,
    /// Ordered steps executed sequentially.
    #[serde(default)]
    pub steps: Vec<TemplateStep>,
}

/// Declares one runtime parameter of a template.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TemplateParameter {
    /// Descriptive text explaining the purpose of the parameter.
    #[serde(default)]
    pub description: Option<String>,
    /// When true, instantiation fails if the caller omits the parameter and
    /// no default is declared.
    #[serde(default)]
    pub required: bool,
    /// Value used when the caller omits the parameter.
    #[serde(default)]
    pub default: Option<Value>,
}

/// A single authored step inside a template.
///
/// `params` may contain `${{ params.* }}` expressions substituted at
/// instantiation time, and `${{ steps.* }}` / `${{ scratch.* }}` expressions
/// resolved by the orchestrator once earlier steps have produced output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateStep {
    /// Step name, unique within the template.
    pub name: String,
    /// Remote tool the step invokes.
    pub tool: String,
    /// Parameter template passed to the tool.
    #[serde(default)]
    pub params: Value,
    /// Present when the tool returns a job handle instead of a final result.
    #[serde(default)]
    pub poll: Option<PollSpec>,
    /// Side-channel captures applied on success: scratch key -> payload path.
    #[serde(default)]
    pub captures: IndexMap<String, String>,
}

/// Polling configuration for an asynchronous step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSpec {
    /// Status tool polled until the job reaches a terminal phase.
    pub status_tool: String,
    /// Payload field of the start call that carries the job handle.
    #[serde(default = "default_handle_field")]
    pub handle_field: String,
    /// Poll interval in seconds; the orchestrator's default applies when
    /// absent.
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

fn default_handle_field() -> String {
    "job_id".to_string()
}

/// An instantiated step ready for execution.
///
/// Produced by the catalog with runtime parameters already substituted;
/// `steps.*` and `scratch.*` references remain deferred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStepSpec {
    /// Step name, unique within the workflow.
    pub name: String,
    /// Remote tool the step invokes.
    pub tool: String,
    /// Parameter template with runtime values applied.
    #[serde(default)]
    pub params: Value,
    /// Polling configuration carried over from the template.
    #[serde(default)]
    pub poll: Option<PollSpec>,
    /// Side-channel captures carried over from the template.
    #[serde(default)]
    pub captures: IndexMap<String, String>,
}

impl WorkflowStepSpec {
    /// Builds a plain synchronous step.
    pub fn new(name: impl Into<String>, tool: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            tool: tool.into(),
            params,
            poll: None,
            captures: IndexMap::new(),
        }
    }
}

/// Per-step execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet attempted.
    #[default]
    Pending,
    /// Currently executing.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Exhausted its retry budget.
    Failed,
}

impl StepStatus {
    /// Whether the step will not be attempted again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Aggregate workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created but not started.
    #[default]
    Pending,
    /// At least one step is executing or waiting to execute.
    InProgress,
    /// Every step completed.
    Completed,
    /// No step completed and at least one failed.
    Failed,
    /// At least one step completed and a later step permanently failed.
    PartiallyCompleted,
}

impl WorkflowStatus {
    /// Whether the workflow has finished and its state is now immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::PartiallyCompleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_yaml_template() {
        let yaml = r#"
name: site_audit
title: Site audit
parameters:
  url:
    required: true
    description: Base URL to crawl
steps:
  - name: crawl
    tool: crawlWebsite
    params:
      url: "${{ params.url }}"
      max_pages: 10
    poll:
      status_tool: getCrawlStatus
  - name: summarize
    tool: startThinking
    params:
      problem: "Summarize the crawl"
      context: "${{ steps.crawl.output }}"
    captures:
      thinking_session: session_id
"#;
        let template: WorkflowTemplate = serde_yaml::from_str(yaml).expect("parse template");
        assert_eq!(template.name, "site_audit");
        assert!(template.parameters["url"].required);
        assert_eq!(template.steps.len(), 2);

        let crawl = &template.steps[0];
        let poll = crawl.poll.as_ref().expect("poll spec");
        assert_eq!(poll.status_tool, "getCrawlStatus");
        assert_eq!(poll.handle_field, "job_id");

        let summarize = &template.steps[1];
        assert_eq!(summarize.captures["thinking_session"], "session_id");
    }

    #[test]
    fn statuses_report_terminality() {
        assert!(StepStatus::Completed.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert!(!StepStatus::InProgress.is_terminal());
        assert!(WorkflowStatus::PartiallyCompleted.is_terminal());
        assert!(!WorkflowStatus::InProgress.is_terminal());
    }
}
