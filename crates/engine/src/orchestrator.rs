//! Sequential workflow execution.
//!
//! The orchestrator drives an ordered step list against the remote tool
//! client, one step at a time: step N+1 never starts before step N reaches a
//! terminal per-step status, because later steps may reference earlier
//! steps' outputs. A failed step is retried in place with exponential
//! backoff — a second retry layer stacked on top of the client's per-call
//! retries — and once its budget is exhausted the remaining steps stay
//! Pending.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use opsflow_client::{JobPoller, RemoteToolClient, RetryConfig};
use opsflow_types::{
    ErrorDescriptor, PollSpec, StepStatus, ToolInvocation, ToolResult, WorkflowStatus,
    WorkflowStepSpec,
};

use crate::catalog::{CatalogError, WorkflowCatalog};
use crate::resolve::{find_unresolved_references, interpolate_value, lookup_path};
use crate::state::WorkflowState;

/// Orchestrator configuration, supplied by the caller's settings layer.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Per-step retry budget and backoff schedule. `max_attempts` bounds the
    /// total tries of one step, including the first.
    pub step_retry: RetryConfig,
    /// Default interval between job status polls; a step's poll spec may
    /// override it.
    pub poll_interval: Duration,
    /// Deadline for a single asynchronous step's polling phase.
    pub poll_deadline: Duration,
    /// Deadline handed to the client for each synchronous invocation.
    pub call_deadline: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            step_retry: RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                multiplier: 2.0,
            },
            poll_interval: Duration::from_secs(2),
            poll_deadline: Duration::from_secs(300),
            call_deadline: Duration::from_secs(30),
        }
    }
}

enum StepOutcome {
    Completed,
    Failed,
    Cancelled,
}

enum Attempt {
    Result(ToolResult),
    Cancelled,
}

/// Executes workflows step by step against the remote tool client.
pub struct WorkflowOrchestrator {
    client: Arc<RemoteToolClient>,
    poller: JobPoller,
    config: OrchestratorConfig,
}

impl WorkflowOrchestrator {
    /// Wires the orchestrator to its client; asynchronous steps go through a
    /// poller sharing the same client.
    pub fn new(client: Arc<RemoteToolClient>, config: OrchestratorConfig) -> Self {
        let poller = JobPoller::new(client.clone());
        Self {
            client,
            poller,
            config,
        }
    }

    /// Executes an ad-hoc step list to completion.
    pub async fn execute(
        &self,
        workflow_id: impl Into<String>,
        specs: Vec<WorkflowStepSpec>,
    ) -> WorkflowState {
        self.execute_with_cancellation(workflow_id, specs, CancellationToken::new())
            .await
    }

    /// Instantiates a catalog template and executes it.
    pub async fn execute_template(
        &self,
        catalog: &WorkflowCatalog,
        template_name: &str,
        runtime_params: &Map<String, Value>,
    ) -> Result<WorkflowState, CatalogError> {
        let specs = catalog.instantiate(template_name, runtime_params)?;
        let workflow_id = format!("{template_name}-{}", Utc::now().timestamp_millis());
        Ok(self.execute(workflow_id, specs).await)
    }

    /// Executes a step list, honoring the caller's cancellation signal.
    ///
    /// Cancellation is checked between steps and raced against long poll
    /// waits. An interrupted step keeps its current per-step status — the
    /// remote operation may still be progressing — and the aggregate becomes
    /// PartiallyCompleted when anything had already completed, otherwise
    /// Failed.
    pub async fn execute_with_cancellation(
        &self,
        workflow_id: impl Into<String>,
        specs: Vec<WorkflowStepSpec>,
        cancel: CancellationToken,
    ) -> WorkflowState {
        let mut state = WorkflowState::new(workflow_id, specs);
        state.status = WorkflowStatus::InProgress;
        info!(
            workflow = %state.workflow_id,
            steps = state.steps.len(),
            "workflow started"
        );

        let mut cancelled = false;
        for index in 0..state.steps.len() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            state.current_step = index;
            match self.run_step(&mut state, index, &cancel).await {
                StepOutcome::Completed => {}
                StepOutcome::Failed => break,
                StepOutcome::Cancelled => {
                    cancelled = true;
                    break;
                }
            }
        }

        let status = if cancelled {
            warn!(workflow = %state.workflow_id, "workflow cancelled");
            if state
                .steps
                .iter()
                .any(|step| step.status == StepStatus::Completed)
            {
                WorkflowStatus::PartiallyCompleted
            } else {
                WorkflowStatus::Failed
            }
        } else {
            state.compute_aggregate()
        };
        state.mark_finished(status);
        info!(
            workflow = %state.workflow_id,
            status = ?state.status,
            "workflow finished"
        );
        state
    }

    async fn run_step(
        &self,
        state: &mut WorkflowState,
        index: usize,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        state.steps[index].status = StepStatus::InProgress;
        let context = state.run_context();
        let (name, tool, params_template, poll, captures) = {
            let step = &state.steps[index];
            (
                step.name.clone(),
                step.tool.clone(),
                step.params.clone(),
                step.poll.clone(),
                step.captures.clone(),
            )
        };
        info!(step = %name, tool = %tool, "step started");

        // A dangling reference is a caller bug; fail before any remote call.
        let unresolved = find_unresolved_references(&params_template, &context);
        if !unresolved.is_empty() {
            return self.fail_step(
                state,
                index,
                ErrorDescriptor::validation(format!(
                    "unresolved references in step parameters: {}",
                    unresolved.join(", ")
                )),
            );
        }

        let arguments = match interpolate_value(&params_template, &context) {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return self.fail_step(
                    state,
                    index,
                    ErrorDescriptor::validation(format!(
                        "step parameters must resolve to an object, got {other}"
                    )),
                );
            }
        };
        let invocation = ToolInvocation::new(tool, arguments);

        let max_tries = self.config.step_retry.max_attempts.max(1);
        let mut tries: u32 = 0;
        loop {
            tries += 1;
            let attempt = self
                .attempt_step(&name, &invocation, poll.as_ref(), state, cancel)
                .await;

            let result = match attempt {
                Attempt::Cancelled => return StepOutcome::Cancelled,
                Attempt::Result(result) => result,
            };

            if result.is_success() {
                let payload = result.payload.unwrap_or(Value::Null);
                self.apply_captures(state, &name, &captures, &payload);
                state.results.insert(name.clone(), payload.clone());
                let step = &mut state.steps[index];
                step.result = Some(payload);
                step.status = StepStatus::Completed;
                info!(step = %name, tries, "step completed");
                return StepOutcome::Completed;
            }

            let descriptor = result
                .error
                .unwrap_or_else(|| ErrorDescriptor::tool_execution("step failed without detail"));

            if tries >= max_tries {
                return self.fail_step(state, index, descriptor);
            }

            let delay = self.config.step_retry.delay_for_attempt(tries - 1);
            warn!(
                step = %name,
                attempt = tries,
                ?delay,
                error = %descriptor,
                "step failed; retrying in place"
            );
            state.steps[index].retry_count += 1;
            tokio::time::sleep(delay).await;
            if cancel.is_cancelled() {
                return StepOutcome::Cancelled;
            }
        }
    }

    /// Runs one try of a step: the invocation itself, plus the polling phase
    /// when the step is asynchronous.
    async fn attempt_step(
        &self,
        step_name: &str,
        invocation: &ToolInvocation,
        poll: Option<&PollSpec>,
        state: &mut WorkflowState,
        cancel: &CancellationToken,
    ) -> Attempt {
        let start = tokio::select! {
            _ = cancel.cancelled() => return Attempt::Cancelled,
            result = self.client.invoke(invocation, self.config.call_deadline) => result,
        };

        let Some(poll) = poll else {
            return Attempt::Result(start);
        };
        if !start.is_success() {
            return Attempt::Result(start);
        }

        let payload = start.payload.clone().unwrap_or(Value::Null);
        let Some(handle_value) = lookup_path(&payload, &poll.handle_field) else {
            return Attempt::Result(ToolResult::failure(
                &invocation.tool_name,
                ErrorDescriptor::tool_execution(format!(
                    "start payload is missing the job handle field '{}'",
                    poll.handle_field
                )),
                start.attempts,
            ));
        };
        let handle = match handle_value {
            Value::String(text) => text,
            other => other.to_string(),
        };

        // The handle is a workflow-scoped side-channel value: keep it
        // available to later steps even if this one is cancelled mid-poll.
        state
            .scratch
            .insert(format!("{step_name}_job"), Value::String(handle.clone()));
        debug!(step = %step_name, job = %handle, "job started; polling for completion");

        let interval = poll
            .interval_secs
            .map(Duration::from_secs)
            .unwrap_or(self.config.poll_interval);
        tokio::select! {
            _ = cancel.cancelled() => Attempt::Cancelled,
            result = self.poller.await_completion(
                &handle,
                &poll.status_tool,
                interval,
                self.config.poll_deadline,
            ) => Attempt::Result(result),
        }
    }

    fn apply_captures(
        &self,
        state: &mut WorkflowState,
        step_name: &str,
        captures: &indexmap::IndexMap<String, String>,
        payload: &Value,
    ) {
        for (key, path) in captures {
            match lookup_path(payload, path) {
                Some(value) => {
                    debug!(step = %step_name, key = %key, "captured side-channel value");
                    state.scratch.insert(key.clone(), value);
                }
                None => warn!(
                    step = %step_name,
                    key = %key,
                    path = %path,
                    "capture path missing from step payload"
                ),
            }
        }
    }

    fn fail_step(
        &self,
        state: &mut WorkflowState,
        index: usize,
        descriptor: ErrorDescriptor,
    ) -> StepOutcome {
        let step = &mut state.steps[index];
        warn!(
            step = %step.name,
            retries = step.retry_count,
            error = %descriptor,
            "step failed; halting remaining steps"
        );
        step.status = StepStatus::Failed;
        step.error = Some(descriptor);
        StepOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use opsflow_client::{
        ClientConfig, Credential, StaticTokenProvider, ToolTransport, TransportReply,
    };
    use opsflow_types::ErrorCategory;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport that replays scripted replies and records every invocation.
    struct ScriptedTransport {
        replies: Mutex<VecDeque<TransportReply>>,
        invocations: Mutex<Vec<ToolInvocation>>,
        fallback: TransportReply,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<TransportReply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                invocations: Mutex::new(Vec::new()),
                fallback: TransportReply::ConnectionFailed {
                    message: "script exhausted".into(),
                },
            }
        }

        fn looping(reply: TransportReply) -> Self {
            Self {
                replies: Mutex::new(VecDeque::new()),
                invocations: Mutex::new(Vec::new()),
                fallback: reply,
            }
        }

        fn invocations(&self) -> Vec<ToolInvocation> {
            self.invocations.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ToolTransport for ScriptedTransport {
        async fn send(
            &self,
            invocation: &ToolInvocation,
            _credential: &Credential,
            _timeout: Duration,
        ) -> TransportReply {
            self.invocations.lock().unwrap().push(invocation.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone())
        }
    }

    fn orchestrator_with(transport: Arc<ScriptedTransport>) -> WorkflowOrchestrator {
        let client = RemoteToolClient::new(
            transport,
            Arc::new(StaticTokenProvider::new("token")),
            ClientConfig {
                call_timeout: Duration::from_secs(5),
                retry: RetryConfig {
                    max_attempts: 1,
                    base_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(10),
                    multiplier: 2.0,
                },
            },
        );
        WorkflowOrchestrator::new(
            Arc::new(client),
            OrchestratorConfig {
                step_retry: RetryConfig {
                    max_attempts: 2,
                    base_delay: Duration::from_millis(5),
                    max_delay: Duration::from_millis(50),
                    multiplier: 2.0,
                },
                poll_interval: Duration::from_millis(10),
                poll_deadline: Duration::from_secs(5),
                call_deadline: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn two_step_workflow_completes_with_both_results() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            TransportReply::Success(json!({"tables": ["sales"]})),
            TransportReply::Success(json!({"rows": [1, 2]})),
        ]));
        let orchestrator = orchestrator_with(transport);

        let state = orchestrator
            .execute(
                "wf-1",
                vec![
                    WorkflowStepSpec::new("list", "listTables", json!({})),
                    WorkflowStepSpec::new("fetch", "queryDatabase", json!({"sql": "SELECT 1"})),
                ],
            )
            .await;

        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.results["list"], json!({"tables": ["sales"]}));
        assert_eq!(state.results["fetch"], json!({"rows": [1, 2]}));
        assert!(state.finished_at.is_some());
    }

    #[tokio::test]
    async fn failing_middle_step_halts_and_leaves_rest_pending() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            TransportReply::Success(json!({"ok": true})),
            TransportReply::ToolFailure {
                message: "downstream dead".into(),
            },
            TransportReply::ToolFailure {
                message: "downstream dead".into(),
            },
        ]));
        let orchestrator = orchestrator_with(transport.clone());

        let state = orchestrator
            .execute(
                "wf-2",
                vec![
                    WorkflowStepSpec::new("first", "listTables", json!({})),
                    WorkflowStepSpec::new("second", "queryDatabase", json!({"sql": "SELECT 1"})),
                    WorkflowStepSpec::new("third", "sendEmail", json!({"to": "a@b.test"})),
                ],
            )
            .await;

        assert_eq!(state.status, WorkflowStatus::PartiallyCompleted);
        assert_eq!(state.steps[0].status, StepStatus::Completed);
        assert_eq!(state.steps[1].status, StepStatus::Failed);
        assert_eq!(state.steps[1].retry_count, 1);
        let error = state.steps[1].error.as_ref().expect("step error recorded");
        assert_eq!(error.category, ErrorCategory::ToolExecution);
        assert_eq!(state.steps[2].status, StepStatus::Pending);
        // The halted step was never attempted.
        assert_eq!(transport.invocations().len(), 3);
    }

    #[tokio::test]
    async fn later_steps_see_earlier_outputs_and_captures() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            TransportReply::Success(json!({"session_id": "s-7", "rows": [{"revenue": 12}]})),
            TransportReply::Success(json!({"thought_recorded": true})),
        ]));
        let orchestrator = orchestrator_with(transport.clone());

        let mut first = WorkflowStepSpec::new("fetch", "startThinking", json!({"problem": "p"}));
        first
            .captures
            .insert("thinking_session".into(), "session_id".into());
        let second = WorkflowStepSpec::new(
            "thought",
            "addThought",
            json!({
                "session_id": "${{ scratch.thinking_session }}",
                "thought": "revenue was ${{ steps.fetch.rows.0.revenue }}"
            }),
        );

        let state = orchestrator.execute("wf-3", vec![first, second]).await;

        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.scratch["thinking_session"], json!("s-7"));

        let sent = transport.invocations();
        assert_eq!(sent[1].arguments["session_id"], json!("s-7"));
        assert_eq!(sent[1].arguments["thought"], json!("revenue was 12"));
    }

    #[tokio::test]
    async fn asynchronous_step_polls_job_to_completion() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            TransportReply::Success(json!({"job_id": "job-11"})),
            TransportReply::Success(json!({"status": "in_progress", "progress": 50})),
            TransportReply::Success(json!({
                "status": "completed",
                "results": [{"url": "https://competitor.test/pricing"}]
            })),
        ]));
        let orchestrator = orchestrator_with(transport.clone());

        let mut crawl = WorkflowStepSpec::new(
            "crawl",
            "crawlWebsite",
            json!({"url": "https://competitor.test", "max_pages": 5}),
        );
        crawl.poll = Some(PollSpec {
            status_tool: "getCrawlStatus".into(),
            handle_field: "job_id".into(),
            interval_secs: None,
        });

        let state = orchestrator.execute("wf-4", vec![crawl]).await;

        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.scratch["crawl_job"], json!("job-11"));
        assert_eq!(
            state.results["crawl"],
            json!([{"url": "https://competitor.test/pricing"}])
        );
        // Start call plus two status polls, all addressed to the right tools.
        let sent = transport.invocations();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].tool_name, "crawlWebsite");
        assert_eq!(sent[1].tool_name, "getCrawlStatus");
        assert_eq!(sent[1].arguments["job_id"], json!("job-11"));
    }

    #[tokio::test]
    async fn dangling_reference_fails_validation_without_network() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let orchestrator = orchestrator_with(transport.clone());

        let state = orchestrator
            .execute(
                "wf-5",
                vec![WorkflowStepSpec::new(
                    "broken",
                    "sendEmail",
                    json!({"body": "${{ steps.missing.solution }}"}),
                )],
            )
            .await;

        assert_eq!(state.status, WorkflowStatus::Failed);
        let error = state.steps[0].error.as_ref().expect("validation error");
        assert_eq!(error.category, ErrorCategory::Validation);
        assert!(error.message.contains("steps.missing.solution"));
        assert!(transport.invocations().is_empty());
    }

    #[tokio::test]
    async fn pre_cancelled_token_runs_nothing() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let orchestrator = orchestrator_with(transport.clone());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let state = orchestrator
            .execute_with_cancellation(
                "wf-6",
                vec![WorkflowStepSpec::new("only", "listTables", json!({}))],
                cancel,
            )
            .await;

        assert_eq!(state.status, WorkflowStatus::Failed);
        assert_eq!(state.steps[0].status, StepStatus::Pending);
        assert!(transport.invocations().is_empty());
    }

    #[tokio::test]
    async fn cancellation_during_poll_leaves_step_in_progress() {
        let transport = Arc::new(ScriptedTransport::looping(TransportReply::Success(
            json!({"status": "in_progress", "progress": 1}),
        )));
        {
            // First reply starts the job; everything after reports progress.
            let mut replies = transport.replies.lock().unwrap();
            replies.push_back(TransportReply::Success(json!({"ok": true})));
            replies.push_back(TransportReply::Success(json!({"job_id": "job-5"})));
        }
        let orchestrator = orchestrator_with(transport);

        let first = WorkflowStepSpec::new("warmup", "listTables", json!({}));
        let mut crawl = WorkflowStepSpec::new(
            "crawl",
            "crawlWebsite",
            json!({"url": "https://slow.test"}),
        );
        crawl.poll = Some(PollSpec {
            status_tool: "getCrawlStatus".into(),
            handle_field: "job_id".into(),
            interval_secs: None,
        });

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            trigger.cancel();
        });

        let state = orchestrator
            .execute_with_cancellation("wf-7", vec![first, crawl], cancel)
            .await;

        assert_eq!(state.status, WorkflowStatus::PartiallyCompleted);
        assert_eq!(state.steps[0].status, StepStatus::Completed);
        // Not force-marked Failed: the remote job may still be progressing.
        assert_eq!(state.steps[1].status, StepStatus::InProgress);
        assert_eq!(state.scratch["crawl_job"], json!("job-5"));
    }

    #[tokio::test]
    async fn empty_step_list_completes_vacuously() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let orchestrator = orchestrator_with(transport);

        let state = orchestrator.execute("wf-8", Vec::new()).await;
        assert_eq!(state.status, WorkflowStatus::Completed);
    }
}
