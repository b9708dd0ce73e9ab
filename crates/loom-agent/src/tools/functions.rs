//! Service-function tools backed by idempotent jobs.

use std::sync::Arc;

use async_trait::async_trait;
use loom_store::{CreateJobRequest, JobStore, Run, ToolDefinition, ToolDefinitionStore};
use serde_json::json;
use tracing::debug;

use crate::errors::ToolError;
use crate::summarizer::{ResultSummarizer, SummaryTarget};
use crate::tools::resolver::ToolResolver;
use crate::tools::tool::{AgentTool, ToolCall, ToolDescriptor, ToolResponse};

/// Builds tools whose execution creates a job keyed by the invocation id and
/// reports the job's current state. Calling the same invocation twice never
/// creates a second job.
#[derive(Clone)]
pub struct ServiceFunctionTools {
    jobs: Arc<dyn JobStore>,
    summarizer: Option<ResultSummarizer>,
}

impl ServiceFunctionTools {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self {
            jobs,
            summarizer: None,
        }
    }

    pub fn with_summarizer(mut self, summarizer: ResultSummarizer) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn build_tool(&self, definition: &ToolDefinition) -> AgentTool {
        let jobs = self.jobs.clone();
        let summarizer = self.summarizer.clone();
        let target_fn = definition.name.clone();
        AgentTool::new(
            ToolDescriptor::from_definition(definition),
            Arc::new(move |call: ToolCall| {
                let jobs = jobs.clone();
                let summarizer = summarizer.clone();
                let target_fn = target_fn.clone();
                Box::pin(async move {
                    execute_job(jobs.as_ref(), summarizer.as_ref(), &target_fn, call).await
                })
            }),
        )
    }
}

async fn execute_job(
    jobs: &dyn JobStore,
    summarizer: Option<&ResultSummarizer>,
    target_fn: &str,
    call: ToolCall,
) -> Result<String, ToolError> {
    let run = call.run.as_ref();
    let created = jobs
        .create_job(CreateJobRequest {
            cluster_id: run.cluster_id.clone(),
            run_id: Some(run.id.clone()),
            tool_call_id: Some(call.id.clone()),
            target_fn: target_fn.to_string(),
            target_args: call.input,
        })
        .await?;
    debug!(
        job_id = %created.id,
        created = created.created,
        invocation_id = %call.id,
        target_fn,
        "service function job"
    );

    let job = jobs
        .get_job(&run.cluster_id, &created.id)
        .await?
        .ok_or_else(|| ToolError::Execution("Could not find job for function call".to_string()))?;

    if job.status.is_waiting() {
        return ToolResponse::job_timeout(vec![job.id]).encode();
    }

    let (Some(result), Some(result_type)) = (job.result, job.result_type) else {
        return ToolResponse::rejection(json!({"message": "Job did not return a result."}), "failure")
            .encode();
    };

    let result = match summarizer {
        Some(summarizer) if run.enable_summarization => {
            summarizer
                .summarize_if_necessary(
                    result,
                    SummaryTarget {
                        cluster_id: &run.cluster_id,
                        run_id: &run.id,
                        target_fn,
                        purpose: None,
                    },
                )
                .await?
        }
        _ => result,
    };

    ToolResponse {
        result,
        result_type,
        status: job.status.as_str().to_string(),
    }
    .encode()
}

/// Resolves registered service functions by name.
pub struct ServiceFunctionResolver {
    definitions: Arc<dyn ToolDefinitionStore>,
    tools: ServiceFunctionTools,
}

impl ServiceFunctionResolver {
    pub fn new(definitions: Arc<dyn ToolDefinitionStore>, tools: ServiceFunctionTools) -> Self {
        Self { definitions, tools }
    }
}

#[async_trait]
impl ToolResolver for ServiceFunctionResolver {
    async fn resolve(&self, run: &Run, tool_name: &str) -> Result<Option<AgentTool>, ToolError> {
        Ok(self
            .definitions
            .get_tool_definition(&run.cluster_id, tool_name)
            .await?
            .map(|definition| self.tools.build_tool(&definition)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tool::{ToolOutcome, parse_tool_response};
    use loom_store::{JobStatus, MemoryStore, ResultType};
    use serde_json::Value;

    fn definition() -> ToolDefinition {
        ToolDefinition {
            name: "lookup".to_string(),
            description: Some("Looks things up".to_string()),
            schema: None,
        }
    }

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            input: json!({"q": "x"}),
            run: Arc::new(Run::new("cluster-1", "run-1")),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn pending_job_returns_job_timeout_and_is_created_once() {
        let store = Arc::new(MemoryStore::new());
        let tool = ServiceFunctionTools::new(store.clone()).build_tool(&definition());

        let first = tool.execute(call("inv-1")).await.expect("first");
        let second = tool.execute(call("inv-1")).await.expect("second");

        let jobs = store.jobs().expect("jobs");
        assert_eq!(jobs.len(), 1);
        let expected = ToolOutcome::JobTimeout {
            job_ids: vec![jobs[0].id.clone()],
        };
        assert_eq!(parse_tool_response(&first).expect("parse"), expected);
        assert_eq!(parse_tool_response(&second).expect("parse"), expected);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn completed_job_returns_its_result() {
        let store = Arc::new(MemoryStore::new());
        let tool = ServiceFunctionTools::new(store.clone()).build_tool(&definition());
        tool.execute(call("inv-1")).await.expect("create");
        let job_id = store.jobs().expect("jobs")[0].id.clone();
        store
            .complete_job("cluster-1", &job_id, Some(json!({"id": 7})), ResultType::Resolution)
            .expect("complete");

        let raw = tool.execute(call("inv-1")).await.expect("observe");
        assert_eq!(
            parse_tool_response(&raw).expect("parse"),
            ToolOutcome::Completed {
                result: json!({"id": 7}),
                result_type: ResultType::Resolution,
                status: "success".to_string(),
            }
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn finished_job_without_result_is_rejection() {
        let store = Arc::new(MemoryStore::new());
        let tool = ServiceFunctionTools::new(store.clone()).build_tool(&definition());
        tool.execute(call("inv-1")).await.expect("create");
        let job_id = store.jobs().expect("jobs")[0].id.clone();
        store
            .set_job_status("cluster-1", &job_id, JobStatus::Stalled)
            .expect("stall");

        let raw = tool.execute(call("inv-1")).await.expect("observe");
        let ToolOutcome::Completed {
            result,
            result_type,
            status,
        } = parse_tool_response(&raw).expect("parse")
        else {
            panic!("expected completed outcome");
        };
        assert_eq!(result_type, ResultType::Rejection);
        assert_eq!(status, "failure");
        assert_eq!(result["message"], Value::from("Job did not return a result."));
    }
}
