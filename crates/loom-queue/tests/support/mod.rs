#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use loom_agent::{RunProcessor, Stores};
use loom_llm::{
    CallInput, CallOutput, ChatModel, LlmError, ModelBuilder, ModelOptions, ScriptedModel,
    StructuredInput, StructuredOutput,
};
use loom_queue::{MemoryQueue, QueueReceiver, RunProcessMessage, RunProcessWorker, WorkerConfig};
use loom_store::{MemoryStore, MessageStore, Run, RunMessage, TestMock, ToolDefinition};
use serde_json::json;

pub const CLUSTER: &str = "cluster-1";

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub model: ScriptedModel,
    pub queue: MemoryQueue<RunProcessMessage>,
    pub receiver: QueueReceiver<RunProcessMessage>,
    pub worker: RunProcessWorker,
}

impl Harness {
    pub fn new() -> Self {
        let model = ScriptedModel::new("claude-3-5-sonnet");
        Self::with_models(model.clone(), Arc::new(model), WorkerConfig::default())
    }

    /// `model` is where tests push responses; `models` is what the run engine
    /// builds its models from.
    pub fn with_models(
        model: ScriptedModel,
        models: Arc<dyn ModelBuilder>,
        config: WorkerConfig,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        store
            .register_tool(
                CLUSTER,
                ToolDefinition {
                    name: "echo".to_string(),
                    description: Some("Echoes the given text".to_string()),
                    schema: Some(json!({
                        "type": "object",
                        "properties": { "text": { "type": "string" } },
                        "required": ["text"]
                    })),
                },
            )
            .expect("register echo");
        let processor =
            Arc::new(RunProcessor::builder(Stores::from_shared(store.clone()), models).build());
        let (queue, receiver) = MemoryQueue::<RunProcessMessage>::new("run-process");
        let worker = RunProcessWorker::new(
            processor,
            store.clone(),
            Arc::new(queue.clone()),
            config,
        );
        Self {
            store,
            model,
            queue,
            receiver,
            worker,
        }
    }

    pub async fn start(&self, run: Run, prompt: &str) -> Run {
        self.store.insert_run(run.clone()).expect("insert run");
        self.store
            .insert_run_message(&RunMessage::human(&run, prompt))
            .await
            .expect("insert human");
        run
    }

    pub async fn stored(&self, run_id: &str) -> Run {
        use loom_store::RunStore;
        self.store
            .get_run(CLUSTER, run_id)
            .await
            .expect("get run")
            .expect("run exists")
    }
}

pub fn echo_run(id: &str) -> Run {
    let mut run = Run::new(CLUSTER, id);
    run.attached_functions = vec!["echo".to_string()];
    run.test = true;
    run.test_mocks.insert(
        "echo".to_string(),
        TestMock {
            output: json!({"echoed": true}),
        },
    );
    run
}

/// Delays every structured call and records how many overlap.
#[derive(Clone)]
pub struct SlowModel {
    inner: ScriptedModel,
    delay: Duration,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl SlowModel {
    pub fn new(inner: ScriptedModel, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for SlowModel {
    fn identifier(&self) -> &str {
        self.inner.identifier()
    }

    fn context_window(&self) -> Option<u64> {
        self.inner.context_window()
    }

    async fn call(&self, input: CallInput) -> Result<CallOutput, LlmError> {
        self.inner.call(input).await
    }

    async fn structured(&self, input: StructuredInput) -> Result<StructuredOutput, LlmError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let output = self.inner.structured(input).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        output
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.inner.embed_query(text).await
    }
}

impl ModelBuilder for SlowModel {
    fn build_model(&self, _identifier: &str, _options: ModelOptions) -> Arc<dyn ChatModel> {
        Arc::new(self.clone())
    }
}
