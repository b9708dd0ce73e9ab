#![allow(dead_code)]

use std::sync::Arc;

use loom_agent::{BufferedNotifier, RunProcessor, RunnerConfig, Stores};
use loom_llm::ScriptedModel;
use loom_store::{
    AgentMessageData, Invocation, MemoryStore, MessageData, MessageKind, MessageStore, Run,
    RunMessage, TestMock, ToolDefinition,
};
use serde_json::{Value, json};

pub const CLUSTER: &str = "cluster-1";

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub model: ScriptedModel,
    pub notifier: BufferedNotifier,
    pub processor: RunProcessor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(RunnerConfig::default())
    }

    pub fn with_config(config: RunnerConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        store
            .register_tool(CLUSTER, echo_definition())
            .expect("register echo");
        let model = ScriptedModel::new("claude-3-5-sonnet");
        let notifier = BufferedNotifier::default();
        let processor = RunProcessor::builder(Stores::from_shared(store.clone()), Arc::new(model.clone()))
            .config(config)
            .notifier(Arc::new(notifier.clone()))
            .build();
        Self {
            store,
            model,
            notifier,
            processor,
        }
    }

    /// Stores `run` with a human message and returns it as loaded.
    pub async fn start(&self, run: Run, prompt: &str) -> Run {
        self.store.insert_run(run.clone()).expect("insert run");
        self.store
            .insert_run_message(&RunMessage::human(&run, prompt))
            .await
            .expect("insert human");
        run
    }

    pub async fn reload(&self, run: &Run) -> Run {
        use loom_store::RunStore;
        self.store
            .get_run(&run.cluster_id, &run.id)
            .await
            .expect("get run")
            .expect("run exists")
    }

    pub fn messages(&self, run: &Run) -> Vec<RunMessage> {
        self.store
            .messages(&run.cluster_id, &run.id)
            .expect("messages")
    }

    pub fn kinds(&self, run: &Run) -> Vec<MessageKind> {
        self.messages(run).iter().map(RunMessage::kind).collect()
    }
}

pub fn echo_definition() -> ToolDefinition {
    ToolDefinition {
        name: "echo".to_string(),
        description: Some("Echoes the given text".to_string()),
        schema: Some(json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })),
    }
}

/// Run with `echo` attached, executed as a registered service function.
pub fn echo_run(id: &str) -> Run {
    let mut run = Run::new(CLUSTER, id);
    run.attached_functions = vec!["echo".to_string()];
    run
}

/// Run with `echo` attached and answered by a test mock.
pub fn mocked_echo_run(id: &str, output: Value) -> Run {
    let mut run = echo_run(id);
    run.test = true;
    run.test_mocks
        .insert("echo".to_string(), TestMock { output });
    run
}

pub fn invoke(tool: &str, input: Value) -> Value {
    json!({
        "done": false,
        "invocations": [{ "toolName": tool, "input": input }]
    })
}

pub fn finish(message: &str) -> Value {
    json!({ "done": true, "message": message })
}

pub fn agent_with_invocations(run: &Run, invocations: &[(&str, &str)]) -> RunMessage {
    RunMessage::new(
        run,
        MessageData::Agent(AgentMessageData {
            invocations: invocations
                .iter()
                .map(|(id, tool)| Invocation {
                    id: id.to_string(),
                    tool_name: tool.to_string(),
                    input: json!({ "text": id }),
                    reasoning: None,
                })
                .collect(),
            done: Some(false),
            ..AgentMessageData::default()
        }),
    )
}
