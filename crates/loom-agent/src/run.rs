//! Run processing: wires stores, models and tools into the state machine and
//! records the outcome on the run.

use std::sync::Arc;

use async_trait::async_trait;
use loom_llm::{ChatModel, ModelBuilder, ModelOptions, ScriptedModel};
use loom_store::{
    JobStore, MessageKind, MessageStore, Run, RunMessage, RunStatus, RunStore, RunTags,
    ToolDefinitionStore,
};
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::RunnerConfig;
use crate::errors::AgentError;
use crate::machine::{ModelSource, RunMachine, StepSaver};
use crate::nodes::{ModelNode, ToolNode};
use crate::notify::{NoopNotifier, RunNotifier};
use crate::overflow::{CharTokenEstimator, TokenEstimator};
use crate::search::{RegistrySimilaritySearch, ToolSearch, ToolSimilaritySearch};
use crate::state::RunGraphState;
use crate::summarizer::ResultSummarizer;
use crate::tools::stdlib::{KnowledgeSearch, UrlFetcher};
use crate::tools::{ClusterSettingsCache, ServiceFunctionTools, StdlibTools, default_resolver_chain};

/// Persistence collaborators used by run processing.
#[derive(Clone)]
pub struct Stores {
    pub messages: Arc<dyn MessageStore>,
    pub runs: Arc<dyn RunStore>,
    pub jobs: Arc<dyn JobStore>,
    pub definitions: Arc<dyn ToolDefinitionStore>,
}

impl Stores {
    /// All four roles served by one backend.
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: MessageStore + RunStore + JobStore + ToolDefinitionStore + 'static,
    {
        Self {
            messages: store.clone(),
            runs: store.clone(),
            jobs: store.clone(),
            definitions: store,
        }
    }
}

/// Inserts each unpersisted message in production order, then announces it.
pub struct PersistingStepSaver {
    messages: Arc<dyn MessageStore>,
    notifier: Arc<dyn RunNotifier>,
    tags: RunTags,
}

impl PersistingStepSaver {
    pub fn new(messages: Arc<dyn MessageStore>, notifier: Arc<dyn RunNotifier>, tags: RunTags) -> Self {
        Self {
            messages,
            notifier,
            tags,
        }
    }
}

#[async_trait]
impl StepSaver for PersistingStepSaver {
    async fn save(&self, messages: &mut [RunMessage]) -> Result<(), AgentError> {
        for message in messages.iter_mut().filter(|message| !message.persisted) {
            self.messages.insert_run_message(message).await?;
            if let Err(err) = self.notifier.notify_new_message(message, &self.tags).await {
                warn!(message_id = %message.id, error = %err, "failed to notify new message");
            }
            message.persisted = true;
        }
        Ok(())
    }
}

/// Scripted answers standing in for the live model. Each model step gets the
/// response indexed by the number of agent messages already recorded, so a
/// step retried after an invalid answer sees the same response again.
struct MockResponses(Vec<String>);

impl ModelSource for MockResponses {
    fn model_for(&self, state: &RunGraphState) -> Result<Arc<dyn ChatModel>, AgentError> {
        let answered = state
            .messages
            .iter()
            .filter(|message| message.kind() == MessageKind::Agent)
            .count();
        let next = self.0.get(answered..=answered).unwrap_or_default();
        Ok(Arc::new(ScriptedModel::from_json_responses(next)?))
    }
}

pub struct RunProcessorBuilder {
    stores: Stores,
    models: Arc<dyn ModelBuilder>,
    config: RunnerConfig,
    notifier: Arc<dyn RunNotifier>,
    similarity: Option<Arc<dyn ToolSimilaritySearch>>,
    estimator: Arc<dyn TokenEstimator>,
    fetcher: Option<Arc<dyn UrlFetcher>>,
    knowledge: Option<Arc<dyn KnowledgeSearch>>,
}

impl RunProcessorBuilder {
    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn RunNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn similarity_search(mut self, similarity: Arc<dyn ToolSimilaritySearch>) -> Self {
        self.similarity = Some(similarity);
        self
    }

    pub fn token_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn url_fetcher(mut self, fetcher: Arc<dyn UrlFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn knowledge_search(mut self, knowledge: Arc<dyn KnowledgeSearch>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn build(self) -> RunProcessor {
        let config = self.config;
        let definitions = self.stores.definitions.clone();
        let settings = Arc::new(ClusterSettingsCache::new(
            definitions.clone(),
            config.cluster_settings_ttl,
        ));

        let mut stdlib = StdlibTools::new(settings.clone());
        if let Some(fetcher) = self.fetcher {
            stdlib = stdlib.with_fetcher(fetcher);
        }
        if let Some(knowledge) = self.knowledge {
            stdlib = stdlib.with_knowledge(knowledge);
        }
        let stdlib = Arc::new(stdlib);

        let functions = ServiceFunctionTools::new(self.stores.jobs.clone()).with_summarizer(
            ResultSummarizer::new(
                self.models.clone(),
                config.summary_model.clone(),
                config.summarize_threshold_chars,
            ),
        );
        let similarity = self
            .similarity
            .unwrap_or_else(|| Arc::new(RegistrySimilaritySearch::new(definitions.clone())));
        let search = ToolSearch::new(
            self.models.clone(),
            definitions.clone(),
            similarity,
            stdlib.clone(),
            functions.clone(),
        )
        .with_search_model(config.search_model.clone())
        .with_limit(config.relevant_tool_limit);

        let machine = RunMachine::new(
            ModelNode::new(Arc::new(search), self.estimator, config.clone()),
            ToolNode::new(default_resolver_chain(definitions, stdlib, functions)),
            config.max_steps,
        );

        RunProcessor {
            stores: self.stores,
            models: self.models,
            machine,
            settings,
            notifier: self.notifier,
            config,
        }
    }
}

/// Executes runs end to end. One instance is shared by every worker.
pub struct RunProcessor {
    stores: Stores,
    models: Arc<dyn ModelBuilder>,
    machine: RunMachine,
    settings: Arc<ClusterSettingsCache>,
    notifier: Arc<dyn RunNotifier>,
    config: RunnerConfig,
}

impl RunProcessor {
    pub fn builder(stores: Stores, models: Arc<dyn ModelBuilder>) -> RunProcessorBuilder {
        RunProcessorBuilder {
            stores,
            models,
            config: RunnerConfig::default(),
            notifier: Arc::new(NoopNotifier),
            similarity: None,
            estimator: Arc::new(CharTokenEstimator),
            fetcher: None,
            knowledge: None,
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn models(&self) -> Arc<dyn ModelBuilder> {
        self.models.clone()
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    async fn additional_context(&self, run: &Run) -> Result<String, AgentError> {
        let settings = self.settings.get(&run.cluster_id).await?;
        let mut context = settings.context_text.unwrap_or_default();
        context.push_str(&format!(
            "\nCurrent Run URL: {}",
            self.config.run_url(&run.cluster_id, &run.id)
        ));
        if let Some(system_prompt) = run.system_prompt.as_deref().filter(|prompt| !prompt.is_empty()) {
            context.push('\n');
            context.push_str(system_prompt);
        }
        Ok(context)
    }

    async fn available_tools(&self, run: &Run) -> Result<Vec<String>, AgentError> {
        let mut tools = run.attached_functions.clone();
        tools.extend(self.stores.definitions.available_tools(&run.cluster_id).await?);
        Ok(tools)
    }

    fn build_model(
        &self,
        run: &Run,
        mock_responses: Option<&[String]>,
    ) -> Box<dyn ModelSource> {
        if let Some(responses) = mock_responses {
            info!(run_id = %run.id, responses = responses.len(), "using mock model responses");
            return Box::new(MockResponses(responses.to_vec()));
        }
        let identifier = run
            .model_identifier
            .as_deref()
            .unwrap_or(&self.config.default_model);
        Box::new(self.models.build_model(
            identifier,
            ModelOptions::for_run(&run.cluster_id, &run.id).with_purpose("agent_loop.reasoning"),
        ))
    }

    /// Runs the machine to a halting edge and records the resulting status.
    /// On error the run is marked failed with the error text and the error is
    /// returned.
    pub async fn process_run(
        &self,
        run: Run,
        tags: RunTags,
        mock_responses: Option<Vec<String>>,
    ) -> Result<RunGraphState, AgentError> {
        let span = info_span!("run", run_id = %run.id, cluster_id = %run.cluster_id);
        async move {
            let previous = run.status;
            let err = match self.execute(run.clone(), &tags, mock_responses.as_deref()).await {
                Ok(state) => return Ok(state),
                Err(err) => err,
            };

            error!(error = %err, "run failed");
            let reason = err.to_string();
            if let Err(update_err) = self
                .stores
                .runs
                .update_run_status(&run.cluster_id, &run.id, RunStatus::Failed, Some(&reason))
                .await
            {
                error!(error = %update_err, "failed to mark run as failed");
            }
            self.notify_status(&run, &tags, previous, RunStatus::Failed, None)
                .await;
            Err(err)
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        mut run: Run,
        tags: &RunTags,
        mock_responses: Option<&[String]>,
    ) -> Result<RunGraphState, AgentError> {
        let previous = run.status;
        self.stores
            .runs
            .update_run_status(&run.cluster_id, &run.id, RunStatus::Running, Some(""))
            .await?;
        run.status = RunStatus::Running;
        run.failure_reason = None;

        let (context, tools, messages, waiting_jobs) = futures::try_join!(
            self.additional_context(&run),
            self.available_tools(&run),
            async {
                self.stores
                    .messages
                    .get_run_messages(&run.cluster_id, &run.id, None, self.config.message_load_limit)
                    .await
                    .map_err(AgentError::from)
            },
            async {
                self.stores
                    .jobs
                    .get_waiting_job_ids(&run.cluster_id, &run.id)
                    .await
                    .map_err(AgentError::from)
            },
        )?;

        let messages: Vec<RunMessage> = messages
            .into_iter()
            .map(|mut message| {
                message.persisted = true;
                message
            })
            .collect();
        let models = self.build_model(&run, mock_responses);

        let state = RunGraphState::new(run.clone(), messages)
            .with_waiting_jobs(waiting_jobs)
            .with_available_tools(tools)
            .with_additional_context(Some(context));
        let saver = PersistingStepSaver::new(
            self.stores.messages.clone(),
            self.notifier.clone(),
            tags.clone(),
        );

        let mut state = self.machine.run(state, models.as_ref(), &saver).await?;
        state.status = settled_status(&state);

        self.stores
            .runs
            .update_run_status(&run.cluster_id, &run.id, state.status, None)
            .await?;
        info!(status = %state.status, messages = state.messages.len(), "run step sequence finished");
        self.notify_status(&run, tags, previous, state.status, state.result.as_ref())
            .await;
        Ok(state)
    }

    async fn notify_status(
        &self,
        run: &Run,
        tags: &RunTags,
        previous: RunStatus,
        status: RunStatus,
        result: Option<&serde_json::Value>,
    ) {
        if previous == status {
            return;
        }
        if let Err(err) = self
            .notifier
            .notify_status_change(run, tags, previous, status, result)
            .await
        {
            error!(run_id = %run.id, error = %err, "failed to notify status change");
        }
    }
}

/// A run that halts while still marked running either waits on jobs or was
/// already answered before this execution started.
fn settled_status(state: &RunGraphState) -> RunStatus {
    if state.status != RunStatus::Running {
        return state.status;
    }
    if !state.waiting_jobs.is_empty() {
        return RunStatus::Paused;
    }
    match state.last_message().and_then(RunMessage::as_agent) {
        Some(agent) if agent.done == Some(true) && agent.invocations.is_empty() => RunStatus::Done,
        _ => RunStatus::Running,
    }
}
