use clap::{ArgAction, Parser, Subcommand};
use loom_agent::{RunProcessor, RunnerConfig, Stores, TitleGenerator};
use loom_llm::{AnthropicAdapter, ModelBuilder, ModelRouter, ScriptedModel, default_routing};
use loom_queue::{
    GenerateNameMessage, MemoryQueue, MessageHandler, NameGenerationWorker, RUN_PROCESS_QUEUE,
    RunProcessMessage, RunProcessWorker, WorkerConfig,
};
use loom_store::{
    MemoryStore, MessageData, MessageStore, Run, RunMessage, RunStatus, RunStore, new_id,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const LOCAL_CLUSTER: &str = "local";
const DRY_RUN_TOOL: &str = "inferable_calculator";

#[derive(Parser, Debug)]
#[command(name = "loom-cli")]
#[command(about = "In-process host for Loom runs")]
struct Cli {
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Run(RunArgs),
    ShowTranscript(ShowTranscriptArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long, env = "LOOM_MODEL", default_value = "claude-3-5-sonnet")]
    model: String,
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[arg(long, env = "ANTHROPIC_BASE_URL")]
    base_url: Option<String>,
    /// JSON Schema the final result must satisfy.
    #[arg(long)]
    result_schema: Option<String>,
    #[arg(long)]
    system_prompt: Option<String>,
    /// Tool made available to the run. Repeatable.
    #[arg(long = "attach")]
    attached_functions: Vec<String>,
    /// Scripted structured model response, in order. Repeatable.
    #[arg(long = "mock-response")]
    mock_responses: Vec<String>,
    /// File holding a JSON array of scripted model responses.
    #[arg(long)]
    mock_file: Option<PathBuf>,
    #[arg(long)]
    transcript: Option<PathBuf>,
    #[arg(long, action = ArgAction::SetTrue)]
    generate_name: bool,
    #[arg(long, default_value_t = 100)]
    max_steps: usize,
}

#[derive(clap::Args, Debug)]
struct ShowTranscriptArgs {
    #[arg(long)]
    transcript: PathBuf,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

/// Run record and message log written by `run --transcript`.
#[derive(Debug, Serialize, Deserialize)]
struct Transcript {
    run: Run,
    messages: Vec<RunMessage>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let result = match cli.command {
        Commands::Run(args) => run_command(args).await,
        Commands::ShowTranscript(args) => show_transcript_command(args),
    };

    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(1)
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_command(args: RunArgs) -> Result<ExitCode, String> {
    let mock_responses = load_mock_responses(&args.mock_responses, args.mock_file.as_deref())?;
    let models: Arc<dyn ModelBuilder> = match (&mock_responses, args.api_key) {
        (Some(_), _) => Arc::new(ScriptedModel::new("mock")),
        (None, Some(api_key)) => {
            let adapter = Arc::new(AnthropicAdapter::new(api_key, args.base_url));
            let routing = default_routing(adapter);
            routing.validate().map_err(|error| error.to_string())?;
            Arc::new(ModelRouter::new(routing))
        }
        (None, None) => {
            return Err(
                "ANTHROPIC_API_KEY is required unless --mock-response or --mock-file is given"
                    .to_string(),
            );
        }
    };
    if args.generate_name && mock_responses.is_some() {
        return Err("--generate-name needs a live model".to_string());
    }

    let store = Arc::new(MemoryStore::new());
    let mut run = Run::new(LOCAL_CLUSTER, new_id());
    run.model_identifier = Some(args.model.clone());
    run.system_prompt = args.system_prompt;
    run.result_schema = args
        .result_schema
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .map_err(|error| format!("invalid --result-schema: {error}"))?;
    run.attached_functions = args.attached_functions;
    if run.attached_functions.is_empty() && mock_responses.is_some() {
        // Dry runs have no search model, so give them a fixed tool.
        run.attached_functions.push(DRY_RUN_TOOL.to_string());
    }
    store.insert_run(run.clone()).map_err(|error| error.to_string())?;
    store
        .insert_run_message(&RunMessage::human(&run, &args.prompt))
        .await
        .map_err(|error| error.to_string())?;

    let config = RunnerConfig {
        max_steps: args.max_steps,
        default_model: args.model,
        ..RunnerConfig::default()
    };
    let processor = Arc::new(
        RunProcessor::builder(Stores::from_shared(store.clone()), models.clone())
            .config(config.clone())
            .build(),
    );
    let (queue, _receiver) = MemoryQueue::<RunProcessMessage>::new(RUN_PROCESS_QUEUE);
    let mut worker =
        RunProcessWorker::new(processor, store.clone(), Arc::new(queue), WorkerConfig::default());
    if let Some(responses) = mock_responses {
        worker = worker.with_mock_responses(responses);
    }

    if let Err(error) = worker
        .handle(RunProcessMessage::new(LOCAL_CLUSTER, &run.id))
        .await
    {
        tracing::error!(run_id = %run.id, error = %error, "run processing failed");
    }

    if args.generate_name {
        let namer = NameGenerationWorker::new(
            TitleGenerator::new(models, config.title_model.clone(), config.title_words),
            store.clone(),
            store.clone(),
            WorkerConfig::default(),
        );
        let named = namer
            .handle(GenerateNameMessage {
                run_id: run.id.clone(),
                cluster_id: LOCAL_CLUSTER.to_string(),
                content: args.prompt.clone(),
            })
            .await;
        if let Err(error) = named {
            tracing::warn!(error = %error, "failed to generate run name");
        }
    }

    let run = store
        .get_run(LOCAL_CLUSTER, &run.id)
        .await
        .map_err(|error| error.to_string())?
        .ok_or_else(|| format!("run {} disappeared", run.id))?;
    let transcript = Transcript {
        messages: store
            .messages(LOCAL_CLUSTER, &run.id)
            .map_err(|error| error.to_string())?,
        run,
    };

    print_transcript(&transcript);
    if let Some(path) = args.transcript.as_deref() {
        write_transcript(path, &transcript)?;
    }
    Ok(exit_code_for_status(transcript.run.status))
}

fn show_transcript_command(args: ShowTranscriptArgs) -> Result<ExitCode, String> {
    let source = std::fs::read_to_string(&args.transcript).map_err(|e| {
        format!(
            "failed reading transcript '{}': {e}",
            args.transcript.display()
        )
    })?;
    let transcript: Transcript = serde_json::from_str(&source).map_err(|e| e.to_string())?;
    if args.json {
        let json = serde_json::to_string_pretty(&transcript).map_err(|e| e.to_string())?;
        println!("{json}");
    } else {
        print_transcript(&transcript);
    }
    Ok(ExitCode::SUCCESS)
}

fn load_mock_responses(
    inline: &[String],
    file: Option<&Path>,
) -> Result<Option<Vec<String>>, String> {
    let mut responses = Vec::new();
    for response in inline {
        serde_json::from_str::<Value>(response)
            .map_err(|error| format!("invalid --mock-response '{response}': {error}"))?;
        responses.push(response.clone());
    }
    if let Some(path) = file {
        let source = std::fs::read_to_string(path)
            .map_err(|e| format!("failed reading mock file '{}': {e}", path.display()))?;
        let values: Vec<Value> = serde_json::from_str(&source)
            .map_err(|e| format!("mock file '{}' is not a JSON array: {e}", path.display()))?;
        responses.extend(values.iter().map(Value::to_string));
    }
    Ok((!responses.is_empty() || file.is_some()).then_some(responses))
}

fn write_transcript(path: &Path, transcript: &Transcript) -> Result<(), String> {
    let json = serde_json::to_string_pretty(transcript).map_err(|e| e.to_string())?;
    std::fs::write(path, json)
        .map_err(|e| format!("failed writing transcript '{}': {e}", path.display()))
}

fn print_transcript(transcript: &Transcript) {
    for message in &transcript.messages {
        print_message(message);
    }
    let run = &transcript.run;
    println!("run_id: {}", run.id);
    println!("status: {}", run.status);
    if let Some(name) = run.name.as_deref() {
        println!("name: {name}");
    }
    if let Some(reason) = run.failure_reason.as_deref() {
        println!("failure_reason: {reason}");
    }
    let result = transcript
        .messages
        .iter()
        .rev()
        .filter_map(RunMessage::as_agent)
        .find_map(|agent| agent.result.as_ref());
    if let Some(result) = result {
        println!("result: {result}");
    }
}

fn print_message(message: &RunMessage) {
    let kind = message.kind();
    match &message.data {
        MessageData::Human(data)
        | MessageData::Template(data)
        | MessageData::Supervisor(data)
        | MessageData::AgentInvalid(data) => println!("[{kind}] {}", data.message),
        MessageData::Agent(agent) => {
            let text = agent
                .message
                .clone()
                .or_else(|| agent.result.as_ref().map(Value::to_string))
                .unwrap_or_default();
            println!("[{kind}] {text}");
            for invocation in &agent.invocations {
                println!("  -> {}({})", invocation.tool_name, invocation.input);
            }
        }
        MessageData::InvocationResult(result) => println!(
            "[{kind}] {} {}: {}",
            result.tool_name,
            result.result_type.as_str(),
            result.result
        ),
    }
}

fn exit_code_for_status(status: RunStatus) -> ExitCode {
    match status {
        RunStatus::Done => ExitCode::SUCCESS,
        RunStatus::Failed => ExitCode::from(2),
        RunStatus::Pending | RunStatus::Running | RunStatus::Paused => ExitCode::from(3),
    }
}
