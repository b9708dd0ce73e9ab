mod support;

use loom_agent::{AgentError, Notification, RunnerConfig};
use loom_store::{
    JobStore, MessageKind, MessageStore, ResultType, RunMessage, RunStatus, RunTags,
};
use serde_json::json;
use support::*;

#[tokio::test(flavor = "current_thread")]
async fn single_tool_call_then_done_records_four_messages() {
    let harness = Harness::new();
    let run = harness
        .start(mocked_echo_run("run-a", json!({"echoed": "hello"})), "echo hello")
        .await;
    harness.model.push_structured(invoke("echo", json!({"text": "hello"})));
    harness.model.push_structured(finish("I echoed hello"));

    let state = harness
        .processor
        .process_run(run.clone(), RunTags::new(), None)
        .await
        .expect("run");

    assert_eq!(state.status, RunStatus::Done);
    assert_eq!(
        harness.kinds(&run),
        vec![
            MessageKind::Human,
            MessageKind::Agent,
            MessageKind::InvocationResult,
            MessageKind::Agent
        ]
    );
    let messages = harness.messages(&run);
    let invocation_id = messages[1].as_agent().expect("agent").invocations[0].id.clone();
    let result = messages[2].as_invocation_result().expect("result");
    assert_eq!(result.id, invocation_id);
    assert_eq!(result.result_type, ResultType::Resolution);
    assert_eq!(
        result.result,
        json!({ invocation_id.clone(): {"result": {"echoed": "hello"}, "resultType": "resolution", "status": "success"} })
    );
    assert_eq!(harness.reload(&run).await.status, RunStatus::Done);
}

#[tokio::test(flavor = "current_thread")]
async fn schema_violation_is_corrected_by_supervisor() {
    let harness = Harness::new();
    let mut run = echo_run("run-b");
    run.result_schema = Some(json!({
        "type": "object",
        "properties": { "word": { "type": "string" } },
        "required": ["word"]
    }));
    let run = harness.start(run, "give me a word").await;
    harness
        .model
        .push_structured(json!({"done": true, "result": {"word": 5}}));
    harness
        .model
        .push_structured(json!({"done": true, "result": {"word": "hello"}}));

    let state = harness
        .processor
        .process_run(run.clone(), RunTags::new(), None)
        .await
        .expect("run");

    assert_eq!(state.status, RunStatus::Done);
    assert_eq!(state.result, Some(json!({"word": "hello"})));
    assert_eq!(
        harness.kinds(&run),
        vec![
            MessageKind::Human,
            MessageKind::AgentInvalid,
            MessageKind::Supervisor,
            MessageKind::Agent
        ]
    );
    assert_eq!(harness.model.remaining(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn pending_job_pauses_and_resumes_without_duplicate_jobs() {
    let harness = Harness::new();
    let run = harness.start(echo_run("run-p"), "echo hi").await;
    harness.model.push_structured(invoke("echo", json!({"text": "hi"})));
    harness.model.push_structured(finish("echoed"));

    let paused = harness
        .processor
        .process_run(run.clone(), RunTags::new(), None)
        .await
        .expect("first pass");
    assert_eq!(paused.status, RunStatus::Paused);
    assert_eq!(harness.kinds(&run), vec![MessageKind::Human, MessageKind::Agent]);

    let jobs = harness.store.jobs().expect("jobs");
    assert_eq!(jobs.len(), 1);
    assert_eq!(paused.waiting_jobs, vec![jobs[0].id.clone()]);
    harness
        .store
        .complete_job(CLUSTER, &jobs[0].id, Some(json!({"text": "hi"})), ResultType::Resolution)
        .expect("complete");

    let resumed_run = harness.reload(&run).await;
    assert_eq!(resumed_run.status, RunStatus::Paused);
    let done = harness
        .processor
        .process_run(resumed_run, RunTags::new(), None)
        .await
        .expect("second pass");

    assert_eq!(done.status, RunStatus::Done);
    assert_eq!(harness.store.jobs().expect("jobs").len(), 1);
    assert_eq!(
        harness.kinds(&run),
        vec![
            MessageKind::Human,
            MessageKind::Agent,
            MessageKind::InvocationResult,
            MessageKind::Agent
        ]
    );
    let statuses: Vec<(RunStatus, RunStatus)> = harness
        .notifier
        .snapshot()
        .into_iter()
        .filter_map(|notification| match notification {
            Notification::StatusChange { previous, status, .. } => Some((previous, status)),
            Notification::NewMessage { .. } => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            (RunStatus::Pending, RunStatus::Paused),
            (RunStatus::Paused, RunStatus::Done)
        ]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn resumed_batch_invokes_only_unresolved_sibling() {
    let harness = Harness::new();
    let run = harness.start(echo_run("run-r"), "echo twice").await;
    let agent = agent_with_invocations(&run, &[("inv-a", "echo"), ("inv-b", "echo")]);
    harness.store.insert_run_message(&agent).await.expect("agent");
    harness
        .store
        .insert_run_message(&RunMessage::new(
            &run,
            loom_store::MessageData::InvocationResult(loom_store::InvocationResultData {
                id: "inv-a".to_string(),
                tool_name: "echo".to_string(),
                result: json!({"inv-a": {"result": "a", "resultType": "resolution", "status": "success"}}),
                result_type: ResultType::Resolution,
            }),
        ))
        .await
        .expect("result");

    let state = harness
        .processor
        .process_run(run.clone(), RunTags::new(), None)
        .await
        .expect("run");

    assert_eq!(state.status, RunStatus::Paused);
    let jobs = harness.store.jobs().expect("jobs");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].tool_call_id.as_deref(), Some("inv-b"));
    assert_eq!(
        harness
            .store
            .get_waiting_job_ids(CLUSTER, "run-r")
            .await
            .expect("waiting"),
        vec![jobs[0].id.clone()]
    );
    assert_eq!(harness.model.structured_requests().len(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn invalid_tool_input_becomes_rejection() {
    let harness = Harness::new();
    let run = harness
        .start(mocked_echo_run("run-i", json!({"echoed": "x"})), "echo")
        .await;
    harness.model.push_structured(invoke("echo", json!({})));
    harness.model.push_structured(finish("gave up"));

    harness
        .processor
        .process_run(run.clone(), RunTags::new(), None)
        .await
        .expect("run");

    let messages = harness.messages(&run);
    let result = messages[2].as_invocation_result().expect("result");
    assert_eq!(result.result_type, ResultType::Rejection);
    assert_eq!(
        result.result["message"],
        json!("Provided input did not match schema for echo, check your input")
    );
    assert!(result.result["parseResult"].as_array().is_some_and(|errors| !errors.is_empty()));
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_tool_becomes_rejection() {
    let harness = Harness::new();
    let run = harness.start(echo_run("run-n"), "use the ghost").await;
    harness
        .store
        .insert_run_message(&agent_with_invocations(&run, &[("inv-ghost", "ghost")]))
        .await
        .expect("agent");
    harness.model.push_structured(finish("ghost is missing"));

    let state = harness
        .processor
        .process_run(run.clone(), RunTags::new(), None)
        .await
        .expect("run");

    assert_eq!(state.status, RunStatus::Done);
    let messages = harness.messages(&run);
    let result = messages[2].as_invocation_result().expect("result");
    assert_eq!(result.result_type, ResultType::Rejection);
    assert!(
        result.result["message"]
            .as_str()
            .is_some_and(|message| message.starts_with("Failed to find tool: ghost."))
    );
}

#[tokio::test(flavor = "current_thread")]
async fn stagnant_corrections_fail_run_with_cycle_reason() {
    let harness = Harness::new();
    let run = harness.start(echo_run("run-c"), "loop").await;
    for _ in 0..5 {
        harness.model.push_structured(json!({"done": false}));
    }

    let error = harness
        .processor
        .process_run(run.clone(), RunTags::new(), None)
        .await
        .expect_err("cycle");

    assert!(matches!(error, AgentError::CycleDetected));
    assert_eq!(harness.messages(&run).len(), 11);
    let stored = harness.reload(&run).await;
    assert_eq!(stored.status, RunStatus::Failed);
    assert_eq!(stored.failure_reason.as_deref(), Some("Detected cycle in Run."));
}

#[tokio::test(flavor = "current_thread")]
async fn invalid_result_schema_fails_run() {
    let harness = Harness::new();
    let mut run = echo_run("run-s");
    run.result_schema = Some(json!({"type": "not-a-type"}));
    let run = harness.start(run, "anything").await;

    let error = harness
        .processor
        .process_run(run.clone(), RunTags::new(), None)
        .await
        .expect_err("invalid schema");

    assert!(matches!(error, AgentError::InvalidResultSchema(_)));
    let stored = harness.reload(&run).await;
    assert_eq!(stored.status, RunStatus::Failed);
    assert!(
        stored
            .failure_reason
            .as_deref()
            .is_some_and(|reason| reason.starts_with("Result schema is not valid JSON Schema"))
    );
    assert!(harness.notifier.snapshot().contains(&Notification::StatusChange {
        run_id: "run-s".to_string(),
        previous: RunStatus::Pending,
        status: RunStatus::Failed,
        result: None,
    }));
}

#[tokio::test(flavor = "current_thread")]
async fn mock_responses_skip_answers_already_given() {
    let harness = Harness::new();
    let run = harness
        .start(mocked_echo_run("run-m", json!({"echoed": "m"})), "echo m")
        .await;
    let responses = vec![
        invoke("echo", json!({"text": "m"})).to_string(),
        finish("done with m").to_string(),
    ];

    let state = harness
        .processor
        .process_run(run.clone(), RunTags::new(), Some(responses.clone()))
        .await
        .expect("run");
    assert_eq!(state.status, RunStatus::Done);

    // Replaying the same script against a finished history consumes nothing.
    let again = harness
        .processor
        .process_run(harness.reload(&run).await, RunTags::new(), Some(responses))
        .await
        .expect("replay");
    assert_eq!(again.status, RunStatus::Done);
    assert_eq!(harness.messages(&run).len(), 4);
    assert_eq!(harness.model.structured_requests().len(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn mock_response_is_replayed_after_an_invalid_answer() {
    let harness = Harness::new();
    let mut run = echo_run("run-r");
    run.result_schema = Some(json!({
        "type": "object",
        "properties": { "word": { "type": "string" } },
        "required": ["word"]
    }));
    let run = harness.start(run, "give me a word").await;
    let responses = vec![
        json!({"done": true, "result": {"word": 5}}).to_string(),
        json!({"done": true, "result": {"word": "hello"}}).to_string(),
    ];

    let error = harness
        .processor
        .process_run(run.clone(), RunTags::new(), Some(responses))
        .await
        .expect_err("invalid answer repeats until the cycle guard trips");

    assert!(matches!(error, AgentError::CycleDetected));
    let kinds = harness.kinds(&run);
    assert_eq!(kinds[0], MessageKind::Human);
    assert_eq!(kinds.len(), 11);
    assert!(kinds[1..].chunks(2).all(|pair| pair == [MessageKind::AgentInvalid, MessageKind::Supervisor]));
    assert!(!kinds.contains(&MessageKind::Agent));
    assert_eq!(harness.reload(&run).await.status, RunStatus::Failed);
}

#[tokio::test(flavor = "current_thread")]
async fn message_limit_fails_run() {
    let harness = Harness::with_config(RunnerConfig {
        max_run_messages: 2,
        ..RunnerConfig::default()
    });
    let run = harness.start(echo_run("run-l"), "first").await;
    harness
        .store
        .insert_run_message(&RunMessage::human(&run, "second"))
        .await
        .expect("second");

    let error = harness
        .processor
        .process_run(run.clone(), RunTags::new(), None)
        .await
        .expect_err("limit");

    assert!(matches!(error, AgentError::MessageLimitExceeded));
    assert_eq!(
        harness.reload(&run).await.failure_reason.as_deref(),
        Some("Maximum Run message length exceeded.")
    );
}

#[tokio::test(flavor = "current_thread")]
async fn two_invocations_in_one_step_record_both_results() {
    let harness = Harness::new();
    let run = harness
        .start(echo_run("run-two"), "echo hello then echo goodbye")
        .await;
    harness.model.push_structured(json!({
        "done": false,
        "invocations": [
            { "toolName": "echo", "input": { "text": "hello" } },
            { "toolName": "echo", "input": { "text": "goodbye" } }
        ]
    }));
    harness.model.push_structured(finish("said both"));

    let paused = harness
        .processor
        .process_run(run.clone(), RunTags::new(), None)
        .await
        .expect("first pass");
    assert_eq!(paused.status, RunStatus::Paused);
    assert_eq!(paused.waiting_jobs.len(), 2);

    let jobs = harness.store.jobs().expect("jobs");
    let texts: Vec<_> = jobs.iter().map(|job| job.target_args["text"].clone()).collect();
    assert_eq!(texts, vec![json!("hello"), json!("goodbye")]);
    for job in &jobs {
        harness
            .store
            .complete_job(CLUSTER, &job.id, Some(job.target_args.clone()), ResultType::Resolution)
            .expect("complete");
    }

    let done = harness
        .processor
        .process_run(harness.reload(&run).await, RunTags::new(), None)
        .await
        .expect("second pass");

    assert_eq!(done.status, RunStatus::Done);
    assert_eq!(
        harness.kinds(&run),
        vec![
            MessageKind::Human,
            MessageKind::Agent,
            MessageKind::InvocationResult,
            MessageKind::InvocationResult,
            MessageKind::Agent
        ]
    );
    let messages = harness.messages(&run);
    let invocation_ids: Vec<_> = messages[1]
        .as_agent()
        .expect("agent")
        .invocations
        .iter()
        .map(|invocation| invocation.id.clone())
        .collect();
    let result_ids: Vec<_> = messages[2..4]
        .iter()
        .filter_map(RunMessage::as_invocation_result)
        .map(|result| result.id.clone())
        .collect();
    assert_eq!(result_ids, invocation_ids);
}
