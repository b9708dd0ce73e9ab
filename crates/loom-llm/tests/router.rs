mod support;

use loom_llm::{
    CallInput, ChatMessage, ChatModel, LlmError, ModelOptions, ModelRouter, RetryPolicy, Route,
    RoutingTable, StructuredInput, ToolChoice,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use support::{SequenceAdapter, extract_response, overloaded, text_response};

fn two_region_router(log: &Arc<Mutex<Vec<String>>>) -> (ModelRouter, SequenceAdapter, SequenceAdapter) {
    let west = SequenceAdapter::new("us-west-2", log.clone());
    let east = SequenceAdapter::new("us-east-1", log.clone());
    let mut table = RoutingTable::new();
    table.add_chat_route("claude-3-5-sonnet", Route::new(Arc::new(west.clone()), "sonnet-west"));
    table.add_chat_route("claude-3-5-sonnet", Route::new(Arc::new(east.clone()), "sonnet-east"));
    table.set_context_window("claude-3-5-sonnet", 200_000);

    let router = ModelRouter::new(table).with_retry_policy(RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(1),
    });
    (router, west, east)
}

#[tokio::test(flavor = "current_thread")]
async fn retryable_error_then_success_rotates_to_second_route() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (router, west, east) = two_region_router(&log);
    west.push(Err(overloaded()));
    east.push(Ok(extract_response(json!({"done": true, "message": "hi"}))));

    let model = router.build("claude-3-5-sonnet", ModelOptions::for_run("cluster-1", "run-1"));
    let output = model
        .structured(StructuredInput::new(
            vec![ChatMessage::user("hello")],
            json!({"type": "object"}),
        ))
        .await
        .expect("second attempt should succeed");

    assert_eq!(output.structured, json!({"done": true, "message": "hi"}));
    assert_eq!(
        log.lock().expect("log").clone(),
        vec!["us-west-2".to_string(), "us-east-1".to_string()]
    );
    assert_eq!(west.requests()[0].model, "sonnet-west");
    assert_eq!(east.requests()[0].model, "sonnet-east");
}

#[tokio::test(flavor = "current_thread")]
async fn structured_forces_extract_tool_choice() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (router, west, _east) = two_region_router(&log);
    west.push(Ok(extract_response(json!({"done": false}))));

    let model = router.build("claude-3-5-sonnet", ModelOptions::default());
    model
        .structured(StructuredInput::new(
            vec![ChatMessage::user("hello")],
            json!({"type": "object"}),
        ))
        .await
        .expect("structured call");

    let request = &west.requests()[0];
    assert_eq!(
        request.tool_choice,
        Some(ToolChoice::Tool {
            name: "extract".to_string()
        })
    );
    assert_eq!(request.tools.last().map(|tool| tool.name.as_str()), Some("extract"));
    assert_eq!(request.max_tokens, 2048);
}

#[tokio::test(flavor = "current_thread")]
async fn non_retryable_error_aborts_without_rotation() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (router, west, east) = two_region_router(&log);
    west.push(Err(LlmError::Provider {
        provider: "test".to_string(),
        status: 400,
        message: "invalid request".to_string(),
    }));
    east.push(Ok(text_response("unused")));

    let model = router.build("claude-3-5-sonnet", ModelOptions::default());
    let error = model
        .call(CallInput {
            messages: vec![ChatMessage::user("hello")],
            ..CallInput::default()
        })
        .await
        .expect_err("400 is fatal");

    assert!(matches!(error, LlmError::Provider { status: 400, .. }));
    assert_eq!(log.lock().expect("log").len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn retries_exhausted_after_max_attempts_wrapping_routes() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (router, west, east) = two_region_router(&log);
    for _ in 0..3 {
        west.push(Err(overloaded()));
        east.push(Err(overloaded()));
    }

    let model = router.build("claude-3-5-sonnet", ModelOptions::default());
    let error = model
        .call(CallInput {
            messages: vec![ChatMessage::user("hello")],
            ..CallInput::default()
        })
        .await
        .expect_err("all attempts fail");

    assert!(error.is_retryable());
    assert_eq!(
        log.lock().expect("log").clone(),
        vec!["us-west-2", "us-east-1", "us-west-2", "us-east-1", "us-west-2"]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn injected_retry_predicate_overrides_classification() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (router, west, east) = two_region_router(&log);
    let router = router.with_retry_predicate(Arc::new(|_: &LlmError| false));
    west.push(Err(overloaded()));
    east.push(Ok(text_response("unused")));

    let model = router.build("claude-3-5-sonnet", ModelOptions::default());
    let result = model
        .call(CallInput {
            messages: vec![ChatMessage::user("hello")],
            ..CallInput::default()
        })
        .await;

    assert!(result.is_err());
    assert_eq!(log.lock().expect("log").len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_identifier_is_not_a_chat_model() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (router, _west, _east) = two_region_router(&log);

    let model = router.build("gpt-4", ModelOptions::default());
    let error = model
        .call(CallInput::default())
        .await
        .expect_err("unknown identifier");

    assert!(matches!(error, LlmError::NotChatModel(_)));
    assert_eq!(model.context_window(), None);
}
