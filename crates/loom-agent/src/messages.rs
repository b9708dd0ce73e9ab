//! Projection of the run message log into provider chat messages.

use loom_llm::{ChatMessage, ContentBlock, Role};
use loom_store::{AgentMessageData, GenericMessageData, MessageData, RunMessage};
use serde_json::Value;

fn to_json_string<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

fn generic_text(data: &GenericMessageData) -> String {
    if data.details.is_some() {
        to_json_string(data)
    } else {
        data.message.clone()
    }
}

fn agent_content(data: &AgentMessageData) -> Vec<ContentBlock> {
    let without_invocations = AgentMessageData {
        invocations: Vec::new(),
        ..data.clone()
    };
    let mut content = vec![ContentBlock::text(to_json_string(&without_invocations))];
    content.extend(data.invocations.iter().map(|invocation| ContentBlock::ToolUse {
        id: invocation.id.clone(),
        name: invocation.tool_name.clone(),
        input: invocation.input.clone(),
    }));
    content
}

/// Model-facing view of one message.
pub fn to_model_message(message: &RunMessage) -> ChatMessage {
    match &message.data {
        MessageData::Human(data) | MessageData::Template(data) | MessageData::Supervisor(data) => {
            ChatMessage {
                role: Role::User,
                content: vec![ContentBlock::text(generic_text(data))],
            }
        }
        MessageData::Agent(data) => ChatMessage {
            role: Role::Assistant,
            content: agent_content(data),
        },
        MessageData::AgentInvalid(data) => ChatMessage {
            role: Role::Assistant,
            content: vec![ContentBlock::text(to_json_string(data))],
        },
        MessageData::InvocationResult(data) => ChatMessage {
            role: Role::User,
            content: vec![ContentBlock::ToolResult {
                tool_use_id: data.id.clone(),
                content: to_json_string(&data.result),
                is_error: None,
            }],
        },
    }
}

/// Projects messages in order, merging consecutive messages of the same role
/// into one chat message.
pub fn to_model_messages(messages: &[RunMessage]) -> Vec<ChatMessage> {
    let mut projected: Vec<ChatMessage> = Vec::with_capacity(messages.len());
    for message in messages {
        let next = to_model_message(message);
        match projected.last_mut() {
            Some(previous) if previous.role == next.role => {
                previous.content.extend(next.content);
            }
            _ => projected.push(next),
        }
    }
    projected
}

/// Payload of a message as persisted, used for search-query fallbacks.
pub fn message_data_json(message: &RunMessage) -> Value {
    serde_json::to_value(&message.data).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_store::{Invocation, InvocationResultData, ResultType, Run};
    use serde_json::json;

    fn run() -> Run {
        Run::new("cluster-1", "run-1")
    }

    #[test]
    fn agent_message_projects_text_then_tool_use_blocks() {
        let run = run();
        let message = RunMessage::new(
            &run,
            MessageData::Agent(AgentMessageData {
                invocations: vec![Invocation {
                    id: "inv-1".to_string(),
                    tool_name: "echo".to_string(),
                    input: json!({"text": "hello"}),
                    reasoning: None,
                }],
                done: Some(false),
                ..AgentMessageData::default()
            }),
        );

        let projected = to_model_message(&message);
        assert_eq!(projected.role, Role::Assistant);
        assert_eq!(projected.content[0], ContentBlock::text(r#"{"done":false}"#));
        assert_eq!(
            projected.content[1],
            ContentBlock::ToolUse {
                id: "inv-1".to_string(),
                name: "echo".to_string(),
                input: json!({"text": "hello"}),
            }
        );
    }

    #[test]
    fn supervisor_with_details_projects_whole_payload() {
        let run = run();
        let message = RunMessage::supervisor(&run, "fix it", Some(json!({"errors": ["bad"]})));

        let projected = to_model_message(&message);
        let ContentBlock::Text { text } = &projected.content[0] else {
            panic!("expected text block");
        };
        let decoded: Value = serde_json::from_str(text).expect("json text");
        assert_eq!(decoded, json!({"message": "fix it", "details": {"errors": ["bad"]}}));
    }

    #[test]
    fn consecutive_user_messages_are_merged() {
        let run = run();
        let messages = vec![
            RunMessage::human(&run, "first"),
            RunMessage::new(
                &run,
                MessageData::InvocationResult(InvocationResultData {
                    id: "inv-1".to_string(),
                    tool_name: "echo".to_string(),
                    result: json!({"inv-1": {"result": "hi"}}),
                    result_type: ResultType::Resolution,
                }),
            ),
            RunMessage::supervisor(&run, "continue", None),
        ];

        let projected = to_model_messages(&messages);
        assert_eq!(projected.len(), 1);
        assert_eq!(projected[0].content.len(), 3);
        assert!(matches!(
            &projected[0].content[1],
            ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "inv-1"
        ));
    }
}
