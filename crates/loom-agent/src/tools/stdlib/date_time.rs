use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::tools::tool::{AgentTool, ToolCall, ToolDescriptor, ToolResponse};

pub const CURRENT_DATE_TIME_TOOL_NAME: &str = "currentDateTime";

pub fn current_date_time_tool() -> AgentTool {
    AgentTool::new(
        ToolDescriptor::new(
            CURRENT_DATE_TIME_TOOL_NAME,
            "Get the current date and time in ISO 8601 format.",
            json!({"type": "object", "properties": {}}),
        ),
        Arc::new(|_call: ToolCall| {
            Box::pin(async move {
                let now = Utc::now();
                ToolResponse::resolution(json!({
                    "iso8601": now.to_rfc3339(),
                    "unix": now.timestamp(),
                }))
                .encode()
            })
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tool::{ToolOutcome, parse_tool_response};
    use loom_store::Run;

    #[tokio::test(flavor = "current_thread")]
    async fn current_date_time_returns_parseable_timestamp() {
        let raw = current_date_time_tool()
            .execute(ToolCall {
                id: "inv-1".to_string(),
                input: json!({}),
                run: Arc::new(Run::new("c", "r")),
            })
            .await
            .expect("execute");

        let ToolOutcome::Completed { result, .. } = parse_tool_response(&raw).expect("parse") else {
            panic!("expected completed outcome");
        };
        let iso = result["iso8601"].as_str().expect("iso string");
        assert!(chrono::DateTime::parse_from_rfc3339(iso).is_ok());
        assert!(result["unix"].as_i64().is_some());
    }
}
