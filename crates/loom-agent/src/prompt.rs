//! System prompt and structured-output schema for the model node.

use serde_json::{Map, Value, json};

use crate::tools::ToolDescriptor;

const DONE_DESCRIPTION: &str =
    "Whether the workflow is done. All tasks have been completed or you can not progress further.";

/// Inputs for the structured output schema the model must satisfy.
#[derive(Clone, Debug, Default)]
pub struct ModelSchemaInput<'a> {
    pub result_schema: Option<&'a Value>,
    pub relevant_tools: &'a [ToolDescriptor],
    pub all_available_tools: &'a [String],
    pub reasoning_traces: bool,
}

/// Schema of the `extract` payload: `done`, `issue`, either `result` or
/// `message`, and `invocations` whose tool names are limited to the known
/// tools.
pub fn build_model_schema(input: &ModelSchemaInput<'_>) -> Value {
    let mut properties = Map::new();
    properties.insert(
        "done".to_string(),
        json!({"type": "boolean", "description": DONE_DESCRIPTION}),
    );
    properties.insert(
        "issue".to_string(),
        json!({
            "type": "string",
            "description": "Describe any issues you have encountered in this step. Specifically related to the tools you are using."
        }),
    );

    match input.result_schema {
        Some(schema) => {
            let mut result = schema.clone();
            if let Value::Object(object) = &mut result {
                object.insert(
                    "description".to_string(),
                    json!("Structured object describing The final result of the workflow, only provided once all tasks have been completed."),
                );
            }
            properties.insert("result".to_string(), result);
        }
        None => {
            properties.insert(
                "message".to_string(),
                json!({"type": "string", "description": "A message describing the current state or next steps"}),
            );
        }
    }

    let mut tool_names: Vec<String> = Vec::new();
    for name in input
        .relevant_tools
        .iter()
        .map(|tool| tool.name.clone())
        .chain(input.all_available_tools.iter().cloned())
    {
        if !tool_names.contains(&name) {
            tool_names.push(name);
        }
    }

    let mut tool_name = json!({"type": "string"});
    if !tool_names.is_empty() {
        tool_name["enum"] = json!(tool_names);
    }

    let mut invocation_properties = Map::new();
    invocation_properties.insert("toolName".to_string(), tool_name);
    if input.reasoning_traces {
        invocation_properties.insert(
            "reasoning".to_string(),
            json!({"type": "string", "description": "Reasoning trace for why this invocation is being made"}),
        );
    }
    invocation_properties.insert(
        "input".to_string(),
        json!({
            "type": "object",
            "additionalProperties": true,
            "description": "Arbitrary input parameters for the tool call"
        }),
    );

    properties.insert(
        "invocations".to_string(),
        json!({
            "type": "array",
            "description": "Any tool calls you need to make",
            "items": {
                "type": "object",
                "additionalProperties": false,
                "properties": invocation_properties,
                "required": ["toolName", "input"]
            }
        }),
    );

    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": properties,
    })
}

/// Inputs for the directive section of the system prompt.
#[derive(Clone, Debug, Default)]
pub struct SystemPromptInput<'a> {
    pub has_result_schema: bool,
    pub enable_result_grounding: bool,
    pub additional_context: Option<&'a str>,
    pub relevant_tools: &'a [ToolDescriptor],
    pub all_available_tools: &'a [String],
}

pub fn system_prompt(input: &SystemPromptInput<'_>) -> String {
    let mut lines: Vec<String> = vec![
        "You are a helpful assistant with access to a set of tools designed to assist in completing tasks.".into(),
        "You do not respond to greetings or small talk, and instead, you return 'done'.".into(),
        "Your goal is to produce a final result adhering to the final_result_schema.".into(),
    ];
    lines.push(if input.has_result_schema {
        "Pay special attention to the result property within the final_result_schema, as that will dictate the final output of the workflow and the tools you need to call in order to satisfy it.".into()
    } else {
        "Use the tools at your disposal to achieve the task requested.".into()
    });
    lines.extend([
        "Ground your output in the facts produced by the tools you call.".to_string(),
        "If you cannot complete a task with the given tools, return 'done' and explain the issue clearly in the message.".to_string(),
        "If there is nothing left to do, return 'done' and provide the final result.".to_string(),
        "If you encounter invocation errors (e.g., incorrect tool name, missing input), retry based on the error message.".to_string(),
        "When possible, return multiple invocations to trigger them in parallel.".to_string(),
    ]);

    if input.enable_result_grounding {
        lines.push("When referring to facts, reference the json path of the fact as a markdown link [value](jsonpath). JSON paths must start with the ULID.".into());
        lines.push("For example, [John](ULID.result.users[0].name)".into());
    }

    lines.push(if input.has_result_schema {
        "Once all tasks have been completed, return the final result as a structured json object in the requested format".into()
    } else {
        "Once all tasks have been completed, return the final result in markdown with your message.".into()
    });

    if let Some(context) = input.additional_context {
        lines.push(context.to_string());
    }

    lines.push("<TOOLS_SCHEMAS>".into());
    lines.extend(input.relevant_tools.iter().map(ToolDescriptor::prompt_line));
    lines.push("</TOOLS_SCHEMAS>".into());

    lines.push("<OTHER_AVAILABLE_TOOLS>".into());
    lines.extend(
        input
            .all_available_tools
            .iter()
            .filter(|name| !input.relevant_tools.iter().any(|tool| &tool.name == *name))
            .cloned(),
    );
    lines.push("</OTHER_AVAILABLE_TOOLS>".into());

    lines
        .iter()
        .map(|line| line.trim())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Directives followed by the schema the final answer must satisfy.
pub fn consolidated_prompt(system_prompt: &str, schema: &Value) -> String {
    let schema = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    format!(
        "<directives>\n{system_prompt}\n</directives>\n<final_result_schema>\n{schema}\n</final_result_schema>"
    )
}
