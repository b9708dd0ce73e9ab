use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::error;

use crate::tools::tool::{AgentTool, ToolCall, ToolDescriptor, ToolResponse};

pub const GET_URL_TOOL_NAME: &str = "getUrl";

#[derive(Clone, Debug, PartialEq)]
pub struct FetchedPage {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// Fetches the content behind a URL.
#[async_trait]
pub trait UrlFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, String>;
}

/// `reqwest` fetcher with a request timeout and a body size cap.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_body_chars: usize,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_body_chars: usize) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| error.to_string())?;
        Ok(Self {
            client,
            max_body_chars,
        })
    }
}

#[async_trait]
impl UrlFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| error.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP error! status: {}", status.as_u16()));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|error| error.to_string())?;
        Ok(FetchedPage {
            status: status.as_u16(),
            content_type,
            body: body.chars().take(self.max_body_chars).collect(),
        })
    }
}

pub fn get_url_tool(fetcher: Arc<dyn UrlFetcher>) -> AgentTool {
    AgentTool::new(
        ToolDescriptor::new(
            GET_URL_TOOL_NAME,
            "Fetches content from a URL and returns it.",
            json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "The URL to fetch content from",
                        "pattern": "^https?://"
                    }
                },
                "required": ["url"]
            }),
        ),
        Arc::new(move |call: ToolCall| {
            let fetcher = fetcher.clone();
            Box::pin(async move {
                let url = call
                    .input
                    .get("url")
                    .and_then(|value| value.as_str())
                    .unwrap_or_default()
                    .to_string();
                match fetcher.fetch(&url).await {
                    Ok(page) => ToolResponse::resolution(json!({
                        "success": true,
                        "content": page.body,
                        "metadata": {
                            "status": page.status,
                            "contentType": page.content_type,
                        }
                    }))
                    .encode(),
                    Err(message) => {
                        error!(url = %url, error = %message, "failed to fetch URL content");
                        ToolResponse::resolution(json!({"success": false, "error": message}))
                            .with_status("error")
                            .encode()
                    }
                }
            })
        }),
    )
}
