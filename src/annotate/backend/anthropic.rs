//! Anthropic messages API backend.

use super::{status_to_error, BackendError, LlmBackend};
use crate::annotate::prompt::BuiltRequest;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const BACKEND_NAME: &str = "anthropic";

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Client for the Anthropic messages API.
pub struct AnthropicBackend {
    http: reqwest::Client,
    api_key: String,
    url: String,
}

impl AnthropicBackend {
    pub fn new(api_key: &str, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_key: api_key.to_string(),
            url: API_URL.to_string(),
        }
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    async fn complete(&self, request: &BuiltRequest) -> Result<String, BackendError> {
        // Anthropic takes the system prompt as a top-level field, not a message.
        let body = serde_json::json!({
            "model": request.params.model,
            "max_tokens": request.params.max_tokens,
            "temperature": request.params.temperature,
            "system": request.system,
            "messages": [
                {"role": "user", "content": request.user},
            ],
        });

        let resp = self
            .http
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_to_error(BACKEND_NAME, status));
        }

        let parsed: MessagesResponse =
            resp.json().await.map_err(|e| BackendError::MalformedResponse {
                backend: BACKEND_NAME,
                detail: e.to_string(),
            })?;

        parsed
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or(BackendError::MalformedResponse {
                backend: BACKEND_NAME,
                detail: "response contained no text block".to_string(),
            })
    }

    fn name(&self) -> &'static str {
        BACKEND_NAME
    }
}
