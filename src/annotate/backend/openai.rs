//! OpenAI chat completions backend.

use super::{status_to_error, BackendError, LlmBackend};
use crate::annotate::prompt::BuiltRequest;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const API_URL: &str = "https://api.openai.com/v1/chat/completions";
const BACKEND_NAME: &str = "openai";

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Client for the OpenAI chat completions API.
pub struct OpenAiBackend {
    http: reqwest::Client,
    api_key: String,
    url: String,
}

impl OpenAiBackend {
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
impl LlmBackend for OpenAiBackend {
    async fn complete(&self, request: &BuiltRequest) -> Result<String, BackendError> {
        let body = serde_json::json!({
            "model": request.params.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "max_tokens": request.params.max_tokens,
            "temperature": request.params.temperature,
        });

        let resp = self
            .http
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_to_error(BACKEND_NAME, status));
        }

        let parsed: ChatCompletionResponse =
            resp.json().await.map_err(|e| BackendError::MalformedResponse {
                backend: BACKEND_NAME,
                detail: e.to_string(),
            })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(BackendError::MalformedResponse {
                backend: BACKEND_NAME,
                detail: "response contained no choices".to_string(),
            })
    }

    fn name(&self) -> &'static str {
        BACKEND_NAME
    }
}
