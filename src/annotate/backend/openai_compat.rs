//! OpenAI-compatible backend for local inference servers and gateways.
//!
//! Speaks the OpenAI chat-completions wire format against a configurable
//! endpoint: vLLM serving an open-weights model, or a LiteLLM gateway
//! fronting some other provider. Authentication is optional since local
//! servers typically run without keys.

use super::{status_to_error, BackendError, LlmBackend};
use crate::annotate::prompt::BuiltRequest;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const BACKEND_NAME: &str = "openai_compat";

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

/// Client for any endpoint speaking the OpenAI chat-completions format.
pub struct OpenAiCompatBackend {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl OpenAiCompatBackend {
    pub fn new(endpoint: &str, api_key: Option<&str>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiCompatBackend {
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

        let mut req = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let resp = req.send().await?;

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
