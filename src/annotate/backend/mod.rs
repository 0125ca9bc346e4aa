//! Model Client Adapter
//!
//! Uniform interface over heterogeneous LLM backends. Each backend hides its
//! own authentication and request formatting behind the `LlmBackend` trait;
//! the rest of the pipeline only sees prompt in, raw text out.
//!
//! ## Backends
//!
//! - **OpenAiBackend**: OpenAI chat completions API
//! - **AnthropicBackend**: Anthropic messages API
//! - **OpenAiCompatBackend**: any endpoint speaking the OpenAI wire format
//!   (vLLM, LiteLLM gateway) — covers both the local inference server and
//!   compatibility-layer cases
//!
//! Transient failures (transport errors, 429, 5xx) are classified via
//! `is_transient()` and retried by the batch runner with bounded exponential
//! backoff; auth failures propagate immediately. The retry loop lives with
//! the runner so every attempt spends a rate-budget slot.

use crate::config::{BackendConfig, BackendKind, ConfigError, RateLimitConfig};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

mod anthropic;
mod openai;
mod openai_compat;

pub use anthropic::AnthropicBackend;
pub use openai::OpenAiBackend;
pub use openai_compat::OpenAiCompatBackend;

use super::prompt::BuiltRequest;

/// Errors from a single backend invocation.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Transport-level failure (connection refused, timeout, DNS)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Credentials rejected (401 / 403). Never retried.
    #[error("authentication rejected by {backend} (status {status})")]
    Auth { backend: &'static str, status: u16 },

    /// Request budget exhausted server-side (429)
    #[error("rate limited by {backend}")]
    RateLimited { backend: &'static str },

    /// Backend-side failure (5xx)
    #[error("{backend} server error (status {status})")]
    Server { backend: &'static str, status: u16 },

    /// Response arrived but its envelope could not be interpreted
    #[error("malformed response from {backend}: {detail}")]
    MalformedResponse { backend: &'static str, detail: String },

    /// Any other non-success status
    #[error("{backend} returned unexpected status {status}")]
    Unexpected { backend: &'static str, status: u16 },
}

impl BackendError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::Http(_) | BackendError::RateLimited { .. } | BackendError::Server { .. }
        )
    }
}

/// Unified trait for LLM backends.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Issue one completion call; exactly one outbound request.
    async fn complete(&self, request: &BuiltRequest) -> Result<String, BackendError>;

    /// Backend name for logging and cache metadata.
    fn name(&self) -> &'static str;
}

/// Build the configured backend, verifying credentials up front.
///
/// A missing API key is a `ConfigError` and aborts before any entry is
/// processed — never a per-entry failure.
pub fn create_backend(cfg: &BackendConfig) -> Result<Arc<dyn LlmBackend>, ConfigError> {
    let timeout = Duration::from_secs(cfg.request_timeout_secs);
    let backend: Arc<dyn LlmBackend> = match cfg.kind {
        BackendKind::OpenAi => {
            let key = std::env::var("OPENAI_API_KEY").map_err(|_| ConfigError::MissingCredential {
                backend: "openai",
                env_var: "OPENAI_API_KEY",
            })?;
            Arc::new(OpenAiBackend::new(&key, timeout))
        }
        BackendKind::Anthropic => {
            let key =
                std::env::var("ANTHROPIC_API_KEY").map_err(|_| ConfigError::MissingCredential {
                    backend: "anthropic",
                    env_var: "ANTHROPIC_API_KEY",
                })?;
            Arc::new(AnthropicBackend::new(&key, timeout))
        }
        BackendKind::OpenAiCompat => {
            // Local servers usually run unauthenticated; the key is optional.
            let key = std::env::var("LOCAL_LLM_API_KEY").ok();
            Arc::new(OpenAiCompatBackend::new(
                &cfg.local_endpoint,
                key.as_deref(),
                timeout,
            ))
        }
    };

    debug!(backend = backend.name(), model = %cfg.model, "Backend ready");
    Ok(backend)
}

/// Delay before retry `attempt` (0-based): `base * 2^attempt` plus up to 25%
/// jitter, capped at the configured ceiling.
pub fn backoff_delay(policy: &RateLimitConfig, attempt: u32) -> Duration {
    let exp = policy
        .base_backoff_ms
        .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX))
        .min(policy.max_backoff_ms);
    let jitter = rand::thread_rng().gen_range(0..=exp / 4);
    Duration::from_millis((exp + jitter).min(policy.max_backoff_ms))
}

/// Map an HTTP status into the backend error taxonomy. Shared by all
/// backend implementations.
pub(crate) fn status_to_error(backend: &'static str, status: reqwest::StatusCode) -> BackendError {
    match status.as_u16() {
        401 | 403 => BackendError::Auth {
            backend,
            status: status.as_u16(),
        },
        429 => BackendError::RateLimited { backend },
        s if s >= 500 => BackendError::Server { backend, status: s },
        s => BackendError::Unexpected { backend, status: s },
    }
}
