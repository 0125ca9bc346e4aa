//! LLM Annotation Pipeline
//!
//! Turns free-text diary entries into validated `StructuredMeal` records:
//!
//! ```text
//! DiaryEntry → prompt → cache lookup → backend (on miss) → schema validation
//! ```
//!
//! - `prompt`: deterministic request construction + cache fingerprinting
//! - `schema`: strict deserialize-then-validate of LLM output
//! - `backend`: uniform adapter over OpenAI / Anthropic / local servers
//! - `cache`: on-disk request→response store, at most one paid call per
//!   unique request across runs
//! - `runner`: concurrent, rate-limited batch execution with per-entry
//!   fault isolation

pub mod backend;
pub mod cache;
pub mod prompt;
pub mod runner;
pub mod schema;

pub use backend::{create_backend, BackendError, LlmBackend};
pub use cache::{CacheError, CachedResponse, ResponseCache};
pub use prompt::{BuiltRequest, InferenceParams};
pub use runner::{AnnotatedEntry, BatchReport, BatchRunner};
pub use schema::{validate_response, ValidationError};

use crate::config::{ConfigError, StudyConfig};
use crate::types::DiaryEntry;

/// Run the full annotation pipeline with the configured backend and cache.
///
/// Fails only on configuration problems (missing credentials, unopenable
/// cache directory) — and does so before any outbound call. Per-entry
/// failures are recorded inside the returned report.
pub async fn annotate_entries(
    config: &StudyConfig,
    entries: Vec<DiaryEntry>,
) -> Result<BatchReport, ConfigError> {
    let backend = create_backend(&config.backend)?;
    let cache = ResponseCache::open(&config.cache.dir).map_err(|e| {
        ConfigError::Invalid(format!(
            "cannot open response cache at {}: {e}",
            config.cache.dir.display()
        ))
    })?;

    let runner = BatchRunner::new(
        backend,
        cache,
        InferenceParams::from(&config.backend),
        config.rate_limit.clone(),
    );
    Ok(runner.run(entries).await)
}
