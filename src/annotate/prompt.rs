//! Prompt construction for meal annotation.
//!
//! Building a request is pure and deterministic: the same diary entry and
//! the same inference parameters always produce byte-identical prompts, so
//! the cache fingerprint is stable across runs.

use crate::config::{BackendConfig, BackendKind};
use crate::types::DiaryEntry;

/// System prompt embedding the response schema description. Fixed text —
/// changing it invalidates every cached fingerprint, which is intended.
const SYSTEM_PROMPT: &str = "\
You are a nutrition annotation assistant for a clinical glucose study. \
Given one free-text food diary entry, respond with a single JSON object and \
nothing else. Fields:
  \"meal_type\": one of \"breakfast\", \"lunch\", \"dinner\", \"snack\" (optional if unclear)
  \"calories_kcal\": number, estimated total energy of the described food
  \"carbs_g\": number, estimated carbohydrates in grams (optional)
  \"protein_g\": number, estimated protein in grams (optional)
  \"fat_g\": number, estimated fat in grams (optional)
  \"tags\": array of short lowercase food-category strings
  \"confidence\": number between 0 and 1
Estimate conservatively. Do not include explanations or markdown.";

/// Sampling parameters that participate in the cache fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceParams {
    pub backend: BackendKind,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl From<&BackendConfig> for InferenceParams {
    fn from(cfg: &BackendConfig) -> Self {
        Self {
            backend: cfg.kind,
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
        }
    }
}

/// A fully specified, backend-agnostic annotation request.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltRequest {
    pub entry_id: String,
    pub system: String,
    pub user: String,
    pub params: InferenceParams,
}

impl BuiltRequest {
    /// Build the request for one diary entry. No side effects.
    pub fn build(entry: &DiaryEntry, params: &InferenceParams) -> Self {
        let user = format!(
            "Diary entry recorded at {}:\n{}",
            entry.timestamp.format("%Y-%m-%d %H:%M"),
            entry.text.trim()
        );
        Self {
            entry_id: entry.id.clone(),
            system: SYSTEM_PROMPT.to_string(),
            user,
            params: params.clone(),
        }
    }

    /// Deterministic cache key for this request.
    ///
    /// md5 hex digest over a canonical `|`-joined encoding of backend, model,
    /// sampling parameters, and both prompts. Temperature is formatted to
    /// three decimals so semantically equal configs hash identically.
    pub fn fingerprint(&self) -> String {
        let canonical = format!(
            "{}|{}|{:.3}|{}|{}|{}",
            self.params.backend,
            self.params.model,
            self.params.temperature,
            self.params.max_tokens,
            self.system,
            self.user
        );
        format!("{:x}", md5::compute(canonical.as_bytes()))
    }
}
