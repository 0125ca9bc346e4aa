//! Rate-Limited Batch Runner
//!
//! Drives a collection of diary entries through prompt building, cache
//! lookup, backend calls and schema validation, under a shared request
//! budget:
//!
//! - concurrency bounded by a semaphore (`max_concurrency`)
//! - outbound calls bounded per sliding 60-second window
//!   (`requests_per_minute`); every attempt, including retries, spends one
//!   slot
//! - identical in-flight requests deduplicated per fingerprint, so a batch
//!   never races two outbound calls for the same cache key
//!
//! Each entry is independent: one entry's backend or validation failure is
//! recorded against that entry and never aborts the batch. Only a missing
//! credential aborts, and it does so before any entry is dispatched.

use crate::annotate::backend::{backoff_delay, BackendError, LlmBackend};
use crate::annotate::cache::{CachedResponse, ResponseCache};
use crate::annotate::prompt::{BuiltRequest, InferenceParams};
use crate::annotate::schema;
use crate::config::RateLimitConfig;
use crate::types::{AnnotationOutcome, DiaryEntry};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ============================================================================
// Sliding-Window Rate Limiter
// ============================================================================

/// Bounds outbound calls to `limit` per sliding 60-second window. Callers
/// park in `acquire()` until a slot frees up.
struct SlidingWindowLimiter {
    limit: usize,
    window: Duration,
    issued: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            window: Duration::from_secs(60),
            issued: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until an outbound call is within budget, then claim the slot.
    async fn acquire(&self) {
        loop {
            let wait = {
                let mut issued = self.issued.lock().await;
                let now = Instant::now();
                while let Some(front) = issued.front() {
                    if now.duration_since(*front) >= self.window {
                        issued.pop_front();
                    } else {
                        break;
                    }
                }
                if issued.len() < self.limit {
                    issued.push_back(now);
                    return;
                }
                // Oldest call ages out first; sleep until it does.
                issued
                    .front()
                    .map(|front| self.window.saturating_sub(now.duration_since(*front)))
            };
            if let Some(wait) = wait {
                tokio::time::sleep(wait.max(Duration::from_millis(10))).await;
            }
        }
    }
}

// ============================================================================
// Batch Report
// ============================================================================

/// One processed entry with its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatedEntry {
    pub entry: DiaryEntry,
    pub outcome: AnnotationOutcome,
}

/// Result of one batch run: every processed entry plus run accounting.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub results: Vec<AnnotatedEntry>,
    /// Entries answered from the cache without an outbound call
    pub cache_hits: usize,
    /// Outbound calls actually issued
    pub calls_made: usize,
    /// Entries whose LLM output failed schema validation
    pub validation_failures: usize,
    /// Entries whose backend call failed after retries
    pub backend_failures: usize,
    /// Entries not dispatched because the run was cancelled
    pub skipped: usize,
}

impl BatchReport {
    /// Successfully structured meals, in completion order.
    pub fn structured_meals(&self) -> Vec<&crate::types::StructuredMeal> {
        self.results
            .iter()
            .filter_map(|r| r.outcome.meal())
            .collect()
    }
}

// ============================================================================
// Batch Runner
// ============================================================================

/// Processes diary entries through the full annotation pipeline under a
/// shared rate budget. Cheap to construct per run; the cache handle is the
/// only shared state and is passed in explicitly.
pub struct BatchRunner {
    backend: Arc<dyn LlmBackend>,
    cache: ResponseCache,
    params: InferenceParams,
    rate: RateLimitConfig,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        cache: ResponseCache,
        params: InferenceParams,
        rate: RateLimitConfig,
    ) -> Self {
        Self {
            backend,
            cache,
            params,
            rate,
            cancel: CancellationToken::new(),
        }
    }

    /// Token for cooperative cancellation: the runner stops dispatching new
    /// entries once cancelled but lets in-flight entries finish.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the batch to completion. Infallible per-entry: failures land in
    /// the report, not in the return type.
    pub async fn run(&self, entries: Vec<DiaryEntry>) -> BatchReport {
        let total = entries.len();
        info!(
            total,
            backend = self.backend.name(),
            model = %self.params.model,
            rpm = self.rate.requests_per_minute,
            max_concurrency = self.rate.max_concurrency,
            "Starting annotation batch"
        );

        let semaphore = Arc::new(Semaphore::new(self.rate.max_concurrency));
        let limiter = Arc::new(SlidingWindowLimiter::new(
            self.rate.requests_per_minute as usize,
        ));
        let in_flight: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let mut report = BatchReport::default();
        let mut tasks = JoinSet::new();

        for entry in entries {
            // Cooperative checkpoint: stop dispatching once cancelled.
            if self.cancel.is_cancelled() {
                report.skipped += 1;
                continue;
            }

            let backend = Arc::clone(&self.backend);
            let cache = self.cache.clone();
            let params = self.params.clone();
            let rate = self.rate.clone();
            let semaphore = Arc::clone(&semaphore);
            let limiter = Arc::clone(&limiter);
            let in_flight = Arc::clone(&in_flight);
            let cancel = self.cancel.clone();

            tasks.spawn(async move {
                // Closed only if the runner is dropped mid-run.
                let Ok(_permit) = semaphore.acquire().await else {
                    return (entry, None, false, false);
                };
                // Second checkpoint for entries that were queued on the
                // semaphore when the run was cancelled.
                if cancel.is_cancelled() {
                    return (entry, None, false, false);
                }
                let (entry, outcome, hit, called) =
                    process_entry(entry, backend, cache, params, rate, limiter, in_flight).await;
                (entry, Some(outcome), hit, called)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, None, _, _)) => report.skipped += 1,
                Ok((entry, Some(outcome), cache_hit, called_out)) => {
                    if cache_hit {
                        report.cache_hits += 1;
                    }
                    if called_out {
                        report.calls_made += 1;
                    }
                    match &outcome {
                        AnnotationOutcome::Invalid { .. } => report.validation_failures += 1,
                        AnnotationOutcome::Failed { .. } => report.backend_failures += 1,
                        AnnotationOutcome::Structured { .. } => {}
                    }
                    report.results.push(AnnotatedEntry { entry, outcome });
                }
                Err(e) => {
                    // A panicked task loses its entry pairing; count it so
                    // the run accounting still adds up.
                    warn!(error = %e, "Annotation task panicked");
                    report.backend_failures += 1;
                }
            }
        }

        if let Err(e) = self.cache.flush() {
            warn!(error = %e, "Failed to flush response cache");
        }

        info!(
            total,
            structured = report.results.iter().filter(|r| r.outcome.is_structured()).count(),
            cache_hits = report.cache_hits,
            calls_made = report.calls_made,
            validation_failures = report.validation_failures,
            backend_failures = report.backend_failures,
            skipped = report.skipped,
            "Annotation batch complete"
        );

        report
    }
}

/// Process one entry end to end.
///
/// Returns (entry, outcome, answered_from_cache, outbound_call_made).
async fn process_entry(
    entry: DiaryEntry,
    backend: Arc<dyn LlmBackend>,
    cache: ResponseCache,
    params: InferenceParams,
    rate: RateLimitConfig,
    limiter: Arc<SlidingWindowLimiter>,
    in_flight: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
) -> (DiaryEntry, AnnotationOutcome, bool, bool) {
    let request = BuiltRequest::build(&entry, &params);
    let fingerprint = request.fingerprint();

    // One lock per fingerprint: the first task with a given key calls out,
    // later tasks wait here and then hit the cache.
    let key_lock = {
        let mut map = in_flight.lock().await;
        Arc::clone(map.entry(fingerprint.clone()).or_default())
    };
    let _key_guard = key_lock.lock().await;

    match cache.lookup(&fingerprint) {
        Ok(Some(cached)) => {
            debug!(entry_id = %entry.id, fingerprint = %fingerprint, "Cache hit");
            let outcome = validate_raw(&entry, &cached.raw);
            return (entry, outcome, true, false);
        }
        Ok(None) => {}
        Err(e) => {
            // A broken cache read degrades to an outbound call rather than
            // failing the entry.
            warn!(entry_id = %entry.id, error = %e, "Cache lookup failed, calling backend");
        }
    }

    match call_with_budget(backend.as_ref(), &request, &rate, &limiter).await {
        Ok(raw) => {
            let cached = CachedResponse {
                raw: raw.clone(),
                backend: backend.name().to_string(),
                model: params.model.clone(),
                stored_at: Utc::now(),
            };
            if let Err(e) = cache.store(&fingerprint, &cached) {
                warn!(entry_id = %entry.id, error = %e, "Failed to store cache entry");
            }
            let outcome = validate_raw(&entry, &raw);
            (entry, outcome, false, true)
        }
        Err(e) => {
            warn!(entry_id = %entry.id, error = %e, "Backend call failed after retries");
            let outcome = AnnotationOutcome::Failed {
                entry_id: entry.id.clone(),
                error: e.to_string(),
            };
            (entry, outcome, false, true)
        }
    }
}

/// Call the backend, retrying transient failures up to `max_retries` times.
///
/// Each attempt is one outbound HTTP call and claims one rate-budget slot,
/// so retries under server pressure (429/5xx) never push traffic past
/// `requests_per_minute`.
async fn call_with_budget(
    backend: &dyn LlmBackend,
    request: &BuiltRequest,
    policy: &RateLimitConfig,
    limiter: &SlidingWindowLimiter,
) -> Result<String, BackendError> {
    let mut attempt = 0u32;
    loop {
        limiter.acquire().await;
        match backend.complete(request).await {
            Ok(raw) => return Ok(raw),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                let delay = backoff_delay(policy, attempt);
                warn!(
                    backend = backend.name(),
                    entry_id = %request.entry_id,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient backend failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Schema validation step shared by the cache-hit and fresh-call paths.
fn validate_raw(entry: &DiaryEntry, raw: &str) -> AnnotationOutcome {
    match schema::validate_response(entry, raw) {
        Ok(meal) => AnnotationOutcome::Structured { meal },
        Err(e) => AnnotationOutcome::Invalid {
            entry_id: entry.id.clone(),
            reason: e.to_string(),
            raw: raw.to_string(),
        },
    }
}
