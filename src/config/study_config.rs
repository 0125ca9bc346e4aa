//! Study configuration — every pipeline threshold as a tunable TOML value.
//!
//! Each section implements `Default` so a partial config file only overrides
//! what it names; a missing file means built-in defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised while loading or validating the study configuration.
/// Always fatal: the pipeline refuses to start on a bad config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("missing credential: {backend} backend requires the {env_var} environment variable")]
    MissingCredential {
        backend: &'static str,
        env_var: &'static str,
    },
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for an analysis run.
///
/// Load with `StudyConfig::load()` which searches:
/// 1. `$GLUCOLENS_CONFIG` env var
/// 2. `./glucolens.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudyConfig {
    /// LLM backend selection and sampling parameters
    #[serde(default)]
    pub backend: BackendConfig,

    /// Outbound request budget and retry policy
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Response cache location
    #[serde(default)]
    pub cache: CacheConfig,

    /// CGM window offsets around meal events
    #[serde(default)]
    pub alignment: AlignmentConfig,

    /// Stratification thresholds and significance testing
    #[serde(default)]
    pub stats: StatsConfig,

    /// Figure rendering
    #[serde(default)]
    pub plot: PlotConfig,
}

impl StudyConfig {
    /// Load configuration using the standard search order.
    pub fn load() -> Self {
        // 1. Check env var
        if let Ok(path) = std::env::var("GLUCOLENS_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded study config from GLUCOLENS_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from GLUCOLENS_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "GLUCOLENS_CONFIG points to non-existent file, falling back");
            }
        }

        // 2. Check ./glucolens.toml
        let local = PathBuf::from("glucolens.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded study config from ./glucolens.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./glucolens.toml, using defaults");
                }
            }
        }

        // 3. Defaults
        info!("No glucolens.toml found — using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path and validate.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.requests_per_minute == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.requests_per_minute must be > 0".to_string(),
            ));
        }
        if self.rate_limit.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.max_concurrency must be > 0".to_string(),
            ));
        }
        if self.alignment.pre_offset_minutes >= 0 {
            return Err(ConfigError::Invalid(
                "alignment.pre_offset_minutes must be negative".to_string(),
            ));
        }
        if self.alignment.post_offset_minutes <= 0 {
            return Err(ConfigError::Invalid(
                "alignment.post_offset_minutes must be positive".to_string(),
            ));
        }
        if self.alignment.min_readings < 2 {
            return Err(ConfigError::Invalid(
                "alignment.min_readings must be at least 2".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.stats.significance_threshold) {
            return Err(ConfigError::Invalid(
                "stats.significance_threshold must be in 0..=1".to_string(),
            ));
        }
        if self.stats.bin_width_minutes == 0 {
            return Err(ConfigError::Invalid(
                "stats.bin_width_minutes must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Which LLM backend to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// OpenAI chat completions API
    OpenAi,
    /// Anthropic messages API
    Anthropic,
    /// Local inference server or gateway speaking the OpenAI wire format
    /// (vLLM, LiteLLM)
    OpenAiCompat,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::OpenAi => write!(f, "openai"),
            BackendKind::Anthropic => write!(f, "anthropic"),
            BackendKind::OpenAiCompat => write!(f, "openai_compat"),
        }
    }
}

/// LLM backend selection and sampling parameters.
///
/// Credentials deliberately do not live in the TOML file: they come from the
/// environment (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `LOCAL_LLM_API_KEY`),
/// loaded via `.env` when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend selector
    #[serde(default = "default_backend_kind")]
    pub kind: BackendKind,

    /// Model identifier passed to the backend
    #[serde(default = "default_model")]
    pub model: String,

    /// Endpoint for the OpenAI-compatible backend; ignored by cloud backends
    #[serde(default = "default_local_endpoint")]
    pub local_endpoint: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Maximum tokens to generate per response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_backend_kind() -> BackendKind {
    BackendKind::OpenAi
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_local_endpoint() -> String {
    "http://localhost:8000/v1/chat/completions".to_string()
}
fn default_temperature() -> f64 {
    0.0
}
fn default_max_tokens() -> u32 {
    512
}
fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
            model: default_model(),
            local_endpoint: default_local_endpoint(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Outbound request budget and retry policy for the batch runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum outbound requests per sliding 60-second window
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Maximum concurrent in-flight requests
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Retry attempts for transient backend failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Backoff ceiling
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_requests_per_minute() -> u32 {
    60
}
fn default_max_concurrency() -> usize {
    8
}
fn default_max_retries() -> u32 {
    5
}
fn default_base_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            max_concurrency: default_max_concurrency(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Response cache location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory for the on-disk response cache
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data/inference_cache")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
        }
    }
}

/// CGM window offsets around meal events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentConfig {
    /// Window start relative to the meal, in minutes (negative)
    #[serde(default = "default_pre_offset_minutes")]
    pub pre_offset_minutes: i64,

    /// Window end relative to the meal, in minutes (positive)
    #[serde(default = "default_post_offset_minutes")]
    pub post_offset_minutes: i64,

    /// Minimum readings a window must contain to be retained
    #[serde(default = "default_min_readings")]
    pub min_readings: usize,
}

fn default_pre_offset_minutes() -> i64 {
    -180
}
fn default_post_offset_minutes() -> i64 {
    180
}
fn default_min_readings() -> usize {
    6
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            pre_offset_minutes: default_pre_offset_minutes(),
            post_offset_minutes: default_post_offset_minutes(),
            min_readings: default_min_readings(),
        }
    }
}

/// Stratification thresholds and significance testing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// BMI cut point for the above/below strata (kg/m²)
    #[serde(default = "default_bmi_threshold")]
    pub bmi_threshold: f64,

    /// Width of relative-time bins for trajectories, in minutes
    #[serde(default = "default_bin_width_minutes")]
    pub bin_width_minutes: u32,

    /// Strata with fewer aligned windows than this are flagged underpowered
    /// and excluded from significance testing
    #[serde(default = "default_min_windows_per_stratum")]
    pub min_windows_per_stratum: usize,

    /// Two-tailed p-value threshold used when reporting significance
    #[serde(default = "default_significance_threshold")]
    pub significance_threshold: f64,
}

fn default_bmi_threshold() -> f64 {
    25.0
}
fn default_bin_width_minutes() -> u32 {
    30
}
fn default_min_windows_per_stratum() -> usize {
    5
}
fn default_significance_threshold() -> f64 {
    0.05
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            bmi_threshold: default_bmi_threshold(),
            bin_width_minutes: default_bin_width_minutes(),
            min_windows_per_stratum: default_min_windows_per_stratum(),
            significance_threshold: default_significance_threshold(),
        }
    }
}

/// Figure rendering options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotConfig {
    #[serde(default = "default_plot_width")]
    pub width: u32,
    #[serde(default = "default_plot_height")]
    pub height: u32,
}

fn default_plot_width() -> u32 {
    1024
}
fn default_plot_height() -> u32 {
    640
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            width: default_plot_width(),
            height: default_plot_height(),
        }
    }
}
