//! Study Configuration Module
//!
//! All pipeline knobs (backend selection, rate limits, cache location,
//! alignment offsets, stratification thresholds) live in a TOML file rather
//! than constants scattered through the code.
//!
//! ## Loading Order
//!
//! 1. Explicit `--config` path from the CLI
//! 2. `GLUCOLENS_CONFIG` environment variable (path to TOML file)
//! 3. `glucolens.toml` in the current working directory
//! 4. Built-in defaults
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! // In main():
//! config::init(StudyConfig::load());
//!
//! // Anywhere in the codebase:
//! let rpm = config::get().rate_limit.requests_per_minute;
//! ```

mod study_config;

pub use study_config::*;

use std::sync::OnceLock;

/// Global study configuration, initialized once at startup.
static STUDY_CONFIG: OnceLock<StudyConfig> = OnceLock::new();

/// Initialize the global study configuration.
///
/// Must be called exactly once before any calls to `get()`.
pub fn init(config: StudyConfig) {
    if STUDY_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
    }
}

/// Get a reference to the global study configuration.
///
/// Panics if `init()` has not been called. A missing config is a fatal
/// startup error, not a recoverable condition.
pub fn get() -> &'static StudyConfig {
    STUDY_CONFIG
        .get()
        .expect("config::get() called before config::init() — this is a startup bug")
}

/// Check whether the config has been initialized.
///
/// Useful for tests and optional config paths.
pub fn is_initialized() -> bool {
    STUDY_CONFIG.get().is_some()
}
