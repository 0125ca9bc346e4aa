//! Glucolens: CGM / Food-Diary Research Toolkit
//!
//! Correlates continuous glucose monitoring (CGM) data with free-text food
//! diary entries:
//!
//! - **Annotate**: LLM-backed conversion of diary text into structured
//!   nutritional records — cached, rate-limited batch inference over
//!   OpenAI / Anthropic / local OpenAI-compatible backends
//! - **Alignment**: CGM windows anchored to meal events
//! - **Stats**: stratified trajectories and hypothesis tests (BMI bands,
//!   caloric tertiles)
//! - **Plot**: per-stratum trajectory figures

pub mod alignment;
pub mod annotate;
pub mod config;
pub mod ingest;
pub mod plot;
pub mod stats;
pub mod types;

// Re-export study configuration
pub use config::{BackendKind, ConfigError, StudyConfig};

// Re-export commonly used types
pub use types::{
    AlignedWindow, AnnotationOutcome, CgmReading, DiaryEntry, ExcludedMeal, ExclusionReason,
    MealType, Stratum, StructuredMeal, SubjectProfile,
};

// Re-export the annotation pipeline surface
pub use annotate::{
    annotate_entries, AnnotatedEntry, BatchReport, BatchRunner, CachedResponse, LlmBackend,
    ResponseCache,
};

// Re-export analysis outputs
pub use alignment::{align_windows, AlignmentOutput};
pub use stats::{analyze, StatsReport, StratumTrajectory};
