//! Core domain types shared across the pipeline.
//!
//! - `diary`: free-text food events and the structured meals the LLM step
//!   produces from them.
//! - `cgm`: glucose readings, subject metadata, and the event-aligned
//!   windows derived from them.

mod cgm;
mod diary;

pub use cgm::{
    AlignedWindow, CgmReading, ExcludedMeal, ExclusionReason, RelativeSample, Stratum,
    SubjectProfile,
};
pub use diary::{AnnotationOutcome, DiaryEntry, MealType, StructuredMeal};
