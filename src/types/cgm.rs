//! CGM readings, subject metadata, and event-aligned windows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One timestamped glucose reading for a subject. Append-only input,
/// externally sourced; never mutated by any component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CgmReading {
    pub subject_id: String,
    pub timestamp: DateTime<Utc>,
    /// Glucose concentration in mg/dL
    pub glucose_mg_dl: f64,
}

/// Clinical metadata for one subject, used for stratification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectProfile {
    pub subject_id: String,
    /// Body mass index in kg/m²
    pub bmi: f64,
    /// Age in years, when available
    pub age: Option<f64>,
}

/// One glucose sample re-expressed relative to its anchoring meal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativeSample {
    /// Minutes relative to the meal timestamp (negative = before)
    pub minutes: f64,
    pub glucose_mg_dl: f64,
}

/// Fixed-offset slice of CGM readings anchored to one meal event.
/// Derived on demand from readings + meals; not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedWindow {
    /// Diary entry id of the anchoring meal
    pub entry_id: String,
    pub subject_id: String,
    /// Meal timestamp the window is anchored to
    pub meal_timestamp: DateTime<Utc>,
    /// Samples ordered by relative minutes, all within the configured offsets
    pub samples: Vec<RelativeSample>,
}

impl AlignedWindow {
    /// Mean glucose strictly before the meal. Readings exactly at the meal
    /// timestamp count as post-meal.
    pub fn pre_meal_mean(&self) -> Option<f64> {
        Self::mean(self.samples.iter().filter(|s| s.minutes < 0.0))
    }

    /// Mean glucose at or after the meal.
    pub fn post_meal_mean(&self) -> Option<f64> {
        Self::mean(self.samples.iter().filter(|s| s.minutes >= 0.0))
    }

    fn mean<'a>(samples: impl Iterator<Item = &'a RelativeSample>) -> Option<f64> {
        let (mut sum, mut n) = (0.0, 0usize);
        for s in samples {
            sum += s.glucose_mg_dl;
            n += 1;
        }
        (n > 0).then(|| sum / n as f64)
    }
}

/// Why a meal was excluded from alignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Subject has no CGM readings at all
    NoReadingsForSubject,
    /// Fewer readings in the window than the configured minimum
    InsufficientCoverage { found: usize, required: usize },
    /// No reading on one side of the meal timestamp
    OneSidedCoverage { pre: usize, post: usize },
}

impl std::fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExclusionReason::NoReadingsForSubject => write!(f, "no CGM readings for subject"),
            ExclusionReason::InsufficientCoverage { found, required } => {
                write!(f, "{found} readings in window, {required} required")
            }
            ExclusionReason::OneSidedCoverage { pre, post } => {
                write!(f, "one-sided coverage (pre={pre}, post={post})")
            }
        }
    }
}

/// A meal excluded from alignment, with the recorded reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedMeal {
    pub entry_id: String,
    pub subject_id: String,
    pub reason: ExclusionReason,
}

/// Grouping key partitioning aligned windows for comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stratum {
    /// Subject BMI below the configured threshold
    BmiBelow,
    /// Subject BMI at or above the configured threshold
    BmiAtOrAbove,
    /// Lowest third of the realized calorie distribution
    CalorieTertileLow,
    CalorieTertileMid,
    CalorieTertileHigh,
}

impl std::fmt::Display for Stratum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stratum::BmiBelow => write!(f, "BMI below threshold"),
            Stratum::BmiAtOrAbove => write!(f, "BMI at/above threshold"),
            Stratum::CalorieTertileLow => write!(f, "Calorie tertile: low"),
            Stratum::CalorieTertileMid => write!(f, "Calorie tertile: mid"),
            Stratum::CalorieTertileHigh => write!(f, "Calorie tertile: high"),
        }
    }
}
