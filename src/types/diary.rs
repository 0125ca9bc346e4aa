//! Diary entries and structured meal records.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// A single free-text food diary event, immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiaryEntry {
    /// Stable identifier for this entry (unique within a study)
    pub id: String,
    /// Subject the entry belongs to
    pub subject_id: String,
    /// When the food event occurred
    pub timestamp: DateTime<Utc>,
    /// Raw diary text, e.g. "Lunch: grilled chicken salad, 350 kcal"
    pub text: String,
}

/// Meal classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealType {
    /// Fallback classification by hour of day, used when the LLM omits the
    /// field: before 10:00 breakfast, before 15:00 lunch, otherwise dinner.
    pub fn from_hour(timestamp: &DateTime<Utc>) -> Self {
        match timestamp.hour() {
            h if h < 10 => MealType::Breakfast,
            h if h < 15 => MealType::Lunch,
            _ => MealType::Dinner,
        }
    }

    /// Parse the loose strings LLMs produce ("lunch", "Lunch ", "LUNCH").
    pub fn parse_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "breakfast" => Some(MealType::Breakfast),
            "lunch" => Some(MealType::Lunch),
            "dinner" | "supper" => Some(MealType::Dinner),
            "snack" => Some(MealType::Snack),
            _ => None,
        }
    }
}

impl std::fmt::Display for MealType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MealType::Breakfast => write!(f, "Breakfast"),
            MealType::Lunch => write!(f, "Lunch"),
            MealType::Dinner => write!(f, "Dinner"),
            MealType::Snack => write!(f, "Snack"),
        }
    }
}

/// Validated nutritional record produced from one diary entry.
///
/// Created only after the raw LLM output passes schema validation; carries
/// the originating entry id so every meal traces back to exactly one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredMeal {
    /// Id of the diary entry this meal was derived from
    pub entry_id: String,
    /// Subject the meal belongs to
    pub subject_id: String,
    /// Event timestamp (copied from the diary entry)
    pub timestamp: DateTime<Utc>,
    /// Meal classification
    pub meal_type: MealType,
    /// Estimated caloric content in kcal
    pub calories_kcal: f64,
    /// Estimated carbohydrates in grams, when the model reports them
    pub carbs_g: Option<f64>,
    /// Estimated protein in grams
    pub protein_g: Option<f64>,
    /// Estimated fat in grams
    pub fat_g: Option<f64>,
    /// Free-form macronutrient / food-category tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Model self-reported confidence, 0.0-1.0
    pub confidence: f64,
}

/// Per-entry result of the annotation pipeline.
///
/// Failures are recorded, never dropped: invalid LLM output keeps the raw
/// payload for inspection, backend failures keep the final error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AnnotationOutcome {
    /// Validation succeeded
    Structured { meal: StructuredMeal },
    /// LLM responded but the output failed schema validation
    Invalid {
        entry_id: String,
        reason: String,
        raw: String,
    },
    /// Backend call failed after retries were exhausted
    Failed { entry_id: String, error: String },
}

impl AnnotationOutcome {
    /// Entry this outcome belongs to.
    pub fn entry_id(&self) -> &str {
        match self {
            AnnotationOutcome::Structured { meal } => &meal.entry_id,
            AnnotationOutcome::Invalid { entry_id, .. } => entry_id,
            AnnotationOutcome::Failed { entry_id, .. } => entry_id,
        }
    }

    /// True for the success variant.
    pub fn is_structured(&self) -> bool {
        matches!(self, AnnotationOutcome::Structured { .. })
    }

    /// The structured meal, if validation succeeded.
    pub fn meal(&self) -> Option<&StructuredMeal> {
        match self {
            AnnotationOutcome::Structured { meal } => Some(meal),
            _ => None,
        }
    }
}
