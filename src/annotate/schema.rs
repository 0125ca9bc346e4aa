//! Response schema: strict deserialize-then-validate of LLM output.
//!
//! LLMs return almost-JSON: code fences, leading prose, trailing notes. The
//! extraction step tolerates that wrapping, but the record itself is parsed
//! strictly and range-checked. Failure always keeps the raw payload so a
//! malformed response can be inspected later.

use crate::types::{DiaryEntry, MealType, StructuredMeal};
use serde::Deserialize;
use thiserror::Error;

/// Hard ceiling on a single meal's calories; anything above is treated as a
/// model hallucination rather than a plausible estimate.
const MAX_CALORIES_KCAL: f64 = 10_000.0;

/// Schema validation failure for one entry. Recorded, never fatal.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("no JSON object found in response")]
    NoJsonObject,

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field {field} out of range: {detail}")]
    OutOfRange { field: &'static str, detail: String },

    #[error("unrecognized meal_type: {0:?}")]
    UnknownMealType(String),
}

/// Raw record as the model reports it, before range checks.
#[derive(Debug, Deserialize)]
struct RawMealRecord {
    meal_type: Option<String>,
    calories_kcal: Option<f64>,
    carbs_g: Option<f64>,
    protein_g: Option<f64>,
    fat_g: Option<f64>,
    #[serde(default)]
    tags: Vec<String>,
    confidence: Option<f64>,
}

/// Extract the first top-level JSON object from a raw LLM response,
/// stripping markdown code fences when present.
fn extract_json_object(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();

    // ```json ... ``` or ``` ... ```
    let inner = if let Some(stripped) = trimmed.strip_prefix("```") {
        let stripped = stripped.trim_start_matches("json").trim_start();
        stripped.split("```").next().unwrap_or(stripped)
    } else {
        trimmed
    };

    // Balance braces from the first '{' so trailing prose is ignored
    let start = inner.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in inner[start..].char_indices() {
        if in_string {
            match ch {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => in_string = false,
                _ => escaped = false,
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&inner[start..=start + i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse and validate one raw LLM response into a `StructuredMeal`.
///
/// The diary entry supplies provenance (entry id, subject, timestamp) and
/// the hour-of-day fallback when the model omits `meal_type`.
pub fn validate_response(entry: &DiaryEntry, raw: &str) -> Result<StructuredMeal, ValidationError> {
    let json = extract_json_object(raw).ok_or(ValidationError::NoJsonObject)?;
    let record: RawMealRecord = serde_json::from_str(json)?;

    let calories = record
        .calories_kcal
        .ok_or(ValidationError::MissingField("calories_kcal"))?;
    if !calories.is_finite() || calories <= 0.0 || calories >= MAX_CALORIES_KCAL {
        return Err(ValidationError::OutOfRange {
            field: "calories_kcal",
            detail: format!("{calories} not in (0, {MAX_CALORIES_KCAL})"),
        });
    }

    let confidence = record
        .confidence
        .ok_or(ValidationError::MissingField("confidence"))?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(ValidationError::OutOfRange {
            field: "confidence",
            detail: format!("{confidence} not in 0..=1"),
        });
    }

    let meal_type = match record.meal_type {
        Some(s) => MealType::parse_loose(&s).ok_or(ValidationError::UnknownMealType(s))?,
        None => MealType::from_hour(&entry.timestamp),
    };

    for (name, value) in [
        ("carbs_g", record.carbs_g),
        ("protein_g", record.protein_g),
        ("fat_g", record.fat_g),
    ] {
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                return Err(ValidationError::OutOfRange {
                    field: match name {
                        "carbs_g" => "carbs_g",
                        "protein_g" => "protein_g",
                        _ => "fat_g",
                    },
                    detail: format!("{v} is negative or non-finite"),
                });
            }
        }
    }

    Ok(StructuredMeal {
        entry_id: entry.id.clone(),
        subject_id: entry.subject_id.clone(),
        timestamp: entry.timestamp,
        meal_type,
        calories_kcal: calories,
        carbs_g: record.carbs_g,
        protein_g: record.protein_g,
        fat_g: record.fat_g,
        tags: record.tags,
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn lunch_entry() -> DiaryEntry {
        DiaryEntry {
            id: "e1".to_string(),
            subject_id: "s1".to_string(),
            timestamp: Utc.with_ymd_and_hms(2023, 5, 1, 12, 15, 0).unwrap(),
            text: "Lunch: grilled chicken salad, 350 kcal".to_string(),
        }
    }

    #[test]
    fn valid_response_parses() {
        let raw = r#"{"meal_type": "lunch", "calories_kcal": 350, "carbs_g": 12,
                      "protein_g": 30, "fat_g": 18, "tags": ["salad", "poultry"],
                      "confidence": 0.9}"#;
        let meal = validate_response(&lunch_entry(), raw).unwrap();
        assert_eq!(meal.meal_type, MealType::Lunch);
        assert!((meal.calories_kcal - 350.0).abs() < f64::EPSILON);
        assert_eq!(meal.entry_id, "e1");
        assert_eq!(meal.tags, vec!["salad", "poultry"]);
    }

    #[test]
    fn fenced_response_parses() {
        let raw = "```json\n{\"calories_kcal\": 200, \"confidence\": 0.8}\n```";
        let meal = validate_response(&lunch_entry(), raw).unwrap();
        assert!((meal.calories_kcal - 200.0).abs() < f64::EPSILON);
        // meal_type omitted → hour-of-day fallback (12:15 → lunch)
        assert_eq!(meal.meal_type, MealType::Lunch);
    }

    #[test]
    fn response_with_trailing_prose_parses() {
        let raw = "{\"calories_kcal\": 420, \"confidence\": 0.7} \nNote: rough estimate.";
        let meal = validate_response(&lunch_entry(), raw).unwrap();
        assert!((meal.calories_kcal - 420.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_calories_rejected() {
        let raw = r#"{"meal_type": "lunch", "confidence": 0.9}"#;
        let err = validate_response(&lunch_entry(), raw).unwrap_err();
        assert!(matches!(err, ValidationError::MissingField("calories_kcal")));
    }

    #[test]
    fn missing_confidence_rejected() {
        let raw = r#"{"calories_kcal": 350}"#;
        let err = validate_response(&lunch_entry(), raw).unwrap_err();
        assert!(matches!(err, ValidationError::MissingField("confidence")));
    }

    #[test]
    fn implausible_calories_rejected() {
        let raw = r#"{"calories_kcal": 50000, "confidence": 0.9}"#;
        assert!(matches!(
            validate_response(&lunch_entry(), raw),
            Err(ValidationError::OutOfRange { field: "calories_kcal", .. })
        ));
    }

    #[test]
    fn confidence_out_of_range_rejected() {
        let raw = r#"{"calories_kcal": 350, "confidence": 1.4}"#;
        assert!(matches!(
            validate_response(&lunch_entry(), raw),
            Err(ValidationError::OutOfRange { field: "confidence", .. })
        ));
    }

    #[test]
    fn unknown_meal_type_rejected() {
        let raw = r#"{"meal_type": "second breakfast", "calories_kcal": 350, "confidence": 0.9}"#;
        assert!(matches!(
            validate_response(&lunch_entry(), raw),
            Err(ValidationError::UnknownMealType(_))
        ));
    }

    #[test]
    fn negative_macro_rejected() {
        let raw = r#"{"calories_kcal": 350, "carbs_g": -5, "confidence": 0.9}"#;
        assert!(matches!(
            validate_response(&lunch_entry(), raw),
            Err(ValidationError::OutOfRange { field: "carbs_g", .. })
        ));
    }

    #[test]
    fn prose_without_json_rejected() {
        let err = validate_response(&lunch_entry(), "I cannot annotate this entry.").unwrap_err();
        assert!(matches!(err, ValidationError::NoJsonObject));
    }

    #[test]
    fn nested_braces_in_strings_handled() {
        let raw = r#"{"calories_kcal": 300, "confidence": 0.8, "tags": ["a{b}c"]}"#;
        let meal = validate_response(&lunch_entry(), raw).unwrap();
        assert_eq!(meal.tags, vec!["a{b}c"]);
    }
}
