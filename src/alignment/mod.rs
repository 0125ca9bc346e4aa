//! CGM Alignment
//!
//! Extracts fixed-offset slices of each subject's glucose series anchored to
//! meal timestamps, re-expressed in minutes relative to the meal. Meals with
//! insufficient surrounding CGM coverage are excluded with a recorded reason
//! rather than silently dropped.
//!
//! Window bounds are inclusive: every retained sample satisfies
//! `pre_offset <= t - meal_ts <= post_offset`.

use crate::config::AlignmentConfig;
use crate::types::{
    AlignedWindow, CgmReading, ExcludedMeal, ExclusionReason, RelativeSample, StructuredMeal,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Result of aligning one batch of meals against the CGM series.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AlignmentOutput {
    pub windows: Vec<AlignedWindow>,
    pub excluded: Vec<ExcludedMeal>,
}

/// Per-subject glucose series, sorted by timestamp for range extraction.
struct SubjectSeries<'a> {
    readings: Vec<&'a CgmReading>,
}

impl<'a> SubjectSeries<'a> {
    fn index(readings: &'a [CgmReading]) -> HashMap<&'a str, SubjectSeries<'a>> {
        let mut by_subject: HashMap<&str, SubjectSeries<'_>> = HashMap::new();
        for reading in readings {
            by_subject
                .entry(reading.subject_id.as_str())
                .or_insert_with(|| SubjectSeries { readings: Vec::new() })
                .readings
                .push(reading);
        }
        for series in by_subject.values_mut() {
            series.readings.sort_by_key(|r| r.timestamp);
        }
        by_subject
    }
}

/// Align every meal against its subject's glucose series.
pub fn align_windows(
    meals: &[StructuredMeal],
    readings: &[CgmReading],
    cfg: &AlignmentConfig,
) -> AlignmentOutput {
    let by_subject = SubjectSeries::index(readings);
    let pre = Duration::minutes(cfg.pre_offset_minutes);
    let post = Duration::minutes(cfg.post_offset_minutes);

    let mut output = AlignmentOutput::default();

    for meal in meals {
        let Some(series) = by_subject.get(meal.subject_id.as_str()) else {
            output.excluded.push(ExcludedMeal {
                entry_id: meal.entry_id.clone(),
                subject_id: meal.subject_id.clone(),
                reason: ExclusionReason::NoReadingsForSubject,
            });
            continue;
        };

        let start = meal.timestamp + pre;
        let end = meal.timestamp + post;

        let samples: Vec<RelativeSample> = series
            .readings
            .iter()
            .skip_while(|r| r.timestamp < start)
            .take_while(|r| r.timestamp <= end)
            .map(|r| RelativeSample {
                minutes: (r.timestamp - meal.timestamp).num_seconds() as f64 / 60.0,
                glucose_mg_dl: r.glucose_mg_dl,
            })
            .collect();

        if samples.len() < cfg.min_readings {
            output.excluded.push(ExcludedMeal {
                entry_id: meal.entry_id.clone(),
                subject_id: meal.subject_id.clone(),
                reason: ExclusionReason::InsufficientCoverage {
                    found: samples.len(),
                    required: cfg.min_readings,
                },
            });
            continue;
        }

        // Readings exactly at the meal timestamp count as post-meal.
        let pre_count = samples.iter().filter(|s| s.minutes < 0.0).count();
        let post_count = samples.len() - pre_count;
        if pre_count == 0 || post_count == 0 {
            output.excluded.push(ExcludedMeal {
                entry_id: meal.entry_id.clone(),
                subject_id: meal.subject_id.clone(),
                reason: ExclusionReason::OneSidedCoverage {
                    pre: pre_count,
                    post: post_count,
                },
            });
            continue;
        }

        debug!(
            entry_id = %meal.entry_id,
            subject_id = %meal.subject_id,
            samples = samples.len(),
            "Aligned window"
        );
        output.windows.push(AlignedWindow {
            entry_id: meal.entry_id.clone(),
            subject_id: meal.subject_id.clone(),
            meal_timestamp: meal.timestamp,
            samples,
        });
    }

    info!(
        meals = meals.len(),
        aligned = output.windows.len(),
        excluded = output.excluded.len(),
        "Alignment complete"
    );
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MealType;
    use chrono::{DateTime, TimeZone, Utc};

    fn meal(entry_id: &str, subject_id: &str, ts: DateTime<Utc>) -> StructuredMeal {
        StructuredMeal {
            entry_id: entry_id.to_string(),
            subject_id: subject_id.to_string(),
            timestamp: ts,
            meal_type: MealType::Lunch,
            calories_kcal: 400.0,
            carbs_g: None,
            protein_g: None,
            fat_g: None,
            tags: vec![],
            confidence: 0.9,
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap()
    }

    /// Readings every 15 minutes across ±4 h around noon.
    fn dense_readings(subject_id: &str) -> Vec<CgmReading> {
        (-16..=16)
            .map(|i| CgmReading {
                subject_id: subject_id.to_string(),
                timestamp: noon() + Duration::minutes(i * 15),
                glucose_mg_dl: 100.0 + i as f64,
            })
            .collect()
    }

    fn cfg() -> AlignmentConfig {
        AlignmentConfig {
            pre_offset_minutes: -180,
            post_offset_minutes: 180,
            min_readings: 6,
        }
    }

    #[test]
    fn window_samples_stay_within_offsets() {
        let meals = vec![meal("e1", "s1", noon())];
        let readings = dense_readings("s1");
        let output = align_windows(&meals, &readings, &cfg());

        assert_eq!(output.windows.len(), 1);
        assert!(output.excluded.is_empty());
        let window = &output.windows[0];
        // ±180 min inclusive at 15-min cadence → 25 samples
        assert_eq!(window.samples.len(), 25);
        for sample in &window.samples {
            assert!(sample.minutes >= -180.0 && sample.minutes <= 180.0);
        }
    }

    #[test]
    fn subject_without_readings_is_excluded() {
        let meals = vec![meal("e1", "s_missing", noon())];
        let readings = dense_readings("s1");
        let output = align_windows(&meals, &readings, &cfg());

        assert!(output.windows.is_empty());
        assert_eq!(output.excluded.len(), 1);
        assert_eq!(
            output.excluded[0].reason,
            ExclusionReason::NoReadingsForSubject
        );
    }

    #[test]
    fn sparse_coverage_is_excluded_with_counts() {
        let meals = vec![meal("e1", "s1", noon())];
        let readings: Vec<CgmReading> = dense_readings("s1").into_iter().take(14).collect();
        // Only readings well before the meal remain in the window
        let output = align_windows(
            &meals,
            &readings,
            &AlignmentConfig {
                min_readings: 20,
                ..cfg()
            },
        );

        assert_eq!(output.excluded.len(), 1);
        assert!(matches!(
            output.excluded[0].reason,
            ExclusionReason::InsufficientCoverage { required: 20, .. }
        ));
    }

    #[test]
    fn one_sided_coverage_is_excluded() {
        // All readings strictly after the meal
        let readings: Vec<CgmReading> = (1..=10)
            .map(|i| CgmReading {
                subject_id: "s1".to_string(),
                timestamp: noon() + Duration::minutes(i * 10),
                glucose_mg_dl: 120.0,
            })
            .collect();
        let output = align_windows(&[meal("e1", "s1", noon())], &readings, &cfg());

        assert_eq!(output.excluded.len(), 1);
        assert!(matches!(
            output.excluded[0].reason,
            ExclusionReason::OneSidedCoverage { pre: 0, .. }
        ));
    }

    #[test]
    fn readings_from_other_subjects_never_leak() {
        let meals = vec![meal("e1", "s1", noon())];
        let mut readings = dense_readings("s1");
        readings.extend(dense_readings("s2"));
        let output = align_windows(&meals, &readings, &cfg());

        assert_eq!(output.windows.len(), 1);
        assert_eq!(output.windows[0].samples.len(), 25);
    }

    #[test]
    fn unsorted_readings_are_handled() {
        let meals = vec![meal("e1", "s1", noon())];
        let mut readings = dense_readings("s1");
        readings.reverse();
        let output = align_windows(&meals, &readings, &cfg());

        assert_eq!(output.windows.len(), 1);
        let minutes: Vec<f64> = output.windows[0].samples.iter().map(|s| s.minutes).collect();
        let mut sorted = minutes.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(minutes, sorted);
    }
}
