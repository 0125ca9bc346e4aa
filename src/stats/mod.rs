//! Stratified Statistics
//!
//! Partitions aligned windows into clinical strata (BMI band, caloric
//! tertile), summarizes per-stratum glucose trajectories over relative-time
//! bins, and runs hypothesis tests:
//!
//! - between strata: Welch's t-test per shared time bin
//! - within a stratum: paired pre/post comparison, one pair per window
//!
//! Strata with fewer windows than the configured minimum are flagged
//! underpowered and excluded from testing — flagged, never silently
//! computed.

pub mod ttest;

pub use ttest::{paired_t_test, welch_t_test, SampleSummary};

use crate::config::StatsConfig;
use crate::types::{AlignedWindow, Stratum, StructuredMeal, SubjectProfile};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

// ============================================================================
// Report Types
// ============================================================================

/// Summary of one relative-time bin within a stratum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryBin {
    /// Bin start in minutes relative to the meal (bins are left-closed)
    pub bin_start_minutes: i64,
    pub mean_glucose: f64,
    pub variance: f64,
    /// Pooled sample count across all windows in the stratum
    pub n: usize,
}

/// Mean/variance glucose trajectory of one stratum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumTrajectory {
    pub stratum: Stratum,
    /// Number of aligned windows contributing
    pub window_count: usize,
    /// Bins ordered by start time
    pub bins: Vec<TrajectoryBin>,
}

/// Welch comparison of two strata at one time bin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinComparison {
    pub bin_start_minutes: i64,
    pub mean_a: f64,
    pub mean_b: f64,
    pub n_a: usize,
    pub n_b: usize,
    pub t_stat: f64,
    pub p_value: f64,
    pub significant: bool,
}

/// Between-stratum test across all shared time bins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetweenStratumTest {
    pub stratum_a: Stratum,
    pub stratum_b: Stratum,
    pub comparisons: Vec<BinComparison>,
}

/// Within-stratum paired pre/post comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrePostTest {
    pub stratum: Stratum,
    /// Windows contributing one (pre-mean, post-mean) pair each
    pub n_pairs: usize,
    /// Mean of (post − pre) differences in mg/dL
    pub mean_delta: f64,
    pub t_stat: f64,
    pub p_value: f64,
    pub significant: bool,
}

/// A stratum excluded from testing for insufficient sample size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnderpoweredStratum {
    pub stratum: Stratum,
    pub window_count: usize,
    pub required: usize,
}

/// Full statistical output for one analysis run.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StatsReport {
    pub trajectories: Vec<StratumTrajectory>,
    pub between_strata: Vec<BetweenStratumTest>,
    pub pre_post: Vec<PrePostTest>,
    pub underpowered: Vec<UnderpoweredStratum>,
}

// ============================================================================
// Stratification
// ============================================================================

/// Assign each window to a BMI stratum via its subject's profile. Windows
/// whose subject has no profile are left out (and counted in the log).
pub fn stratify_by_bmi<'a>(
    windows: &'a [AlignedWindow],
    profiles: &[SubjectProfile],
    bmi_threshold: f64,
) -> BTreeMap<Stratum, Vec<&'a AlignedWindow>> {
    let bmi_by_subject: HashMap<&str, f64> = profiles
        .iter()
        .map(|p| (p.subject_id.as_str(), p.bmi))
        .collect();

    let mut strata: BTreeMap<Stratum, Vec<&AlignedWindow>> = BTreeMap::new();
    let mut unmatched = 0usize;
    for window in windows {
        match bmi_by_subject.get(window.subject_id.as_str()) {
            Some(&bmi) if bmi < bmi_threshold => {
                strata.entry(Stratum::BmiBelow).or_default().push(window);
            }
            Some(_) => {
                strata.entry(Stratum::BmiAtOrAbove).or_default().push(window);
            }
            None => unmatched += 1,
        }
    }
    if unmatched > 0 {
        warn!(unmatched, "Windows without a subject profile left unstratified");
    }
    strata
}

/// Assign each window to a caloric tertile of the realized calorie
/// distribution. Rank-based split: group sizes differ by at most one.
pub fn stratify_by_calorie_tertile<'a>(
    windows: &'a [AlignedWindow],
    meals: &[StructuredMeal],
) -> BTreeMap<Stratum, Vec<&'a AlignedWindow>> {
    let calories_by_entry: HashMap<&str, f64> = meals
        .iter()
        .map(|m| (m.entry_id.as_str(), m.calories_kcal))
        .collect();

    let mut ranked: Vec<(&AlignedWindow, f64)> = windows
        .iter()
        .filter_map(|w| {
            calories_by_entry
                .get(w.entry_id.as_str())
                .map(|&kcal| (w, kcal))
        })
        .collect();
    ranked.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.entry_id.cmp(&b.0.entry_id))
    });

    let n = ranked.len();
    let mut strata: BTreeMap<Stratum, Vec<&AlignedWindow>> = BTreeMap::new();
    for (rank, (window, _)) in ranked.into_iter().enumerate() {
        let stratum = match rank * 3 / n.max(1) {
            0 => Stratum::CalorieTertileLow,
            1 => Stratum::CalorieTertileMid,
            _ => Stratum::CalorieTertileHigh,
        };
        strata.entry(stratum).or_default().push(window);
    }
    strata
}

// ============================================================================
// Trajectories
// ============================================================================

/// Left-closed bin start for a relative minute offset.
fn bin_start(minutes: f64, width: u32) -> i64 {
    let w = f64::from(width);
    ((minutes / w).floor() * w) as i64
}

/// Pool all samples of a stratum's windows into relative-time bins.
fn bin_samples(windows: &[&AlignedWindow], width: u32) -> BTreeMap<i64, Vec<f64>> {
    let mut bins: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for window in windows {
        for sample in &window.samples {
            bins.entry(bin_start(sample.minutes, width))
                .or_default()
                .push(sample.glucose_mg_dl);
        }
    }
    bins
}

/// Build the mean/variance trajectory for one stratum.
pub fn trajectory(stratum: Stratum, windows: &[&AlignedWindow], width: u32) -> StratumTrajectory {
    let bins = bin_samples(windows, width)
        .into_iter()
        .filter_map(|(start, values)| {
            SampleSummary::from_values(&values).map(|s| TrajectoryBin {
                bin_start_minutes: start,
                mean_glucose: s.mean,
                variance: s.variance,
                n: s.n,
            })
        })
        .collect();
    StratumTrajectory {
        stratum,
        window_count: windows.len(),
        bins,
    }
}

// ============================================================================
// Analysis
// ============================================================================

/// Run the full stratified analysis over one stratification.
fn analyze_strata(
    strata: &BTreeMap<Stratum, Vec<&AlignedWindow>>,
    cfg: &StatsConfig,
    report: &mut StatsReport,
) {
    // Partition into testable and underpowered strata first.
    let mut testable: Vec<(Stratum, &Vec<&AlignedWindow>)> = Vec::new();
    for (&stratum, windows) in strata {
        if windows.len() < cfg.min_windows_per_stratum {
            warn!(
                stratum = %stratum,
                windows = windows.len(),
                required = cfg.min_windows_per_stratum,
                "Stratum underpowered — excluded from significance testing"
            );
            report.underpowered.push(UnderpoweredStratum {
                stratum,
                window_count: windows.len(),
                required: cfg.min_windows_per_stratum,
            });
        } else {
            testable.push((stratum, windows));
        }
    }

    // Trajectories are reported for every stratum, testable or not.
    for (&stratum, windows) in strata {
        report
            .trajectories
            .push(trajectory(stratum, windows, cfg.bin_width_minutes));
    }

    // Between-stratum Welch tests per shared bin.
    for i in 0..testable.len() {
        for j in (i + 1)..testable.len() {
            let (stratum_a, windows_a) = (testable[i].0, testable[i].1);
            let (stratum_b, windows_b) = (testable[j].0, testable[j].1);

            let bins_a = bin_samples(windows_a, cfg.bin_width_minutes);
            let bins_b = bin_samples(windows_b, cfg.bin_width_minutes);

            let mut comparisons = Vec::new();
            for (start, values_a) in &bins_a {
                let Some(values_b) = bins_b.get(start) else {
                    continue;
                };
                let (Some(sa), Some(sb)) = (
                    SampleSummary::from_values(values_a),
                    SampleSummary::from_values(values_b),
                ) else {
                    continue;
                };
                if let Some((t_stat, p_value)) = welch_t_test(&sa, &sb) {
                    comparisons.push(BinComparison {
                        bin_start_minutes: *start,
                        mean_a: sa.mean,
                        mean_b: sb.mean,
                        n_a: sa.n,
                        n_b: sb.n,
                        t_stat,
                        p_value,
                        significant: p_value < cfg.significance_threshold,
                    });
                }
            }
            if !comparisons.is_empty() {
                report.between_strata.push(BetweenStratumTest {
                    stratum_a,
                    stratum_b,
                    comparisons,
                });
            }
        }
    }

    // Within-stratum paired pre/post tests.
    for (stratum, windows) in &testable {
        let deltas: Vec<f64> = windows
            .iter()
            .filter_map(|w| Some(w.post_meal_mean()? - w.pre_meal_mean()?))
            .collect();
        if let Some((mean_delta, t_stat, p_value)) = paired_t_test(&deltas) {
            report.pre_post.push(PrePostTest {
                stratum: *stratum,
                n_pairs: deltas.len(),
                mean_delta,
                t_stat,
                p_value,
                significant: p_value < cfg.significance_threshold,
            });
        }
    }
}

/// Full analysis: BMI strata and caloric tertiles over the same windows.
pub fn analyze(
    windows: &[AlignedWindow],
    meals: &[StructuredMeal],
    profiles: &[SubjectProfile],
    cfg: &StatsConfig,
) -> StatsReport {
    let mut report = StatsReport::default();

    let bmi_strata = stratify_by_bmi(windows, profiles, cfg.bmi_threshold);
    analyze_strata(&bmi_strata, cfg, &mut report);

    let tertile_strata = stratify_by_calorie_tertile(windows, meals);
    analyze_strata(&tertile_strata, cfg, &mut report);

    info!(
        trajectories = report.trajectories.len(),
        between_tests = report.between_strata.len(),
        pre_post_tests = report.pre_post.len(),
        underpowered = report.underpowered.len(),
        "Stratified analysis complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MealType, RelativeSample};
    use chrono::{TimeZone, Utc};

    fn window_with_profile(
        entry_id: &str,
        subject_id: &str,
        base_glucose: f64,
        rise: f64,
    ) -> AlignedWindow {
        // Samples every 30 min across ±90; glucose rises post-meal
        let samples = (-3..=3)
            .map(|i| RelativeSample {
                minutes: f64::from(i) * 30.0,
                glucose_mg_dl: if i >= 0 {
                    base_glucose + rise + f64::from(i)
                } else {
                    base_glucose + f64::from(i)
                },
            })
            .collect();
        AlignedWindow {
            entry_id: entry_id.to_string(),
            subject_id: subject_id.to_string(),
            meal_timestamp: Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap(),
            samples,
        }
    }

    fn meal(entry_id: &str, subject_id: &str, kcal: f64) -> StructuredMeal {
        StructuredMeal {
            entry_id: entry_id.to_string(),
            subject_id: subject_id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap(),
            meal_type: MealType::Lunch,
            calories_kcal: kcal,
            carbs_g: None,
            protein_g: None,
            fat_g: None,
            tags: vec![],
            confidence: 0.9,
        }
    }

    fn profile(subject_id: &str, bmi: f64) -> SubjectProfile {
        SubjectProfile {
            subject_id: subject_id.to_string(),
            bmi,
            age: None,
        }
    }

    fn cfg() -> StatsConfig {
        StatsConfig {
            bmi_threshold: 25.0,
            bin_width_minutes: 30,
            min_windows_per_stratum: 3,
            significance_threshold: 0.05,
        }
    }

    #[test]
    fn bin_start_left_closed_over_negatives() {
        assert_eq!(bin_start(-180.0, 30), -180);
        assert_eq!(bin_start(-1.0, 30), -30);
        assert_eq!(bin_start(0.0, 30), 0);
        assert_eq!(bin_start(29.9, 30), 0);
        assert_eq!(bin_start(30.0, 30), 30);
    }

    #[test]
    fn tertiles_differ_in_size_by_at_most_one() {
        for n in [6usize, 7, 8, 9, 10, 11] {
            let windows: Vec<AlignedWindow> = (0..n)
                .map(|i| window_with_profile(&format!("e{i}"), "s1", 100.0, 30.0))
                .collect();
            let meals: Vec<StructuredMeal> = (0..n)
                .map(|i| meal(&format!("e{i}"), "s1", 200.0 + i as f64 * 50.0))
                .collect();
            let strata = stratify_by_calorie_tertile(&windows, &meals);
            let sizes: Vec<usize> = strata.values().map(Vec::len).collect();
            assert_eq!(sizes.iter().sum::<usize>(), n);
            let max = sizes.iter().max().unwrap();
            let min = sizes.iter().min().unwrap();
            assert!(max - min <= 1, "n={n} sizes={sizes:?}");
        }
    }

    #[test]
    fn bmi_strata_split_at_threshold() {
        let windows = vec![
            window_with_profile("e1", "lean", 95.0, 25.0),
            window_with_profile("e2", "heavy", 110.0, 45.0),
        ];
        let profiles = vec![profile("lean", 22.0), profile("heavy", 29.0)];
        let strata = stratify_by_bmi(&windows, &profiles, 25.0);
        assert_eq!(strata[&Stratum::BmiBelow].len(), 1);
        assert_eq!(strata[&Stratum::BmiAtOrAbove].len(), 1);
    }

    #[test]
    fn between_stratum_test_reports_p_value_per_bin() {
        // 4 lean subjects with modest rises, 4 heavy subjects with large
        // rises — clearly separated post-meal.
        let mut windows = Vec::new();
        let mut profiles = Vec::new();
        for i in 0..4 {
            let lean = format!("lean{i}");
            windows.push(window_with_profile(&format!("el{i}"), &lean, 95.0 + f64::from(i), 20.0));
            profiles.push(profile(&lean, 21.0 + f64::from(i)));

            let heavy = format!("heavy{i}");
            windows.push(window_with_profile(&format!("eh{i}"), &heavy, 110.0 + f64::from(i), 60.0));
            profiles.push(profile(&heavy, 28.0 + f64::from(i)));
        }
        let meals: Vec<StructuredMeal> = windows
            .iter()
            .map(|w| meal(&w.entry_id, &w.subject_id, 400.0))
            .collect();

        let report = analyze(&windows, &meals, &profiles, &cfg());

        let bmi_test = report
            .between_strata
            .iter()
            .find(|t| t.stratum_a == Stratum::BmiBelow && t.stratum_b == Stratum::BmiAtOrAbove)
            .expect("BMI comparison present");
        // Every shared bin gets a p-value
        assert!(!bmi_test.comparisons.is_empty());
        for c in &bmi_test.comparisons {
            assert!((0.0..=1.0).contains(&c.p_value));
        }
        // Post-meal bins separate the strata decisively
        let post = bmi_test
            .comparisons
            .iter()
            .find(|c| c.bin_start_minutes == 60)
            .expect("post-meal bin");
        assert!(post.significant, "post-meal separation, p={}", post.p_value);
    }

    #[test]
    fn underpowered_stratum_flagged_and_not_tested() {
        // Only 1 lean window, 4 heavy → lean flagged, no between test.
        let mut windows = vec![window_with_profile("e0", "lean0", 95.0, 20.0)];
        let mut profiles = vec![profile("lean0", 21.0)];
        for i in 0..4 {
            let heavy = format!("heavy{i}");
            windows.push(window_with_profile(&format!("eh{i}"), &heavy, 110.0, 60.0));
            profiles.push(profile(&heavy, 28.0));
        }

        let mut report = StatsReport::default();
        let strata = stratify_by_bmi(&windows, &profiles, 25.0);
        analyze_strata(&strata, &cfg(), &mut report);

        assert!(report
            .underpowered
            .iter()
            .any(|u| u.stratum == Stratum::BmiBelow && u.window_count == 1));
        assert!(report.between_strata.is_empty());
        // Trajectory still reported for the underpowered stratum
        assert!(report
            .trajectories
            .iter()
            .any(|t| t.stratum == Stratum::BmiBelow));
    }

    #[test]
    fn pre_post_rise_detected() {
        // Rise varies per window so the paired differences have variance
        let windows: Vec<AlignedWindow> = (0..6)
            .map(|i| {
                window_with_profile(
                    &format!("e{i}"),
                    &format!("s{i}"),
                    100.0 + f64::from(i),
                    32.0 + 2.0 * f64::from(i),
                )
            })
            .collect();
        let profiles: Vec<SubjectProfile> =
            (0..6).map(|i| profile(&format!("s{i}"), 28.0)).collect();
        let meals: Vec<StructuredMeal> = windows
            .iter()
            .map(|w| meal(&w.entry_id, &w.subject_id, 400.0))
            .collect();

        let report = analyze(&windows, &meals, &profiles, &cfg());
        let test = report
            .pre_post
            .iter()
            .find(|t| t.stratum == Stratum::BmiAtOrAbove)
            .expect("pre/post test present");
        assert!(test.mean_delta > 30.0);
        assert!(test.significant, "p={}", test.p_value);
    }
}
