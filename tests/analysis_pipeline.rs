//! Analysis Pipeline Integration Tests
//!
//! Drives CSV ingest, meal-anchored alignment, and stratified statistics
//! end to end over synthetic study data: two BMI groups with clearly
//! separated post-meal responses, fed through the same loaders the CLI uses.

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Duration, TimeZone, Utc};
use glucolens::config::{AlignmentConfig, StatsConfig};
use glucolens::types::{ExclusionReason, MealType, Stratum, StructuredMeal};
use glucolens::{align_windows, analyze, ingest};

// ============================================================================
// Synthetic Study Data
// ============================================================================

fn noon(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 5, day, 12, 0, 0).unwrap()
}

/// CGM CSV for one subject: readings every 15 minutes across ±3 h around
/// each meal, with a post-meal rise of `rise` mg/dL.
fn append_cgm_rows(csv: &mut String, subject: &str, meal_ts: DateTime<Utc>, base: f64, rise: f64) {
    for i in -12i64..=12 {
        let ts = meal_ts + Duration::minutes(i * 15);
        let glucose = if i >= 0 { base + rise } else { base } + i as f64 * 0.5;
        writeln!(
            csv,
            "{},{},{:.1}",
            subject,
            ts.format("%Y-%m-%d %H:%M:%S"),
            glucose
        )
        .unwrap();
    }
}

struct StudyFiles {
    _dir: tempfile::TempDir,
    cgm: PathBuf,
    subjects: PathBuf,
    meals: Vec<StructuredMeal>,
}

/// Two BMI groups, `per_group` subjects each, one lunch per subject:
/// lean subjects (BMI 21-24) rise ~20 mg/dL post-meal, heavy subjects
/// (BMI 28-31) rise ~60 mg/dL.
fn build_study(per_group: usize) -> StudyFiles {
    let dir = tempfile::tempdir().unwrap();

    let mut cgm_csv = String::from("subject_id,timestamp,glucose_mg_dl\n");
    let mut subjects_csv = String::from("subject_id,bmi,age\n");
    let mut meals = Vec::new();

    for i in 0..per_group {
        let day = 1 + i as u32;

        let lean = format!("lean{i}");
        append_cgm_rows(&mut cgm_csv, &lean, noon(day), 95.0 + i as f64, 20.0 + i as f64);
        writeln!(subjects_csv, "{},{:.1},{}", lean, 21.0 + i as f64, 40 + i).unwrap();
        meals.push(structured_meal(&format!("el{i}"), &lean, noon(day), 380.0));

        let heavy = format!("heavy{i}");
        append_cgm_rows(&mut cgm_csv, &heavy, noon(day), 110.0 + i as f64, 60.0 + i as f64);
        writeln!(subjects_csv, "{},{:.1},{}", heavy, 28.0 + i as f64, 50 + i).unwrap();
        meals.push(structured_meal(&format!("eh{i}"), &heavy, noon(day), 820.0));
    }

    let cgm = dir.path().join("cgm.csv");
    let subjects = dir.path().join("subjects.csv");
    std::fs::write(&cgm, cgm_csv).unwrap();
    std::fs::write(&subjects, subjects_csv).unwrap();

    StudyFiles {
        _dir: dir,
        cgm,
        subjects,
        meals,
    }
}

fn structured_meal(
    entry_id: &str,
    subject_id: &str,
    ts: DateTime<Utc>,
    kcal: f64,
) -> StructuredMeal {
    StructuredMeal {
        entry_id: entry_id.to_string(),
        subject_id: subject_id.to_string(),
        timestamp: ts,
        meal_type: MealType::Lunch,
        calories_kcal: kcal,
        carbs_g: Some(kcal * 0.12),
        protein_g: None,
        fat_g: None,
        tags: vec!["synthetic".to_string()],
        confidence: 0.95,
    }
}

fn alignment_cfg() -> AlignmentConfig {
    AlignmentConfig {
        pre_offset_minutes: -180,
        post_offset_minutes: 180,
        min_readings: 6,
    }
}

fn stats_cfg() -> StatsConfig {
    StatsConfig {
        bmi_threshold: 25.0,
        bin_width_minutes: 30,
        min_windows_per_stratum: 3,
        significance_threshold: 0.05,
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn ingest_align_stats_end_to_end() {
    let study = build_study(4);

    let readings = ingest::load_cgm_readings(&study.cgm).unwrap();
    let profiles = ingest::load_subject_profiles(&study.subjects).unwrap();
    assert_eq!(readings.len(), 8 * 25);
    assert_eq!(profiles.len(), 8);

    let aligned = align_windows(&study.meals, &readings, &alignment_cfg());
    assert_eq!(aligned.windows.len(), 8, "every meal has dense coverage");
    assert!(aligned.excluded.is_empty());

    // ±180 min inclusive at 15-min cadence
    for window in &aligned.windows {
        assert_eq!(window.samples.len(), 25);
        assert!(window
            .samples
            .iter()
            .all(|s| (-180.0..=180.0).contains(&s.minutes)));
    }

    let report = analyze(&aligned.windows, &study.meals, &profiles, &stats_cfg());

    // Trajectories for both BMI strata plus the three caloric tertiles
    assert!(report
        .trajectories
        .iter()
        .any(|t| t.stratum == Stratum::BmiBelow && t.window_count == 4));
    assert!(report
        .trajectories
        .iter()
        .any(|t| t.stratum == Stratum::BmiAtOrAbove && t.window_count == 4));
    assert!(report
        .trajectories
        .iter()
        .any(|t| matches!(t.stratum, Stratum::CalorieTertileLow)));

    // The BMI comparison assigns a p-value to every shared time bin
    let bmi_test = report
        .between_strata
        .iter()
        .find(|t| t.stratum_a == Stratum::BmiBelow && t.stratum_b == Stratum::BmiAtOrAbove)
        .expect("BMI comparison present");
    assert!(bmi_test.comparisons.len() >= 12, "one comparison per shared bin");
    for c in &bmi_test.comparisons {
        assert!((0.0..=1.0).contains(&c.p_value), "p={}", c.p_value);
    }

    // 40+ mg/dL separation post-meal: the late bins are decisive
    let post = bmi_test
        .comparisons
        .iter()
        .find(|c| c.bin_start_minutes == 60)
        .expect("post-meal bin present");
    assert!(post.mean_b > post.mean_a + 30.0);
    assert!(post.significant, "p={}", post.p_value);

    // Both strata show a significant pre/post rise
    for stratum in [Stratum::BmiBelow, Stratum::BmiAtOrAbove] {
        let test = report
            .pre_post
            .iter()
            .find(|t| t.stratum == stratum)
            .expect("pre/post test present");
        assert_eq!(test.n_pairs, 4);
        assert!(test.mean_delta > 10.0);
    }

    // Both BMI strata are large enough to test (tertiles may split 3/3/2)
    assert!(!report
        .underpowered
        .iter()
        .any(|u| matches!(u.stratum, Stratum::BmiBelow | Stratum::BmiAtOrAbove)));
}

#[test]
fn meals_without_coverage_are_excluded_with_reasons() {
    let study = build_study(3);
    let readings = ingest::load_cgm_readings(&study.cgm).unwrap();

    let mut meals = study.meals.clone();
    // A subject the CGM file has never seen
    meals.push(structured_meal("ghost", "s_unknown", noon(1), 500.0));
    // A meal far outside the recorded CGM span
    meals.push(structured_meal("late", "lean0", noon(20), 500.0));

    let aligned = align_windows(&meals, &readings, &alignment_cfg());
    assert_eq!(aligned.windows.len(), 6);
    assert_eq!(aligned.excluded.len(), 2);

    let ghost = aligned.excluded.iter().find(|e| e.entry_id == "ghost").unwrap();
    assert_eq!(ghost.reason, ExclusionReason::NoReadingsForSubject);

    let late = aligned.excluded.iter().find(|e| e.entry_id == "late").unwrap();
    assert!(matches!(
        late.reason,
        ExclusionReason::InsufficientCoverage { .. }
    ));
}

#[test]
fn small_strata_are_flagged_not_tested() {
    // One lean subject against four heavy ones
    let study = build_study(4);
    let readings = ingest::load_cgm_readings(&study.cgm).unwrap();
    let profiles = ingest::load_subject_profiles(&study.subjects).unwrap();

    let meals: Vec<StructuredMeal> = study
        .meals
        .iter()
        .filter(|m| m.subject_id.starts_with("heavy") || m.subject_id == "lean0")
        .cloned()
        .collect();
    assert_eq!(meals.len(), 5);

    let aligned = align_windows(&meals, &readings, &alignment_cfg());
    let report = analyze(&aligned.windows, &meals, &profiles, &stats_cfg());

    assert!(report
        .underpowered
        .iter()
        .any(|u| u.stratum == Stratum::BmiBelow && u.window_count == 1));
    assert!(
        !report
            .between_strata
            .iter()
            .any(|t| t.stratum_a == Stratum::BmiBelow || t.stratum_b == Stratum::BmiBelow),
        "underpowered stratum must not be significance-tested"
    );
    // But its trajectory is still reported
    assert!(report
        .trajectories
        .iter()
        .any(|t| t.stratum == Stratum::BmiBelow));
}

#[test]
fn diary_csv_round_trips_quoted_text() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.csv");
    std::fs::write(
        &path,
        "entry_id,subject_id,timestamp,text\n\
         e1,s1,2023-05-01 12:00:00,\"Lunch: rice, beans, and \"\"salsa\"\"\"\n\
         e2,s1,2023-05-01T18:30:00Z,Dinner: soup\n",
    )
    .unwrap();

    let entries = ingest::load_diary_entries(&path).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].text, r#"Lunch: rice, beans, and "salsa""#);
    assert_eq!(
        entries[1].timestamp,
        Utc.with_ymd_and_hms(2023, 5, 1, 18, 30, 0).unwrap()
    );
}
