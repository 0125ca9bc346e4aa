//! Glucolens CLI
//!
//! Batch/interactive analysis tool — no server surface. Subcommands:
//!
//! - `annotate`: run the cached, rate-limited LLM annotation batch over a
//!   food-event CSV and persist the outcomes as JSON
//! - `analyze`: align CGM readings around annotated meals, run stratified
//!   statistics, and render figures
//! - `cache`: inspect or clear the response cache

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use glucolens::annotate::runner::BatchReport;
use glucolens::annotate::ResponseCache;
use glucolens::config::{self, StudyConfig};
use glucolens::{alignment, annotate, ingest, plot, stats};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "glucolens")]
#[command(about = "CGM / food-diary analysis: LLM meal annotation, event alignment, stratified statistics")]
#[command(version)]
struct CliArgs {
    /// Path to the study config TOML (overrides GLUCOLENS_CONFIG and
    /// ./glucolens.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Annotate diary entries through the configured LLM backend
    Annotate {
        /// Food-event CSV: entry_id,subject_id,timestamp,text
        #[arg(long)]
        events: PathBuf,
        /// Output JSON path for annotation outcomes
        #[arg(long, default_value = "annotations.json")]
        out: PathBuf,
    },

    /// Align CGM readings around annotated meals and run stratified stats
    Analyze {
        /// Annotation outcomes JSON produced by `annotate`
        #[arg(long)]
        meals: PathBuf,
        /// CGM series CSV: subject_id,timestamp,glucose_mg_dl
        #[arg(long)]
        cgm: PathBuf,
        /// Subject metadata CSV: subject_id,bmi[,age]
        #[arg(long)]
        subjects: PathBuf,
        /// Directory for the stats table and figures
        #[arg(long, default_value = "analysis")]
        out_dir: PathBuf,
    },

    /// Inspect or clear the response cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum CacheAction {
    /// Print entry count and on-disk size
    Stats,
    /// Remove every cached response (the only removal path)
    Clear,
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Credentials may live in a .env next to the data
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();

    let study_config = match &args.config {
        Some(path) => StudyConfig::load_from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => StudyConfig::load(),
    };
    study_config.validate().context("invalid study config")?;
    config::init(study_config);

    match args.command {
        Command::Annotate { events, out } => run_annotate(&events, &out).await,
        Command::Analyze {
            meals,
            cgm,
            subjects,
            out_dir,
        } => run_analyze(&meals, &cgm, &subjects, &out_dir),
        Command::Cache { action } => run_cache(action),
    }
}

// ============================================================================
// Subcommands
// ============================================================================

async fn run_annotate(events: &PathBuf, out: &PathBuf) -> Result<()> {
    let cfg = config::get();
    let entries = ingest::load_diary_entries(events)
        .with_context(|| format!("loading diary entries from {}", events.display()))?;

    let report = annotate::annotate_entries(cfg, entries)
        .await
        .context("annotation batch aborted")?;

    let json = serde_json::to_string_pretty(&report)?;
    std::fs::write(out, json)
        .with_context(|| format!("writing annotations to {}", out.display()))?;

    info!(
        out = %out.display(),
        structured = report.structured_meals().len(),
        validation_failures = report.validation_failures,
        backend_failures = report.backend_failures,
        "Annotation outcomes written"
    );
    if report.validation_failures + report.backend_failures > 0 {
        warn!("Some entries failed — inspect the error records in the output JSON");
    }
    Ok(())
}

fn run_analyze(meals: &PathBuf, cgm: &PathBuf, subjects: &PathBuf, out_dir: &PathBuf) -> Result<()> {
    let cfg = config::get();

    let report: BatchReport = serde_json::from_str(
        &std::fs::read_to_string(meals)
            .with_context(|| format!("reading annotations from {}", meals.display()))?,
    )
    .context("parsing annotation outcomes JSON")?;
    let structured: Vec<_> = report.structured_meals().into_iter().cloned().collect();
    if structured.is_empty() {
        anyhow::bail!("no structured meals in {} — nothing to analyze", meals.display());
    }

    let readings = ingest::load_cgm_readings(cgm)?;
    let profiles = ingest::load_subject_profiles(subjects)?;

    let aligned = alignment::align_windows(&structured, &readings, &cfg.alignment);
    for excluded in &aligned.excluded {
        warn!(
            entry_id = %excluded.entry_id,
            subject_id = %excluded.subject_id,
            reason = %excluded.reason,
            "Meal excluded from alignment"
        );
    }

    let stats_report = stats::analyze(&aligned.windows, &structured, &profiles, &cfg.stats);

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating output directory {}", out_dir.display()))?;

    let table_path = out_dir.join("stats.json");
    std::fs::write(&table_path, serde_json::to_string_pretty(&stats_report)?)
        .with_context(|| format!("writing stats table to {}", table_path.display()))?;

    let exclusions_path = out_dir.join("exclusions.json");
    std::fs::write(
        &exclusions_path,
        serde_json::to_string_pretty(&aligned.excluded)?,
    )?;

    let figure_path = out_dir.join("trajectories.svg");
    match plot::render_trajectories(&figure_path, &stats_report.trajectories, &cfg.plot) {
        Ok(()) => {}
        Err(plot::PlotError::NoData) => warn!("No trajectory data to plot"),
        Err(e) => return Err(e).context("rendering trajectory figure"),
    }

    info!(
        windows = aligned.windows.len(),
        excluded = aligned.excluded.len(),
        out_dir = %out_dir.display(),
        "Analysis complete"
    );
    Ok(())
}

fn run_cache(action: CacheAction) -> Result<()> {
    let cfg = config::get();
    let cache = ResponseCache::open(&cfg.cache.dir)
        .with_context(|| format!("opening cache at {}", cfg.cache.dir.display()))?;

    match action {
        CacheAction::Stats => {
            println!(
                "cache: {} entries, {} bytes on disk ({})",
                cache.len(),
                cache.size_bytes(),
                cfg.cache.dir.display()
            );
        }
        CacheAction::Clear => {
            let before = cache.len();
            cache.clear().context("clearing cache")?;
            println!("cache cleared: {before} entries removed");
        }
    }
    Ok(())
}
