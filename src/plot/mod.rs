//! Figure Rendering
//!
//! Draws per-stratum mean glucose trajectories (±1 SD band) against minutes
//! relative to the meal, as a standalone SVG file. Headless by design: no
//! bitmap or font-discovery dependencies.

use crate::config::PlotConfig;
use crate::stats::StratumTrajectory;
use plotters::prelude::*;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Errors from figure rendering.
#[derive(Debug, Error)]
pub enum PlotError {
    #[error("nothing to plot: no trajectory has any bins")]
    NoData,

    #[error("failed to render figure: {0}")]
    Render(String),
}

/// Distinct series colors, cycled when there are more strata than entries.
const PALETTE: [RGBColor; 5] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
];

/// Render all stratum trajectories into one SVG figure.
pub fn render_trajectories(
    path: &Path,
    trajectories: &[StratumTrajectory],
    cfg: &PlotConfig,
) -> Result<(), PlotError> {
    let populated: Vec<&StratumTrajectory> =
        trajectories.iter().filter(|t| !t.bins.is_empty()).collect();
    if populated.is_empty() {
        return Err(PlotError::NoData);
    }

    let x_min = populated
        .iter()
        .flat_map(|t| t.bins.first())
        .map(|b| b.bin_start_minutes)
        .min()
        .unwrap_or(0) as f64;
    let x_max = populated
        .iter()
        .flat_map(|t| t.bins.last())
        .map(|b| b.bin_start_minutes)
        .max()
        .unwrap_or(0) as f64;

    let (mut y_min, mut y_max) = (f64::MAX, f64::MIN);
    for t in &populated {
        for b in &t.bins {
            let sd = b.variance.sqrt();
            y_min = y_min.min(b.mean_glucose - sd);
            y_max = y_max.max(b.mean_glucose + sd);
        }
    }
    let y_pad = ((y_max - y_min) * 0.1).max(5.0);

    let root = SVGBackend::new(path, (cfg.width, cfg.height)).into_drawing_area();
    root.fill(&WHITE)
        .map_err(|e| PlotError::Render(e.to_string()))?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Meal-aligned glucose by stratum", ("sans-serif", 24))
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(56)
        .build_cartesian_2d(x_min..x_max, (y_min - y_pad)..(y_max + y_pad))
        .map_err(|e| PlotError::Render(e.to_string()))?;

    chart
        .configure_mesh()
        .x_desc("Minutes relative to meal")
        .y_desc("Glucose (mg/dL)")
        .draw()
        .map_err(|e| PlotError::Render(e.to_string()))?;

    for (idx, t) in populated.iter().enumerate() {
        let color = PALETTE[idx % PALETTE.len()];

        // ±1 SD band as two faint boundary lines
        let upper: Vec<(f64, f64)> = t
            .bins
            .iter()
            .map(|b| (b.bin_start_minutes as f64, b.mean_glucose + b.variance.sqrt()))
            .collect();
        let lower: Vec<(f64, f64)> = t
            .bins
            .iter()
            .map(|b| (b.bin_start_minutes as f64, b.mean_glucose - b.variance.sqrt()))
            .collect();
        chart
            .draw_series(LineSeries::new(upper, color.mix(0.3)))
            .map_err(|e| PlotError::Render(e.to_string()))?;
        chart
            .draw_series(LineSeries::new(lower, color.mix(0.3)))
            .map_err(|e| PlotError::Render(e.to_string()))?;

        // Mean trajectory
        let mean: Vec<(f64, f64)> = t
            .bins
            .iter()
            .map(|b| (b.bin_start_minutes as f64, b.mean_glucose))
            .collect();
        chart
            .draw_series(LineSeries::new(mean, color.stroke_width(2)))
            .map_err(|e| PlotError::Render(e.to_string()))?
            .label(format!("{} (n={})", t.stratum, t.window_count))
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 18, y)], color.stroke_width(2))
            });
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.85))
        .border_style(BLACK.mix(0.4))
        .draw()
        .map_err(|e| PlotError::Render(e.to_string()))?;

    root.present().map_err(|e| PlotError::Render(e.to_string()))?;
    info!(path = %path.display(), strata = populated.len(), "Rendered trajectory figure");
    Ok(())
}
