//! Pass 2: Bar-Line Spacing & Tempo Estimation

use crate::analysis::BarLineEstimate;
use crate::config::{Config, TempoConfig};
use crate::error::Result as WaterfallResult;
use crate::waterfall::{mean, median, RunMetadata, WaterfallState};
use log::{info, warn};

/// Adjacent differences of a sorted list
pub fn adjacent_diffs(lines: &[f64]) -> Vec<f64> {
    lines.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Collapse double detections of one physical line.
///
/// Keeps the first line, then every line farther than `min_distance` from
/// the last kept line. Order is preserved.
pub fn dedupe_lines(sorted: &[f64], min_distance: f64) -> Vec<f64> {
    let mut kept: Vec<f64> = Vec::with_capacity(sorted.len());
    for &line in sorted {
        match kept.last() {
            Some(&last) if line - last <= min_distance => {}
            _ => kept.push(line),
        }
    }
    kept
}

/// Robust spacing of a filtered line list: `(median, valid diffs)`.
///
/// Valid diffs lie strictly within `tolerance` of the median, which rejects
/// missed lines (large gaps) and leftover duplicates (small gaps).
pub fn valid_spacings(diffs: &[f64], tolerance: f64) -> (f64, Vec<f64>) {
    let median_diff = median(diffs);
    let lo = (1.0 - tolerance) * median_diff;
    let hi = (1.0 + tolerance) * median_diff;
    let valid = diffs.iter().copied().filter(|&d| lo < d && d < hi).collect();
    (median_diff, valid)
}

/// `(seconds_per_line, bpm)` from a pixel spacing, when `fps` and `speed` are known
pub fn bpm_from_spacing(
    avg_spacing_px: f64,
    metadata: &RunMetadata,
    beats_per_line: u32,
) -> Option<(f64, f64)> {
    let seconds_per_line = metadata.pixels_to_seconds(avg_spacing_px)?;
    if seconds_per_line > 0.0 {
        Some((seconds_per_line, 60.0 / seconds_per_line * beats_per_line as f64))
    } else {
        None
    }
}

/// Estimate spacing and tempo from raw bar-line global Y values.
///
/// Returns `None` for fewer than two detections.
pub fn estimate(
    raw_lines: &[f64],
    metadata: &RunMetadata,
    config: &TempoConfig,
) -> Option<BarLineEstimate> {
    if raw_lines.len() < 2 {
        return None;
    }

    let mut sorted = raw_lines.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let raw_median_spacing = median(&adjacent_diffs(&sorted));
    let filtered = dedupe_lines(&sorted, raw_median_spacing * config.dedup_fraction);

    let diffs = adjacent_diffs(&filtered);
    let (median_spacing, valid) = valid_spacings(&diffs, config.spacing_tolerance);
    let avg_spacing = (!valid.is_empty()).then(|| mean(&valid));

    let timing = avg_spacing
        .and_then(|avg| bpm_from_spacing(avg, metadata, config.beats_per_line()));

    Some(BarLineEstimate {
        raw_count: raw_lines.len(),
        raw_median_spacing,
        filtered,
        median_spacing,
        valid_diff_count: valid.len(),
        avg_spacing,
        seconds_per_line: timing.map(|(spl, _)| spl),
        bpm: timing.map(|(_, bpm)| bpm).unwrap_or(0.0),
    })
}

/// Main entry point for Pass 2
pub fn run(state: &mut WaterfallState, config: &Config) -> WaterfallResult<()> {
    info!("Pass 2: Bar-Line Spacing & Tempo");

    let raw: Vec<f64> = state
        .bar_line_detections
        .iter()
        .map(|d| d.global_y)
        .collect();

    let Some(estimate) = estimate(&raw, &state.metadata, &config.tempo) else {
        warn!(
            "  Only {} bar line(s) detected; skipping BPM and grid",
            raw.len()
        );
        state.bar_line_estimate = None;
        return Ok(());
    };

    info!(
        "  {} raw bar lines -> {} after de-duplication",
        estimate.raw_count,
        estimate.filtered.len()
    );

    match (estimate.avg_spacing, estimate.seconds_per_line) {
        (Some(avg), Some(_)) => info!(
            "  Estimated BPM: {:.2} (Avg Line Height: {:.1}px, Beats/Line: {})",
            estimate.bpm,
            avg,
            config.tempo.beats_per_line()
        ),
        (Some(avg), None) => warn!(
            "  Avg line height {:.1}px, but metadata lacks fps/speed; BPM unavailable",
            avg
        ),
        (None, _) => warn!("  No bar-line spacing within tolerance of the median"),
    }

    state.bar_line_estimate = Some(estimate);
    Ok(())
}
