//! Pass 0: Row Classification

use crate::analysis::ChunkMasks;
use crate::config::{Config, DetectionConfig};
use crate::error::Result as WaterfallResult;
use crate::waterfall::{std_dev, Chunk, WaterfallState};
use log::{debug, info};
use ndarray::{s, Array2, Array3, ArrayView1, Axis};

const EDGE_EPSILON: f64 = 1e-9;

/// Column range `[start, end)` of one lane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneBounds {
    pub start: usize,
    pub end: usize,
}

impl LaneBounds {
    pub fn width(&self) -> usize {
        self.end.saturating_sub(self.start)
    }
}

/// Per-row statistics used by the note test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowStats {
    pub max: u8,
    /// Fraction of pixels above the fill level
    pub fill_ratio: f64,
    pub std_dev: f64,
}

/// Split `width` columns into lanes by normalized weights.
///
/// Boundaries are the floors of the cumulative widths, so rounding never
/// shifts later lanes. `EDGE_EPSILON` absorbs float noise in the weights.
pub fn lane_bounds(width: usize, weights: &[f64]) -> Vec<LaneBounds> {
    let mut bounds = Vec::with_capacity(weights.len());
    let mut current_x = 0.0;

    for &weight in weights {
        let lane_width = width as f64 * weight;
        let start = ((current_x + EDGE_EPSILON) as usize).min(width);
        let end = ((current_x + lane_width + EDGE_EPSILON) as usize).min(width);
        bounds.push(LaneBounds { start, end });
        current_x += lane_width;
    }

    bounds
}

/// Brightest channel of every pixel, as a (rows, columns) array.
///
/// A saturated pure red or blue pixel scores 255, same as white.
pub fn max_channel(pixels: &Array3<u8>) -> Array2<u8> {
    pixels.map_axis(Axis(2), |px| px.iter().copied().max().unwrap_or(0))
}

/// Rows whose mean brightness across the full width exceeds `threshold`
pub fn bar_line_rows(brightness: &Array2<u8>, threshold: u8) -> Vec<bool> {
    let width = brightness.ncols();
    if width == 0 {
        return vec![false; brightness.nrows()];
    }

    brightness
        .axis_iter(Axis(0))
        .map(|row| {
            let sum: u64 = row.iter().map(|&v| v as u64).sum();
            sum as f64 / width as f64 > threshold as f64
        })
        .collect()
}

pub fn row_stats(row: ArrayView1<u8>, fill_level: f64) -> RowStats {
    if row.is_empty() {
        return RowStats {
            max: 0,
            fill_ratio: 0.0,
            std_dev: 0.0,
        };
    }

    let values: Vec<f64> = row.iter().map(|&v| v as f64).collect();
    let filled = values.iter().filter(|&&v| v > fill_level).count();

    RowStats {
        max: row.iter().copied().max().unwrap_or(0),
        fill_ratio: filled as f64 / values.len() as f64,
        std_dev: std_dev(&values),
    }
}

/// A lane row is a note candidate only when it is bright, mostly filled,
/// and flat-colored at the same time.
///
/// All three comparisons are strict: a row filled to exactly
/// `note_fill_ratio` does not qualify.
pub fn note_row_qualifies(stats: &RowStats, config: &DetectionConfig) -> bool {
    let floor = config.note_floor();
    stats.max as f64 > floor
        && stats.fill_ratio > config.note_fill_ratio
        && stats.std_dev < config.max_row_std_dev
}

/// Note candidate mask for one lane
pub fn lane_note_rows(
    brightness: &Array2<u8>,
    lane: LaneBounds,
    config: &DetectionConfig,
) -> Vec<bool> {
    if lane.width() == 0 {
        return vec![false; brightness.nrows()];
    }

    let fill_level = config.fill_level * config.note_floor();
    brightness
        .slice(s![.., lane.start..lane.end])
        .axis_iter(Axis(0))
        .map(|row| note_row_qualifies(&row_stats(row, fill_level), config))
        .collect()
}

/// Classify every row of one chunk
pub fn classify_chunk(chunk: &Chunk, lanes: &[LaneBounds], config: &Config) -> ChunkMasks {
    let brightness = max_channel(&chunk.pixels);

    ChunkMasks {
        chunk_index: chunk.index,
        bar_line_rows: bar_line_rows(&brightness, config.detection.threshold),
        lane_rows: lanes
            .iter()
            .map(|&lane| lane_note_rows(&brightness, lane, &config.detection))
            .collect(),
    }
}

/// Main entry point for Pass 0
pub fn run(state: &mut WaterfallState, config: &Config) -> WaterfallResult<()> {
    info!("Pass 0: Row Classification");

    let weights = config.lane_weights();
    state.row_masks = state
        .chunks
        .iter()
        .map(|chunk| {
            let lanes = lane_bounds(chunk.width(), &weights);
            let masks = classify_chunk(chunk, &lanes, config);
            debug!(
                "  Chunk {}: {} bar-line rows, {} note rows",
                chunk.index,
                masks.bar_line_rows.iter().filter(|&&b| b).count(),
                masks
                    .lane_rows
                    .iter()
                    .map(|m| m.iter().filter(|&&b| b).count())
                    .sum::<usize>()
            );
            masks
        })
        .collect();

    info!("  Classified rows of {} chunks", state.row_masks.len());
    Ok(())
}
