//! Detection types, the quantization grid, and result export

use crate::error::{Result as WaterfallResult, WaterfallError};
use crate::waterfall::{Chunk, RunMetadata, SkippedChunk, WaterfallState};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Note glyph kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteType {
    Hit,
}

/// Closed range of chunk rows `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
}

impl Segment {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn height(&self) -> usize {
        self.end - self.start + 1
    }

    /// Local row center, `start + height / 2`
    pub fn center(&self) -> f64 {
        self.start as f64 + self.height() as f64 / 2.0
    }
}

/// Row masks produced by the row classifier for one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMasks {
    pub chunk_index: u32,
    /// One flag per row: bar-line candidate across the full width
    pub bar_line_rows: Vec<bool>,
    /// One mask per lane, one flag per row: note candidate
    pub lane_rows: Vec<Vec<bool>>,
}

/// A located bar-line or note candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub chunk_index: u32,
    pub chunk_height: usize,
    pub chunk_base_y: f64,
    /// Local row center
    pub y: f64,
    /// Height in rows
    pub h: f64,
    pub global_y: f64,
}

impl Detection {
    pub fn from_segment(chunk: &Chunk, segment: &Segment) -> Self {
        let y = segment.center();
        Self {
            chunk_index: chunk.index,
            chunk_height: chunk.height(),
            chunk_base_y: chunk.base_y,
            y,
            h: segment.height() as f64,
            global_y: chunk.global_y(y),
        }
    }
}

/// A detected note, serialized verbatim into `notes.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub chunk_index: u32,
    pub chunk_height: usize,
    pub chunk_base_y: f64,
    pub lane: usize,
    pub y: f64,
    pub h: f64,
    pub global_y: f64,
    pub time: f64,
    #[serde(rename = "type")]
    pub note_type: NoteType,
}

impl Note {
    pub fn from_detection(detection: &Detection, lane: usize, metadata: &RunMetadata) -> Self {
        Self {
            chunk_index: detection.chunk_index,
            chunk_height: detection.chunk_height,
            chunk_base_y: detection.chunk_base_y,
            lane,
            y: detection.y,
            h: detection.h,
            global_y: detection.global_y,
            time: metadata.time_at(detection.global_y),
            note_type: NoteType::Hit,
        }
    }

    /// Move the note to a new global Y, keeping local Y and time consistent
    pub fn relocate(&mut self, global_y: f64, metadata: &RunMetadata) {
        self.global_y = global_y;
        self.y = self.chunk_height as f64 - (global_y - self.chunk_base_y);
        if metadata.has_timing() {
            self.time = metadata.time_at(global_y);
        }
    }
}

/// Bar-line spacing and tempo estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarLineEstimate {
    pub raw_count: usize,
    /// Median adjacent spacing of the raw sorted detections
    pub raw_median_spacing: f64,
    /// De-duplicated lines, ascending
    pub filtered: Vec<f64>,
    /// Median adjacent spacing of `filtered`
    pub median_spacing: f64,
    pub valid_diff_count: usize,
    /// Mean of the valid spacings
    pub avg_spacing: Option<f64>,
    pub seconds_per_line: Option<f64>,
    pub bpm: f64,
}

/// Grid steps stay within this fraction of the average spacing.
///
/// Separate from `tempo.spacing_tolerance`, which only selects the spacings
/// averaged by the bar-line estimator. Interpolation puts `round(gap / spacing)`
/// steps into each gap, so every step it emits falls in this wider band.
pub const GRID_SPACING_TOLERANCE: f64 = 0.5;

/// Final bar-line grid used for quantization.
///
/// Sorted ascending; every adjacent spacing lies in
/// `[(1 - GRID_SPACING_TOLERANCE) * spacing, (1 + GRID_SPACING_TOLERANCE) * spacing)`.
/// A detected line that falls short of a full spacing (60 px into a 100 px
/// spacing, say) is kept as a grid line, and notes in the short segment are
/// subdivided over that segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    lines: Vec<f64>,
    spacing: f64,
    pub interpolated: usize,
    pub extrapolated_below: usize,
    pub extrapolated_above: usize,
}

impl Grid {
    pub fn new(lines: Vec<f64>, spacing: f64) -> WaterfallResult<Self> {
        if !(spacing.is_finite() && spacing > 0.0) {
            return Err(WaterfallError::ProcessingPipelineError(format!(
                "grid spacing must be positive, got {}",
                spacing
            )));
        }

        let eps = spacing * 1e-9;
        let lo = (1.0 - GRID_SPACING_TOLERANCE) * spacing - eps;
        let hi = (1.0 + GRID_SPACING_TOLERANCE) * spacing;
        if let Some(pair) = lines.windows(2).find(|w| {
            let step = w[1] - w[0];
            !(step >= lo && step < hi)
        }) {
            return Err(WaterfallError::ProcessingPipelineError(format!(
                "grid step {:.3} -> {:.3} outside tolerance of spacing {:.3}",
                pair[0], pair[1], spacing
            )));
        }

        Ok(Self {
            lines,
            spacing,
            interpolated: 0,
            extrapolated_below: 0,
            extrapolated_above: 0,
        })
    }

    pub fn lines(&self) -> &[f64] {
        &self.lines
    }

    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Index of the segment holding `y`: the last line at or before `y`.
    ///
    /// A value exactly on a line belongs to the segment starting there.
    /// Returns `None` outside `[first, last)`.
    pub fn segment_index(&self, y: f64) -> Option<usize> {
        let upper = self.lines.partition_point(|&line| line <= y);
        let idx = upper.checked_sub(1)?;
        (idx + 1 < self.lines.len()).then_some(idx)
    }

    /// `(start, end)` of segment `idx`
    pub fn segment(&self, idx: usize) -> (f64, f64) {
        (self.lines[idx], self.lines[idx + 1])
    }
}

/// Contents of `notes.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotesFile {
    pub notes: Vec<Note>,
    pub bpm: f64,
    pub bar_lines: Vec<f64>,
}

impl NotesFile {
    pub fn from_state(state: &WaterfallState) -> Self {
        Self {
            notes: state.notes.clone(),
            bpm: round_to(state.bpm(), 2),
            bar_lines: state.grid_lines().to_vec(),
        }
    }
}

/// Diagnostics written to `analysis.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub chunk_count: usize,
    pub skipped_chunks: Vec<SkippedChunk>,
    pub total_height: f64,
    pub metadata: RunMetadata,
    pub raw_bar_line_count: usize,
    pub filtered_bar_line_count: usize,
    pub raw_median_spacing: Option<f64>,
    pub median_spacing: Option<f64>,
    pub valid_diff_count: usize,
    pub avg_spacing: Option<f64>,
    pub seconds_per_line: Option<f64>,
    pub bpm: f64,
    pub grid_size: usize,
    pub interpolated_points: usize,
    pub extrapolated_below: usize,
    pub extrapolated_above: usize,
    pub note_count: usize,
    pub quantized_count: usize,
    pub notes_per_lane: Vec<usize>,
}

pub fn build_analysis_report(state: &WaterfallState, lane_count: usize) -> AnalysisReport {
    let estimate = state.bar_line_estimate.as_ref();
    let grid = state.grid.as_ref();

    let mut notes_per_lane = vec![0; lane_count];
    for note in &state.notes {
        if let Some(count) = notes_per_lane.get_mut(note.lane) {
            *count += 1;
        }
    }

    AnalysisReport {
        chunk_count: state.chunks.len(),
        skipped_chunks: state.skipped_chunks.clone(),
        total_height: state.total_height(),
        metadata: state.metadata.clone(),
        raw_bar_line_count: state.bar_line_detections.len(),
        filtered_bar_line_count: estimate.map(|e| e.filtered.len()).unwrap_or(0),
        raw_median_spacing: estimate.map(|e| e.raw_median_spacing),
        median_spacing: estimate.map(|e| e.median_spacing),
        valid_diff_count: estimate.map(|e| e.valid_diff_count).unwrap_or(0),
        avg_spacing: estimate.and_then(|e| e.avg_spacing),
        seconds_per_line: estimate.and_then(|e| e.seconds_per_line),
        bpm: round_to(state.bpm(), 2),
        grid_size: grid.map(|g| g.len()).unwrap_or(0),
        interpolated_points: grid.map(|g| g.interpolated).unwrap_or(0),
        extrapolated_below: grid.map(|g| g.extrapolated_below).unwrap_or(0),
        extrapolated_above: grid.map(|g| g.extrapolated_above).unwrap_or(0),
        note_count: state.notes.len(),
        quantized_count: state.quantized_count,
        notes_per_lane,
    }
}

/// Write `notes.json` into `output_dir`
pub fn export_notes(
    state: &WaterfallState,
    output_dir: &Path,
    filename: &str,
) -> WaterfallResult<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let notes_path = output_dir.join(filename);

    let output = NotesFile::from_state(state);
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| WaterfallError::ExportError(e.to_string()))?;
    std::fs::write(&notes_path, json)?;

    info!(
        "Saved {} notes and BPM {:.2} to {}",
        output.notes.len(),
        output.bpm,
        notes_path.display()
    );
    Ok(notes_path)
}

/// Write the diagnostics report into `output_dir`
pub fn export_analysis(
    state: &WaterfallState,
    output_dir: &Path,
    filename: &str,
    lane_count: usize,
) -> WaterfallResult<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let analysis_path = output_dir.join(filename);

    let report = build_analysis_report(state, lane_count);
    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| WaterfallError::ExportError(e.to_string()))?;
    std::fs::write(&analysis_path, json)?;

    info!("Exported analysis results to {}", analysis_path.display());
    Ok(analysis_path)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
