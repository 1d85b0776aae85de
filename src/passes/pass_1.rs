//! Pass 1: Segment Extraction & Detection

use crate::analysis::{ChunkMasks, Detection, Note, Segment};
use crate::config::{Config, SegmentConfig};
use crate::error::{Result as WaterfallResult, WaterfallError};
use crate::waterfall::{Chunk, RunMetadata, WaterfallState};
use log::{debug, info};
use ndarray::{s, Array3, Axis};

/// Contiguous true runs of a mask.
///
/// The mask is padded with `false` on both ends so runs touching the first
/// or last row are still closed.
pub fn find_segments(mask: &[bool]) -> Vec<Segment> {
    let padded: Vec<bool> = std::iter::once(false)
        .chain(mask.iter().copied())
        .chain(std::iter::once(false))
        .collect();

    let mut segments = Vec::new();
    let mut start = 0;
    for (i, edge) in padded.windows(2).enumerate() {
        match (edge[0], edge[1]) {
            (false, true) => start = i,
            (true, false) => segments.push(Segment::new(start, i - 1)),
            _ => {}
        }
    }
    segments
}

/// Merge segments separated by fewer than `merge_gap` false rows
pub fn merge_segments(segments: &[Segment], merge_gap: usize) -> Vec<Segment> {
    let mut merged: Vec<Segment> = Vec::with_capacity(segments.len());
    for &segment in segments {
        match merged.last_mut() {
            Some(last) if segment.start.saturating_sub(last.end + 1) < merge_gap => {
                last.end = last.end.max(segment.end)
            }
            _ => merged.push(segment),
        }
    }
    merged
}

/// Fraction of pixels in the full-width row block whose brightest channel
/// exceeds `threshold`
pub fn block_fill_ratio(pixels: &Array3<u8>, segment: &Segment, threshold: u8) -> f64 {
    let block = pixels.slice(s![segment.start..=segment.end, .., ..]);
    let total = block.shape()[0] * block.shape()[1];
    if total == 0 {
        return 0.0;
    }

    let bright = block
        .lanes(Axis(2))
        .into_iter()
        .filter(|px| px.iter().copied().max().unwrap_or(0) > threshold)
        .count();
    bright as f64 / total as f64
}

/// Bar-line segments: unmerged runs that are tall enough to not be noise,
/// thinner than `bar_line_max_height`, and filled across the full width.
pub fn extract_bar_lines(
    pixels: &Array3<u8>,
    bar_line_rows: &[bool],
    threshold: u8,
    config: &SegmentConfig,
) -> Vec<Segment> {
    find_segments(bar_line_rows)
        .into_iter()
        .filter(|seg| seg.height() >= config.min_height && seg.height() < config.bar_line_max_height)
        .filter(|seg| block_fill_ratio(pixels, seg, threshold) > config.bar_line_fill_ratio)
        .collect()
}

/// Note segments of one lane mask, merged across small gaps
pub fn extract_notes(lane_rows: &[bool], config: &SegmentConfig) -> Vec<Segment> {
    merge_segments(&find_segments(lane_rows), config.merge_gap)
        .into_iter()
        .filter(|seg| seg.height() >= config.min_height)
        .collect()
}

/// True when `segment` lies entirely within the rows of some bar line
fn inside_bar_line(segment: &Segment, bar_segments: &[Segment]) -> bool {
    bar_segments
        .iter()
        .any(|bar| segment.start >= bar.start && segment.end <= bar.end)
}

/// Detections of one chunk: `(notes, bar lines)`.
///
/// A lane segment fully covered by an accepted bar line is part of that line
/// and is dropped. Notes that a bar line crosses or overlaps keep their full
/// extent.
pub fn detect_chunk(
    chunk: &Chunk,
    masks: &ChunkMasks,
    metadata: &RunMetadata,
    config: &Config,
) -> (Vec<Note>, Vec<Detection>) {
    let bar_segments = extract_bar_lines(
        &chunk.pixels,
        &masks.bar_line_rows,
        config.detection.threshold,
        &config.segments,
    );

    let mut notes = Vec::new();
    for (lane, lane_rows) in masks.lane_rows.iter().enumerate() {
        for seg in extract_notes(lane_rows, &config.segments)
            .iter()
            .filter(|seg| !inside_bar_line(seg, &bar_segments))
        {
            let detection = Detection::from_segment(chunk, seg);
            notes.push(Note::from_detection(&detection, lane, metadata));
        }
    }

    let bar_lines = bar_segments
        .iter()
        .map(|seg| Detection::from_segment(chunk, seg))
        .collect();

    (notes, bar_lines)
}

/// Main entry point for Pass 1
pub fn run(state: &mut WaterfallState, config: &Config) -> WaterfallResult<()> {
    info!("Pass 1: Segment Extraction");

    if state.row_masks.len() != state.chunks.len() {
        return Err(WaterfallError::ProcessingPipelineError(format!(
            "row masks ({}) do not match chunks ({}); run Pass 0 first",
            state.row_masks.len(),
            state.chunks.len()
        )));
    }

    let mut notes = Vec::new();
    let mut bar_lines = Vec::new();
    for (chunk, masks) in state.chunks.iter().zip(&state.row_masks) {
        if masks.chunk_index != chunk.index {
            return Err(WaterfallError::ProcessingPipelineError(format!(
                "row masks for chunk {} paired with chunk {}",
                masks.chunk_index, chunk.index
            )));
        }
        let (chunk_notes, chunk_bar_lines) = detect_chunk(chunk, masks, &state.metadata, config);
        debug!(
            "  Chunk {}: {} notes, {} bar lines",
            chunk.index,
            chunk_notes.len(),
            chunk_bar_lines.len()
        );
        notes.extend(chunk_notes);
        bar_lines.extend(chunk_bar_lines);
    }

    info!(
        "  Detected {} notes and {} bar-line candidates",
        notes.len(),
        bar_lines.len()
    );
    state.notes = notes;
    state.bar_line_detections = bar_lines;
    Ok(())
}
