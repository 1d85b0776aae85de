//! Pass 4: Note Quantization

use crate::analysis::{Grid, Note};
use crate::config::Config;
use crate::error::Result as WaterfallResult;
use crate::waterfall::{RunMetadata, WaterfallState};
use log::info;

/// Snap `y` onto the nearest of `subdivisions` even steps of its grid segment.
///
/// Returns `None` when `y` lies outside `[first, last)` of the grid. The
/// segment ends are returned exactly, so snapping a snapped value is a no-op.
pub fn quantize_position(y: f64, grid: &Grid, subdivisions: u32) -> Option<f64> {
    let idx = grid.segment_index(y)?;
    let (start, end) = grid.segment(idx);
    let height = end - start;

    let fraction = (y - start) / height;
    let k = (fraction * subdivisions as f64).round() as u32;

    Some(if k == 0 {
        start
    } else if k >= subdivisions {
        end
    } else {
        start + (k as f64 / subdivisions as f64) * height
    })
}

/// Snap every note in place; returns how many were moved onto the grid.
///
/// Lane and type are never touched.
pub fn quantize_notes(
    notes: &mut [Note],
    grid: &Grid,
    metadata: &RunMetadata,
    subdivisions: u32,
) -> usize {
    let mut snapped = 0;
    for note in notes.iter_mut() {
        if let Some(new_y) = quantize_position(note.global_y, grid, subdivisions) {
            note.relocate(new_y, metadata);
            snapped += 1;
        }
    }
    snapped
}

/// Main entry point for Pass 4
pub fn run(state: &mut WaterfallState, config: &Config) -> WaterfallResult<()> {
    info!("Pass 4: Quantization");

    if !config.quantize.enabled {
        info!("  Quantization disabled");
        return Ok(());
    }

    let Some(grid) = &state.grid else {
        info!("  No grid, notes keep raw positions");
        state.quantized_count = 0;
        return Ok(());
    };

    state.quantized_count = quantize_notes(
        &mut state.notes,
        grid,
        &state.metadata,
        config.quantize.subdivisions,
    );
    info!(
        "  Snapped {} of {} notes to 1/{} grid subdivisions",
        state.quantized_count,
        state.notes.len(),
        config.quantize.subdivisions
    );
    Ok(())
}
