//! Pass 3: Grid Interpolation & Extrapolation

use crate::analysis::{Grid, Note};
use crate::config::Config;
use crate::error::{Result as WaterfallResult, WaterfallError};
use crate::waterfall::WaterfallState;
use log::{debug, info, warn};

/// Result of filling gaps between filtered lines
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolation {
    pub lines: Vec<f64>,
    /// Points inserted between detected lines
    pub inserted: usize,
    /// Detected lines dropped for sitting within half a spacing of the previous one
    pub dropped: usize,
}

/// Fill missed bar lines.
///
/// For each next line, `n = round(gap / spacing)` spacings fit between it and
/// the last emitted line; `n - 1` evenly spaced points are inserted before it.
/// A line with `n == 0` is dropped.
pub fn interpolate(filtered: &[f64], spacing: f64) -> Interpolation {
    let mut lines: Vec<f64> = Vec::with_capacity(filtered.len());
    let mut inserted = 0;
    let mut dropped = 0;

    for &line in filtered {
        let Some(&prev) = lines.last() else {
            lines.push(line);
            continue;
        };

        let gap = line - prev;
        let steps = (gap / spacing).round() as usize;
        if steps == 0 {
            dropped += 1;
            continue;
        }

        let step = gap / steps as f64;
        for k in 1..steps {
            lines.push(prev + step * k as f64);
        }
        inserted += steps - 1;
        lines.push(line);
    }

    Interpolation {
        lines,
        inserted,
        dropped,
    }
}

/// Extend `lines` by whole spacings until `[first, last)` covers `[min_y, max_y]`.
///
/// Returns `(added_below, added_above)`. Either end needing more than
/// `max_steps` points is an error.
pub fn extrapolate(
    lines: &mut Vec<f64>,
    spacing: f64,
    min_y: f64,
    max_y: f64,
    max_steps: usize,
) -> WaterfallResult<(usize, usize)> {
    let (Some(&first), Some(&last)) = (lines.first(), lines.last()) else {
        return Ok((0, 0));
    };

    let mut below = Vec::new();
    let mut current = first;
    while current > min_y {
        if below.len() >= max_steps {
            return Err(WaterfallError::GridExtrapolationLimit {
                limit: max_steps,
                direction: "below",
                spacing,
            });
        }
        current -= spacing;
        below.push(current);
    }

    let mut above = 0;
    let mut current = last;
    while current <= max_y {
        if above >= max_steps {
            return Err(WaterfallError::GridExtrapolationLimit {
                limit: max_steps,
                direction: "above",
                spacing,
            });
        }
        current += spacing;
        lines.push(current);
        above += 1;
    }

    let added_below = below.len();
    below.reverse();
    below.append(lines);
    *lines = below;
    Ok((added_below, above))
}

/// Span of note global Y values, `None` without notes
pub fn note_range(notes: &[Note]) -> Option<(f64, f64)> {
    notes.iter().map(|n| n.global_y).fold(None, |acc, y| match acc {
        None => Some((y, y)),
        Some((lo, hi)) => Some((lo.min(y), hi.max(y))),
    })
}

/// Build the quantization grid from filtered bar lines
pub fn build_grid(
    filtered: &[f64],
    spacing: f64,
    notes: &[Note],
    config: &Config,
) -> WaterfallResult<Grid> {
    let Interpolation {
        mut lines,
        inserted,
        dropped,
    } = interpolate(filtered, spacing);
    if dropped > 0 {
        debug!("  Dropped {} bar lines closer than half a spacing", dropped);
    }

    let (below, above) = match note_range(notes) {
        Some((min_y, max_y)) => extrapolate(
            &mut lines,
            spacing,
            min_y,
            max_y,
            config.grid.max_extrapolation_steps,
        )?,
        None => (0, 0),
    };

    let mut grid = Grid::new(lines, spacing)?;
    grid.interpolated = inserted;
    grid.extrapolated_below = below;
    grid.extrapolated_above = above;
    Ok(grid)
}

/// Main entry point for Pass 3
pub fn run(state: &mut WaterfallState, config: &Config) -> WaterfallResult<()> {
    info!("Pass 3: Grid Construction");

    let Some(estimate) = &state.bar_line_estimate else {
        info!("  No bar-line estimate, skipping grid");
        state.grid = None;
        return Ok(());
    };

    let Some(spacing) = estimate.avg_spacing else {
        warn!("  No robust bar-line spacing, skipping grid");
        state.grid = None;
        return Ok(());
    };

    if estimate.filtered.len() < 2 {
        warn!("  Fewer than 2 distinct bar lines, skipping grid");
        state.grid = None;
        return Ok(());
    }

    let grid = build_grid(&estimate.filtered, spacing, &state.notes, config)?;
    info!(
        "  Grid: {} lines ({} interpolated, {} below, {} above)",
        grid.len(),
        grid.interpolated,
        grid.extrapolated_below,
        grid.extrapolated_above
    );
    state.grid = Some(grid);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_interpolate_no_gaps() {
        let result = interpolate(&[0.0, 100.0, 200.0], 100.0);
        assert_eq!(result.lines, vec![0.0, 100.0, 200.0]);
        assert_eq!(result.inserted, 0);
    }

    #[test]
    fn test_interpolate_drops_near_duplicate() {
        let result = interpolate(&[0.0, 40.0, 100.0], 100.0);
        assert_eq!(result.lines, vec![0.0, 100.0]);
        assert_eq!(result.dropped, 1);
    }

    #[test]
    fn test_extrapolate_both_ends() {
        let mut lines = vec![100.0, 200.0];
        let (below, above) = extrapolate(&mut lines, 100.0, 30.0, 250.0, 10).unwrap();
        assert_eq!((below, above), (1, 1));
        assert_eq!(lines, vec![0.0, 100.0, 200.0, 300.0]);
    }

    #[test]
    fn test_extrapolate_covers_note_on_last_line() {
        // A note exactly on the last line needs one more segment above
        let mut lines = vec![0.0, 100.0];
        let (_, above) = extrapolate(&mut lines, 100.0, 50.0, 100.0, 10).unwrap();
        assert_eq!(above, 1);
        assert_abs_diff_eq!(*lines.last().unwrap(), 200.0);
    }

    #[test]
    fn test_extrapolate_cap() {
        let mut lines = vec![0.0, 1.0];
        let err = extrapolate(&mut lines, 1.0, 0.0, 1_000.0, 50).unwrap_err();
        assert!(matches!(
            err,
            WaterfallError::GridExtrapolationLimit {
                direction: "above",
                ..
            }
        ));
    }
}
