//! Validation tests for Pass 4: Note Quantization

use approx::assert_relative_eq;
use waterfall2notes::analysis::{Detection, Grid, Note, NoteType};
use waterfall2notes::config::Config;
use waterfall2notes::passes::pass_4::{self, quantize_notes, quantize_position};
use waterfall2notes::waterfall::{RunMetadata, WaterfallState};

fn timed_metadata() -> RunMetadata {
    RunMetadata {
        fps: Some(30.0),
        speed: Some(10.0),
        start_time: Some(2.0),
    }
}

fn note_at(global_y: f64, lane: usize, metadata: &RunMetadata) -> Note {
    let detection = Detection {
        chunk_index: 0,
        chunk_height: 1_000,
        chunk_base_y: 0.0,
        y: 1_000.0 - global_y,
        h: 8.0,
        global_y,
    };
    Note::from_detection(&detection, lane, metadata)
}

/// Slightly irregular grid, as produced from real detections
fn grid() -> Grid {
    Grid::new(vec![78.0, 228.3, 377.9, 528.1], 150.0).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantization_is_idempotent() {
        let grid = grid();
        let positions = [78.0, 80.1, 150.0, 228.29, 300.5, 377.95, 460.0, 528.0];
        for &y in &positions {
            let once = quantize_position(y, &grid, 192).unwrap();
            let twice = quantize_position(once, &grid, 192).unwrap_or(once);
            assert_eq!(once, twice, "position {y}");
        }
    }

    #[test]
    fn test_quantize_notes_updates_position_and_time() {
        let metadata = timed_metadata();
        let mut notes = vec![note_at(150.1, 4, &metadata), note_at(900.0, 2, &metadata)];

        let snapped = quantize_notes(&mut notes, &grid(), &metadata, 192);
        assert_eq!(snapped, 1);

        let note = &notes[0];
        let (start, end): (f64, f64) = (78.0, 228.3);
        let k = ((150.1 - start) / (end - start) * 192.0).round();
        let expected = start + k / 192.0 * (end - start);
        assert_relative_eq!(note.global_y, expected);
        assert_relative_eq!(note.y, 1_000.0 - expected);
        assert_relative_eq!(note.time, 2.0 + expected / 300.0, epsilon = 1e-12);
        assert_eq!(note.lane, 4);
        assert_eq!(note.note_type, NoteType::Hit);

        // Outside the grid: untouched
        assert_eq!(notes[1].global_y, 900.0);
        assert_eq!(notes[1].lane, 2);
    }

    #[test]
    fn test_time_stays_zero_without_metadata() {
        let metadata = RunMetadata::default();
        let mut notes = vec![note_at(300.0, 0, &metadata)];
        quantize_notes(&mut notes, &grid(), &metadata, 192);
        assert_eq!(notes[0].time, 0.0);
    }

    #[test]
    fn test_run_without_grid_keeps_raw_positions() {
        let metadata = RunMetadata::default();
        let mut state = WaterfallState {
            notes: vec![note_at(123.4, 1, &metadata)],
            ..Default::default()
        };
        pass_4::run(&mut state, &Config::default()).unwrap();
        assert_eq!(state.notes[0].global_y, 123.4);
        assert_eq!(state.quantized_count, 0);
    }

    #[test]
    fn test_run_respects_disabled_quantization() {
        let metadata = RunMetadata::default();
        let mut state = WaterfallState {
            notes: vec![note_at(123.4, 1, &metadata)],
            grid: Some(grid()),
            ..Default::default()
        };
        let mut config = Config::default();
        config.quantize.enabled = false;

        pass_4::run(&mut state, &config).unwrap();
        assert_eq!(state.notes[0].global_y, 123.4);
    }

    #[test]
    fn test_run_snaps_notes_on_grid() {
        let metadata = RunMetadata::default();
        let mut state = WaterfallState {
            notes: vec![note_at(123.4, 1, &metadata), note_at(400.0, 7, &metadata)],
            grid: Some(grid()),
            ..Default::default()
        };
        pass_4::run(&mut state, &Config::default()).unwrap();
        assert_eq!(state.quantized_count, 2);

        let again: Vec<f64> = state.notes.iter().map(|n| n.global_y).collect();
        pass_4::run(&mut state, &Config::default()).unwrap();
        let after: Vec<f64> = state.notes.iter().map(|n| n.global_y).collect();
        assert_eq!(again, after);
    }
}
