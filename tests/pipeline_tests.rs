//! End-to-end tests for the full detection pipeline

use approx::assert_relative_eq;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use ndarray::Array3;
use std::path::Path;
use waterfall2notes::analysis::NotesFile;
use waterfall2notes::config::Config;
use waterfall2notes::error::WaterfallError;
use waterfall2notes::waterfall::{list_chunk_files, RunMetadata, WaterfallState};
use waterfall2notes::{validate_input, NoteDetector};

const CHUNK_HEIGHT: u32 = 64;
/// Nine lanes of 8 px each, so every lane edge sits on a JPEG block edge
const CHUNK_WIDTH: u32 = 72;

/// A black chunk with white rectangles `(rows, cols)`, half-open
fn chunk_image(rects: &[((u32, u32), (u32, u32))]) -> RgbImage {
    let mut img = RgbImage::new(CHUNK_WIDTH, CHUNK_HEIGHT);
    for &((r0, r1), (c0, c1)) in rects {
        for y in r0..r1 {
            for x in c0..c1 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
    }
    img
}

fn write_jpeg(path: &Path, img: &RgbImage) {
    let mut file = std::fs::File::create(path).unwrap();
    let mut encoder = JpegEncoder::new_with_quality(&mut file, 100);
    encoder.encode_image(img).unwrap();
}

/// Three valid chunks (indices 0, 2 and 10), one corrupt chunk, and metadata.
///
/// Each chunk carries an 8-row bar line at rows 24..32, so bar lines sit
/// 64 px apart. Chunk 2 also holds a note in lane 2.
fn write_fixture(dir: &Path) {
    let bar = ((24, 32), (0, CHUNK_WIDTH));
    let note = ((40, 56), (16, 24));

    write_jpeg(&dir.join("chunk_0.jpg"), &chunk_image(&[bar]));
    write_jpeg(&dir.join("chunk_2.jpg"), &chunk_image(&[bar, note]));
    write_jpeg(&dir.join("chunk_10.jpg"), &chunk_image(&[bar]));
    std::fs::write(dir.join("chunk_5.jpg"), b"not a jpeg").unwrap();
    std::fs::write(dir.join("notes.txt"), b"ignored").unwrap();
    std::fs::write(
        dir.join("metadata.json"),
        r#"{"fps": 32.0, "speed": 1.0, "start_time": 0.5, "source": "clip.mp4"}"#,
    )
    .unwrap();
}

fn paint(pixels: &mut Array3<u8>, rows: (usize, usize), cols: (usize, usize)) {
    for r in rows.0..rows.1 {
        for c in cols.0..cols.1 {
            for ch in 0..3 {
                pixels[[r, c, ch]] = 255;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_files_sorted_numerically() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());

        let indices: Vec<u32> = list_chunk_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|(index, _)| index)
            .collect();
        assert_eq!(indices, vec![0, 2, 5, 10]);
    }

    #[test]
    fn test_load_skips_corrupt_chunk() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());

        let state = WaterfallState::load(dir.path()).unwrap();
        let loaded: Vec<(u32, f64)> = state.chunks.iter().map(|c| (c.index, c.base_y)).collect();
        assert_eq!(loaded, vec![(0, 0.0), (2, 64.0), (10, 128.0)]);
        assert_eq!(state.skipped_chunks.len(), 1);
        assert_eq!(state.skipped_chunks[0].index, 5);
        assert_eq!(state.metadata.fps, Some(32.0));
    }

    #[test]
    fn test_process_writes_notes_json() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());

        let mut config = Config::default();
        config.export.write_analysis = true;
        let state = NoteDetector::new(config).process(dir.path()).unwrap();

        assert_eq!(state.bar_line_detections.len(), 3);
        assert_eq!(state.notes.len(), 1);

        let content = std::fs::read_to_string(dir.path().join("notes.json")).unwrap();
        let output: NotesFile = serde_json::from_str(&content).unwrap();

        // 64 px per line at 32 px per second: 2 s per line, 4 beats per line
        assert_relative_eq!(output.bpm, 120.0);
        assert_eq!(output.bar_lines, vec![36.0, 100.0, 164.0]);

        let note = &output.notes[0];
        assert_eq!(note.chunk_index, 2);
        assert_eq!(note.chunk_height, 64);
        assert_relative_eq!(note.chunk_base_y, 64.0);
        assert_eq!(note.lane, 2);
        assert_relative_eq!(note.h, 16.0);
        assert_relative_eq!(note.global_y, 80.0, epsilon = 1e-9);
        assert_relative_eq!(note.y, 48.0, epsilon = 1e-9);
        assert_relative_eq!(note.time, 3.0, epsilon = 1e-9);

        let raw: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(raw["notes"][0]["type"], "hit");

        let analysis: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("analysis.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(analysis["chunk_count"], 3);
        assert_eq!(analysis["skipped_chunks"][0]["index"], 5);
        assert_eq!(analysis["notes_per_lane"][2], 1);
    }

    #[test]
    fn test_single_bar_line_gives_no_grid() {
        let mut pixels = Array3::<u8>::zeros((100, 90, 3));
        paint(&mut pixels, (50, 54), (0, 90));
        paint(&mut pixels, (20, 30), (30, 40));

        let mut state = WaterfallState::from_chunks(
            vec![(0, pixels)],
            RunMetadata {
                fps: Some(30.0),
                speed: Some(10.0),
                start_time: Some(0.0),
            },
        );
        NoteDetector::new(Config::default())
            .detect(&mut state)
            .unwrap();

        assert_eq!(state.notes.len(), 1);
        assert_eq!(state.bar_line_detections.len(), 1);
        assert_eq!(state.bpm(), 0.0);
        assert!(state.grid_lines().is_empty());
        // Unquantized note keeps its raw position
        assert_relative_eq!(state.notes[0].global_y, 75.0);

        let output = NotesFile::from_state(&state);
        assert_eq!(output.bpm, 0.0);
        assert!(output.bar_lines.is_empty());
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = WaterfallState::load(dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, WaterfallError::InputDirectoryNotFound(_)));
        assert!(err.to_string().starts_with("E001"));
    }

    #[test]
    fn test_directory_without_chunks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("metadata.json"), "{}").unwrap();

        let err = WaterfallState::load(dir.path()).unwrap_err();
        assert!(matches!(err, WaterfallError::NoChunksFound(_)));

        let err = validate_input(dir.path(), &Config::default()).unwrap_err();
        assert!(matches!(err, WaterfallError::NoChunksFound(_)));
    }

    #[test]
    fn test_unreadable_metadata_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        std::fs::write(dir.path().join("metadata.json"), "{ not json").unwrap();

        let state = NoteDetector::new(Config::default())
            .process(dir.path())
            .unwrap();
        assert_eq!(state.metadata, RunMetadata::default());
        assert_eq!(state.bpm(), 0.0);
        assert_eq!(state.notes[0].time, 0.0);
        // Spacing is still measurable, so the grid is still built
        assert_eq!(state.grid_lines().len(), 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());

        let mut config = Config::default();
        config.lanes.count = 0;
        let err = validate_input(dir.path(), &config).unwrap_err();
        assert!(matches!(err, WaterfallError::ConfigValidationFailed(_)));
    }
}
