//! Chunk loading, run metadata and the shared pipeline state

use crate::analysis::{BarLineEstimate, ChunkMasks, Detection, Grid, Note};
use crate::error::{Result as WaterfallResult, WaterfallError};
use log::{debug, info, warn};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const METADATA_FILENAME: &str = "metadata.json";
const CHUNK_PREFIX: &str = "chunk_";
const CHUNK_SUFFIX: &str = ".jpg";

/// One waterfall image segment
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Index parsed from `chunk_<N>.jpg`
    pub index: u32,
    /// Pixels as (rows, columns, RGB)
    pub pixels: Array3<u8>,
    /// Cumulative height of all previously loaded chunks
    pub base_y: f64,
}

impl Chunk {
    pub fn height(&self) -> usize {
        self.pixels.shape()[0]
    }

    pub fn width(&self) -> usize {
        self.pixels.shape()[1]
    }

    /// Global Y of a chunk-local row center.
    ///
    /// The top of a chunk is the most recent frame, so global Y grows as the
    /// local row moves up.
    pub fn global_y(&self, local_y: f64) -> f64 {
        self.base_y + (self.height() as f64 - local_y)
    }
}

/// Metadata written by the slit-scan stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunMetadata {
    /// Frames per second of the source video
    pub fps: Option<f64>,
    /// Scroll distance in pixels per video frame
    pub speed: Option<f64>,
    /// Offset of the first sampled frame in seconds
    pub start_time: Option<f64>,
}

impl RunMetadata {
    /// Seconds of video covered by `pixels` rows of scroll, if `fps` and
    /// `speed` are usable.
    pub fn pixels_to_seconds(&self, pixels: f64) -> Option<f64> {
        match (self.fps, self.speed) {
            (Some(fps), Some(speed)) if fps > 0.0 && speed > 0.0 => Some((pixels / speed) / fps),
            _ => None,
        }
    }

    /// Derived time of a global Y, or 0.0 when any field is missing.
    pub fn time_at(&self, global_y: f64) -> f64 {
        match (self.start_time, self.pixels_to_seconds(global_y)) {
            (Some(start), Some(elapsed)) => start + elapsed,
            _ => 0.0,
        }
    }

    pub fn has_timing(&self) -> bool {
        self.start_time.is_some() && self.pixels_to_seconds(0.0).is_some()
    }
}

/// A chunk file that could not be used
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedChunk {
    pub index: u32,
    pub path: String,
    pub reason: String,
}

/// Pipeline state threaded through every pass
#[derive(Debug, Clone, Default)]
pub struct WaterfallState {
    /// Input directory (also the output directory)
    pub input_dir: Option<PathBuf>,
    pub metadata: RunMetadata,
    /// Loaded chunks in index order
    pub chunks: Vec<Chunk>,
    pub skipped_chunks: Vec<SkippedChunk>,

    // Pass 0: Row classification
    /// Per-chunk bar-line and lane row masks
    pub row_masks: Vec<ChunkMasks>,

    // Pass 1: Segment extraction
    /// Detected notes (rewritten in place by Pass 4)
    pub notes: Vec<Note>,
    /// Raw bar-line detections across all chunks
    pub bar_line_detections: Vec<Detection>,

    // Pass 2: Bar-line estimation
    pub bar_line_estimate: Option<BarLineEstimate>,

    // Pass 3: Grid
    pub grid: Option<Grid>,

    // Pass 4: Quantization
    /// Number of notes snapped onto the grid
    pub quantized_count: usize,
}

impl WaterfallState {
    /// Load every `chunk_<N>.jpg` and the optional metadata from a directory
    pub fn load<P: AsRef<Path>>(input_dir: P) -> WaterfallResult<Self> {
        let input_dir = input_dir.as_ref();
        validate_input_dir(input_dir)?;

        let chunk_files = list_chunk_files(input_dir)?;
        if chunk_files.is_empty() {
            return Err(WaterfallError::NoChunksFound(format!(
                "no {}<N>{} files in {}",
                CHUNK_PREFIX,
                CHUNK_SUFFIX,
                input_dir.display()
            )));
        }
        info!("Found {} chunks in {}", chunk_files.len(), input_dir.display());

        let metadata = load_metadata(input_dir);

        let mut images = Vec::with_capacity(chunk_files.len());
        let mut skipped_chunks = Vec::new();
        for (index, path) in chunk_files {
            debug!("Loading chunk {}...", index);
            match load_chunk_image(&path) {
                Ok(pixels) => images.push((index, pixels)),
                Err(err) => {
                    warn!("Skipping chunk {} ({}): {}", index, path.display(), err);
                    skipped_chunks.push(SkippedChunk {
                        index,
                        path: path.display().to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        let mut state = Self::from_chunks(images, metadata);
        state.input_dir = Some(input_dir.to_path_buf());
        state.skipped_chunks = skipped_chunks;
        Ok(state)
    }

    /// Build a state from already decoded chunk images, in processing order.
    ///
    /// Base offsets are the prefix sums of the supplied chunk heights.
    pub fn from_chunks(images: Vec<(u32, Array3<u8>)>, metadata: RunMetadata) -> Self {
        let mut base_y = 0.0;
        let chunks = images
            .into_iter()
            .map(|(index, pixels)| {
                let chunk = Chunk {
                    index,
                    pixels,
                    base_y,
                };
                base_y += chunk.height() as f64;
                chunk
            })
            .collect();

        WaterfallState {
            metadata,
            chunks,
            ..Default::default()
        }
    }

    /// Total height of the loaded waterfall in rows
    pub fn total_height(&self) -> f64 {
        self.chunks
            .last()
            .map(|c| c.base_y + c.height() as f64)
            .unwrap_or(0.0)
    }

    /// Final BPM, 0.0 when undeterminable
    pub fn bpm(&self) -> f64 {
        self.bar_line_estimate
            .as_ref()
            .map(|e| e.bpm)
            .unwrap_or(0.0)
    }

    /// Final grid lines, empty when no grid could be built
    pub fn grid_lines(&self) -> &[f64] {
        self.grid.as_ref().map(|g| g.lines()).unwrap_or(&[])
    }
}

fn validate_input_dir(input_dir: &Path) -> WaterfallResult<()> {
    if !input_dir.is_dir() {
        return Err(WaterfallError::InputDirectoryNotFound(
            input_dir.display().to_string(),
        ));
    }
    Ok(())
}

/// Validate that an input directory exists and holds at least one chunk file
pub fn validate_input<P: AsRef<Path>>(input_dir: P) -> WaterfallResult<()> {
    let input_dir = input_dir.as_ref();
    validate_input_dir(input_dir)?;
    if list_chunk_files(input_dir)?.is_empty() {
        return Err(WaterfallError::NoChunksFound(input_dir.display().to_string()));
    }
    Ok(())
}

/// Digits of a `chunk_<N>.jpg` file name, without parsing them
fn chunk_index_digits(file_name: &str) -> Option<&str> {
    let digits = file_name
        .strip_prefix(CHUNK_PREFIX)?
        .strip_suffix(CHUNK_SUFFIX)?;
    (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())).then_some(digits)
}

/// Parse `<N>` out of a `chunk_<N>.jpg` file name
pub fn parse_chunk_index(file_name: &str) -> Option<u32> {
    chunk_index_digits(file_name)?.parse().ok()
}

/// List chunk files sorted by their numeric index (not lexical name order)
pub fn list_chunk_files(input_dir: &Path) -> WaterfallResult<Vec<(u32, PathBuf)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(input_dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let index = parse_chunk_index(name);
        let oversized = index.is_none() && chunk_index_digits(name).is_some();
        match index {
            Some(index) => files.push((index, path)),
            None if oversized => {
                warn!(
                    "Skipping chunk {}: index exceeds {}",
                    path.display(),
                    u32::MAX
                );
            }
            None => {}
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    Ok(files)
}

/// Read `metadata.json`; missing or unreadable metadata yields empty fields
pub fn load_metadata(input_dir: &Path) -> RunMetadata {
    let path = input_dir.join(METADATA_FILENAME);
    if !path.exists() {
        debug!("No {} in {}", METADATA_FILENAME, input_dir.display());
        return RunMetadata::default();
    }

    let parsed = std::fs::read_to_string(&path)
        .map_err(WaterfallError::from)
        .and_then(|content| serde_json::from_str::<RunMetadata>(&content).map_err(Into::into));

    match parsed {
        Ok(metadata) => {
            if !metadata.has_timing() {
                warn!("Metadata lacks fps/speed/start_time; note times default to 0.0");
            }
            metadata
        }
        Err(err) => {
            warn!("Ignoring unreadable {}: {}", path.display(), err);
            RunMetadata::default()
        }
    }
}

/// Decode a chunk image into an RGB pixel array
pub fn load_chunk_image(path: &Path) -> WaterfallResult<Array3<u8>> {
    let image = image::open(path)
        .map_err(|e| WaterfallError::ChunkDecodeError(e.to_string()))?
        .to_rgb8();
    rgb_image_to_array(image)
}

/// Convert an `RgbImage` into a (rows, columns, 3) array
pub fn rgb_image_to_array(image: image::RgbImage) -> WaterfallResult<Array3<u8>> {
    let (width, height) = image.dimensions();
    Array3::from_shape_vec((height as usize, width as usize, 3), image.into_raw())
        .map_err(|e| WaterfallError::ChunkDecodeError(e.to_string()))
}

/// Median of a dataset (mean of the two middle values for even lengths)
pub fn median(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Population standard deviation
pub fn std_dev(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let m = mean(data);
    let var = data.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / data.len() as f64;
    var.sqrt()
}
