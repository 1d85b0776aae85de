//! Configuration system for the waterfall note detector

use log::warn;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub lanes: LaneConfig,
    pub detection: DetectionConfig,
    pub segments: SegmentConfig,
    pub tempo: TempoConfig,
    pub grid: GridConfig,
    pub quantize: QuantizeConfig,
    pub export: ExportConfig,
}

/// Playfield lane layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneConfig {
    pub count: usize,
    /// Relative lane widths, left to right. Must match `count`.
    pub ratios: Option<Vec<f64>>,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            count: 9,
            ratios: None,
        }
    }
}

/// Row classification thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Max-channel brightness threshold (0-255)
    pub threshold: u8,
    /// Lowest allowed note brightness floor
    pub note_floor_min: f64,
    /// Note floor sits this far below `threshold`
    pub note_floor_offset: f64,
    /// A pixel counts as filled above `fill_level * floor`
    pub fill_level: f64,
    /// Filled fraction a note row must exceed
    pub note_fill_ratio: f64,
    /// Note rows must have a pixel std-dev below this
    pub max_row_std_dev: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 200,
            note_floor_min: 100.0,
            note_floor_offset: 50.0,
            fill_level: 0.8,
            note_fill_ratio: 0.6,
            max_row_std_dev: 80.0,
        }
    }
}

impl DetectionConfig {
    /// Brightness floor for note rows: `max(note_floor_min, threshold - note_floor_offset)`
    pub fn note_floor(&self) -> f64 {
        (self.threshold as f64 - self.note_floor_offset).max(self.note_floor_min)
    }
}

/// Segment extraction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Segments shorter than this many rows are noise
    pub min_height: usize,
    /// Note segments separated by fewer false rows than this are merged
    pub merge_gap: usize,
    /// Fraction of a bar-line block's pixels that must exceed the threshold
    pub bar_line_fill_ratio: f64,
    /// Bar-line segments must be strictly thinner than this
    pub bar_line_max_height: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            min_height: 3,
            merge_gap: 5,
            bar_line_fill_ratio: 0.8,
            bar_line_max_height: 10,
        }
    }
}

/// Bar-line spacing and tempo estimation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    pub beats_per_bar: u32,
    pub bars_per_line: u32,
    /// Valid spacings lie within this relative band around the median
    pub spacing_tolerance: f64,
    /// Lines closer than `dedup_fraction * raw median` to the last kept line are duplicates
    pub dedup_fraction: f64,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            beats_per_bar: 4,
            bars_per_line: 1,
            spacing_tolerance: 0.2,
            dedup_fraction: 0.5,
        }
    }
}

impl TempoConfig {
    /// Beats between two detected lines, saturating at `u32::MAX`
    pub fn beats_per_line(&self) -> u32 {
        self.beats_per_bar.saturating_mul(self.bars_per_line)
    }
}

/// Grid construction limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Maximum extrapolation steps at each end of the grid
    pub max_extrapolation_steps: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            max_extrapolation_steps: 100_000,
        }
    }
}

/// Quantization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizeConfig {
    pub enabled: bool,
    /// Subdivisions per grid segment
    pub subdivisions: u32,
}

impl Default for QuantizeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            subdivisions: 192,
        }
    }
}

/// Output files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub notes_filename: String,
    pub write_analysis: bool,
    pub analysis_filename: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            notes_filename: "notes.json".to_string(),
            write_analysis: false,
            analysis_filename: "analysis.json".to_string(),
        }
    }
}

impl Config {
    /// Normalized lane weights summing to 1.0.
    ///
    /// Falls back to equal weights (with a warning) when the configured ratios
    /// do not match the lane count or contain non-positive values.
    pub fn lane_weights(&self) -> Vec<f64> {
        let count = self.lanes.count;
        let equal = vec![1.0 / count as f64; count];

        let Some(ratios) = &self.lanes.ratios else {
            return equal;
        };

        if ratios.len() != count {
            warn!(
                "Number of lane ratios ({}) does not match lanes ({}). Using equal widths.",
                ratios.len(),
                count
            );
            return equal;
        }

        if ratios.iter().any(|r| !r.is_finite() || *r <= 0.0) {
            warn!("Lane ratios must be positive numbers. Using equal widths.");
            return equal;
        }

        let total: f64 = ratios.iter().sum();
        ratios.iter().map(|r| r / total).collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            lanes: LaneConfig::default(),
            detection: DetectionConfig::default(),
            segments: SegmentConfig::default(),
            tempo: TempoConfig::default(),
            grid: GridConfig::default(),
            quantize: QuantizeConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

/// Parse a comma-separated lane ratio list such as `"1,1.5,1"`.
///
/// Returns `None` (with a warning) when any entry fails to parse.
pub fn parse_lane_ratios(raw: &str) -> Option<Vec<f64>> {
    let parsed: Result<Vec<f64>, _> = raw.split(',').map(|s| s.trim().parse::<f64>()).collect();
    match parsed {
        Ok(ratios) => Some(ratios),
        Err(_) => {
            warn!("Error parsing lane ratios '{}'. Using equal widths.", raw);
            None
        }
    }
}

/// Validate configuration parameters
pub fn validate_config(config: &Config) -> anyhow::Result<()> {
    if config.lanes.count == 0 {
        anyhow::bail!("lanes.count must be at least 1");
    }

    if config.tempo.beats_per_bar == 0 || config.tempo.bars_per_line == 0 {
        anyhow::bail!("tempo.beats_per_bar and tempo.bars_per_line must be at least 1");
    }

    if config
        .tempo
        .beats_per_bar
        .checked_mul(config.tempo.bars_per_line)
        .is_none()
    {
        anyhow::bail!(
            "tempo.beats_per_bar ({}) * tempo.bars_per_line ({}) overflows",
            config.tempo.beats_per_bar,
            config.tempo.bars_per_line
        );
    }

    if !(config.tempo.spacing_tolerance > 0.0 && config.tempo.spacing_tolerance < 1.0) {
        anyhow::bail!("tempo.spacing_tolerance must be in (0, 1)");
    }

    if !(config.tempo.dedup_fraction > 0.0 && config.tempo.dedup_fraction <= 1.0) {
        anyhow::bail!("tempo.dedup_fraction must be in (0, 1]");
    }

    let d = &config.detection;
    if d.max_row_std_dev <= 0.0 || d.fill_level <= 0.0 || d.note_fill_ratio < 0.0 {
        anyhow::bail!("detection fill/std-dev parameters must be positive");
    }

    if config.segments.bar_line_max_height <= config.segments.min_height {
        anyhow::bail!("segments.bar_line_max_height must exceed segments.min_height");
    }

    if config.quantize.subdivisions == 0 {
        anyhow::bail!("quantize.subdivisions must be at least 1");
    }

    if config.grid.max_extrapolation_steps == 0 {
        anyhow::bail!("grid.max_extrapolation_steps must be at least 1");
    }

    Ok(())
}

/// Load configuration from JSON file
pub fn load_config<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Save configuration to JSON file
pub fn save_config<P: AsRef<std::path::Path>>(config: &Config, path: P) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
