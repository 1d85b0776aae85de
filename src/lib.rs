//! Waterfall Note Detection
//!
//! Turns slit-scan "waterfall" chunk images of a rhythm-game video into a
//! list of lane notes quantized onto a bar-line grid, plus an estimated BPM.

pub mod analysis;
pub mod config;
pub mod error;
pub mod passes;
pub mod waterfall;

pub use analysis::{Grid, Note, NoteType, NotesFile};
pub use config::Config;
pub use error::{Result as WaterfallResult, WaterfallError};
pub use waterfall::{RunMetadata, WaterfallState};

use log::info;
use std::path::Path;

/// Main processing pipeline for waterfall note detection
pub struct NoteDetector {
    config: Config,
}

impl NoteDetector {
    /// Create a new detector with the given configuration
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Process a chunk directory and write `notes.json` into it
    pub fn process<P: AsRef<Path>>(&self, input_dir: P) -> WaterfallResult<WaterfallState> {
        let input_dir = input_dir.as_ref();

        // Load chunks and metadata
        let mut state = WaterfallState::load(input_dir)?;

        // Run all passes
        self.detect(&mut state)?;

        // Export results
        self.export_results(&state, input_dir)?;

        Ok(state)
    }

    /// Execute the detection passes over an already loaded state
    pub fn detect(&self, state: &mut WaterfallState) -> WaterfallResult<()> {
        // Pass 0: Row Classification
        passes::pass_0::run(state, &self.config)?;

        // Pass 1: Segment Extraction
        passes::pass_1::run(state, &self.config)?;

        // Pass 2: Bar-Line Spacing & Tempo
        passes::pass_2::run(state, &self.config)?;

        // Pass 3: Grid Construction
        passes::pass_3::run(state, &self.config)?;

        // Pass 4: Quantization
        passes::pass_4::run(state, &self.config)?;

        Ok(())
    }

    /// Write `notes.json` and, when enabled, `analysis.json`
    fn export_results(&self, state: &WaterfallState, output_dir: &Path) -> WaterfallResult<()> {
        let export = &self.config.export;
        analysis::export_notes(state, output_dir, &export.notes_filename)?;
        if export.write_analysis {
            analysis::export_analysis(
                state,
                output_dir,
                &export.analysis_filename,
                self.config.lanes.count,
            )?;
        }
        info!(
            "Done: {} chunks, {} notes, BPM {:.2}",
            state.chunks.len(),
            state.notes.len(),
            state.bpm()
        );
        Ok(())
    }
}

/// Validate configuration and input directory
pub fn validate_input<P: AsRef<Path>>(input_dir: P, config: &Config) -> WaterfallResult<()> {
    // Check input directory exists and has chunks
    waterfall::validate_input(input_dir)?;

    // Validate configuration
    config::validate_config(config)
        .map_err(|e| WaterfallError::ConfigValidationFailed(e.to_string()))?;

    Ok(())
}
