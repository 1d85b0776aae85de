use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;
use waterfall2notes::config::parse_lane_ratios;
use waterfall2notes::{validate_input, Config, NoteDetector};

/// Waterfall Note Detection
#[derive(Parser)]
#[command(name = "waterfall2notes")]
#[command(about = "Detect and quantize rhythm-game notes in slit-scan waterfall chunks")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect notes and bar lines, writing notes.json into the input directory
    Detect {
        /// Directory containing chunk_<N>.jpg and optional metadata.json
        input: PathBuf,

        /// Number of lanes
        #[arg(long)]
        lanes: Option<usize>,

        /// Comma-separated lane width ratios (e.g. "1,1.5,1")
        #[arg(long)]
        lane_ratios: Option<String>,

        /// Brightness threshold (0-255)
        #[arg(long)]
        threshold: Option<u8>,

        /// Beats per bar (time signature numerator)
        #[arg(long)]
        beats_per_bar: Option<u32>,

        /// Number of bars between detected lines
        #[arg(long)]
        bars_per_line: Option<u32>,

        /// Minimum note height in rows
        #[arg(long)]
        min_note_height: Option<usize>,

        /// Merge note segments separated by fewer rows than this
        #[arg(long)]
        merge_gap: Option<usize>,

        /// Custom configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Also write analysis.json diagnostics
        #[arg(long)]
        analysis: bool,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Quiet output
        #[arg(short, long)]
        quiet: bool,
    },
    /// Validate configuration file
    ValidateConfig {
        /// Configuration file to validate
        config: PathBuf,
    },
    /// Show default configuration
    ShowConfig {
        /// Write the default configuration to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else if quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Detect {
            input,
            lanes,
            lane_ratios,
            threshold,
            beats_per_bar,
            bars_per_line,
            min_note_height,
            merge_gap,
            config,
            analysis,
            verbose,
            quiet,
        } => {
            if verbose && quiet {
                anyhow::bail!("Cannot specify both --verbose and --quiet");
            }
            init_logging(verbose, quiet);

            // Load configuration
            let mut config = if let Some(config_path) = config {
                waterfall2notes::config::load_config(config_path)?
            } else {
                Config::default()
            };

            // Command-line flags override the file
            if let Some(lanes) = lanes {
                config.lanes.count = lanes;
            }
            if let Some(raw) = lane_ratios {
                config.lanes.ratios = parse_lane_ratios(&raw);
            }
            if let Some(threshold) = threshold {
                config.detection.threshold = threshold;
            }
            if let Some(beats) = beats_per_bar {
                config.tempo.beats_per_bar = beats;
            }
            if let Some(bars) = bars_per_line {
                config.tempo.bars_per_line = bars;
            }
            if let Some(height) = min_note_height {
                config.segments.min_height = height;
            }
            if let Some(gap) = merge_gap {
                config.segments.merge_gap = gap;
            }
            if analysis {
                config.export.write_analysis = true;
            }

            // Validate input
            validate_input(&input, &config)?;

            let detector = NoteDetector::new(config);
            let state = detector.process(&input)?;

            if !quiet {
                println!(
                    "Saved {} notes (BPM {:.2}, {} grid lines) to {}",
                    state.notes.len(),
                    state.bpm(),
                    state.grid_lines().len(),
                    input.join(&detector.config().export.notes_filename).display()
                );
            }
        }
        Commands::ValidateConfig { config } => {
            let config = waterfall2notes::config::load_config(config)?;
            println!("Configuration is valid");
            if let Ok(json) = serde_json::to_string_pretty(&config) {
                println!("{}", json);
            }
        }
        Commands::ShowConfig { output } => {
            let config = Config::default();
            if let Some(path) = output {
                waterfall2notes::config::save_config(&config, &path)?;
                println!("Default configuration written to {}", path.display());
            } else {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{}", json);
            }
        }
    }

    Ok(())
}
