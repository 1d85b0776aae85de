//! Error types for the waterfall note detector

use thiserror::Error;

/// Custom error type for waterfall processing
#[derive(Debug, Error)]
pub enum WaterfallError {
    /// E001: Input directory does not exist or is not a directory
    #[error("E001: Input directory not found - {0}")]
    InputDirectoryNotFound(String),
    /// E002: No `chunk_<N>.jpg` files in the input directory
    #[error("E002: No chunk files found - {0}")]
    NoChunksFound(String),
    /// E003: Configuration validation failed
    #[error("E003: Configuration validation failed - {0}")]
    ConfigValidationFailed(String),
    /// E004: A chunk image could not be decoded
    #[error("E004: Chunk decode error - {0}")]
    ChunkDecodeError(String),
    /// E005: File I/O error
    #[error("E005: File I/O error - {0}")]
    Io(#[from] std::io::Error),
    /// E006: JSON (de)serialization error
    #[error("E006: JSON error - {0}")]
    Json(#[from] serde_json::Error),
    /// E007: Grid extrapolation needed more steps than allowed
    #[error("E007: Grid extrapolation exceeded {limit} steps ({direction}) - spacing {spacing:.3}px")]
    GridExtrapolationLimit {
        limit: usize,
        direction: &'static str,
        spacing: f64,
    },
    /// E008: Result export error
    #[error("E008: Export error - {0}")]
    ExportError(String),
    /// E009: Processing pipeline error
    #[error("E009: Processing pipeline error - {0}")]
    ProcessingPipelineError(String),
}

impl From<anyhow::Error> for WaterfallError {
    fn from(err: anyhow::Error) -> Self {
        WaterfallError::ProcessingPipelineError(format!("Generic error: {}", err))
    }
}

/// Result type alias for waterfall operations
pub type Result<T> = std::result::Result<T, WaterfallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_in_messages() {
        let err = WaterfallError::NoChunksFound("/tmp/x".to_string());
        assert!(err.to_string().starts_with("E002"));

        let err = WaterfallError::GridExtrapolationLimit {
            limit: 10,
            direction: "below",
            spacing: 0.5,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("E007"));
        assert!(msg.contains("below"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: WaterfallError = io.into();
        assert!(matches!(err, WaterfallError::Io(_)));
    }
}
