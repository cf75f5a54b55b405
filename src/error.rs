//! Error types for readaloud.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReaderError {
    // Fatal to the current run
    #[error("Device error: {message}")]
    Device { message: String },

    // Rejected at start/configure time
    #[error("Invalid configuration value for {key}: {message}")]
    Configuration { key: String, message: String },

    // Recoverable, absorbed inside the pipeline
    #[error("Text extraction failed for frame {frame_id}: {message}")]
    ExtractionFailure { frame_id: u64, message: String },

    #[error("Speech synthesis failed for chunk {sequence_no}: {message}")]
    SynthesisFailure { sequence_no: u64, message: String },

    #[error("Malformed frame {frame_id}: {reason}")]
    MalformedFrame { frame_id: u64, reason: String },

    #[error("Malformed span set from frame {frame_id}: {reason}")]
    MalformedSpanSet { frame_id: u64, reason: String },

    // Controller misuse
    #[error("Cannot {operation} while pipeline is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    // Configuration file errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // External program errors
    #[error("External tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("External tool failed: {message}")]
    ToolFailed { message: String },

    // Image decoding and encoding
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ReaderError {
    /// Shorthand for a configuration rejection.
    pub fn configuration(key: &str, message: impl Into<String>) -> Self {
        ReaderError::Configuration {
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Shorthand for a device failure.
    pub fn device(message: impl Into<String>) -> Self {
        ReaderError::Device {
            message: message.into(),
        }
    }

    /// Whether this error is reported to the controller's caller.
    ///
    /// Per-frame and per-chunk failures are absorbed by the pipeline; only device
    /// and configuration failures leave it.
    pub fn crosses_boundary(&self) -> bool {
        matches!(
            self,
            ReaderError::Device { .. } | ReaderError::Configuration { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ReaderError>;
