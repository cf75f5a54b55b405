//! readaloud - camera-to-speech text reader
//!
//! Captures frames, recognises printed text and reads it aloud in order,
//! without repeating what the camera keeps seeing.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod assembler;
pub mod camera;
#[cfg(feature = "cli")]
pub mod cli;
pub mod command;
pub mod config;
pub mod defaults;
pub mod error;
pub mod ocr;
pub mod pipeline;
pub mod tts;
pub mod vision;

// Composition root for the binary
#[cfg(feature = "cli")]
pub mod app;

// Collaborator traits (camera -> OCR -> speech)
pub use camera::{CaptureDevice, MockCamera, ReplayCamera};
pub use command::{CommandRunner, SystemCommandRunner};
pub use ocr::{MockOcrEngine, OcrEngine, TesseractEngine};
pub use tts::{CommandSpeechEngine, MockSpeechEngine, SpeechEngine};

// Pipeline
pub use pipeline::controller::{PipelineController, PollStatus};
pub use pipeline::state::{Lifecycle, PipelineStatus, RunEnd, RunStats, RunSummary};

// Error handling
pub use error::{ReaderError, Result};

// Config
pub use config::{Config, InterruptPolicy};

// Station framework (for advanced users)
pub use pipeline::error::{ErrorReporter, StationError};
pub use pipeline::station::Station;

/// Build version string with optional git commit hash.
///
/// Returns `"0.0.1+abc1234"` when git hash is available, `"0.0.1"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_contains_plus_when_git_hash_present() {
        let ver = version_string();
        // In a git repo build, GIT_HASH is set → expect "0.0.1+<hash>"
        // In CI without git, expect plain "0.0.1"
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            assert!(
                ver.contains('+'),
                "With GIT_HASH set, version should contain '+', got: {}",
                ver
            );
            let hash_part = ver.split('+').nth(1).unwrap_or("");
            assert_eq!(
                hash_part.len(),
                7,
                "Git hash should be 7 chars, got: {}",
                hash_part
            );
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
