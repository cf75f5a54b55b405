//! Default configuration constants for readaloud.
//!
//! Shared by the TOML config layer, the CLI and the pipeline so that every entry
//! point starts from the same numbers.

/// Default language pack passed to both the OCR and the speech engine.
///
/// Tesseract names English "eng"; speech engines that use ISO 639-1 codes are
/// mapped by the speech adapter.
pub const LANGUAGE_PACK: &str = "eng";

/// Minimum calibrated confidence for a recognised span to be kept.
///
/// Tesseract reports 0–100; the reader script this tool grew out of kept words
/// scoring above 60.
pub const CONFIDENCE_THRESHOLD: f32 = 0.6;

/// Similarity at or above which a candidate line counts as already spoken.
pub const DEDUP_THRESHOLD: f32 = 0.85;

/// Seconds without new text before the reader reports itself idle.
pub const IDLE_SILENCE_SECS: f32 = 10.0;

/// Number of recently accepted chunks kept for duplicate suppression.
pub const WINDOW_SIZE: usize = 8;

/// Capacity of the chunk queue between the vision and the audio path.
pub const QUEUE_CAPACITY: usize = 4;

/// A gap wider than this many line heights splits a row into two lines.
pub const MAX_WORD_GAP: f32 = 2.5;

/// Upper bound for one `next_frame` wait.
pub const FRAME_TIMEOUT_MS: u64 = 500;

/// Minimum interval between two frames handed to the vision path.
///
/// OCR on a full frame is slow; reading faster than this only repeats work.
pub const MIN_FRAME_INTERVAL_MS: u64 = 1000;

/// Upper bound for one OCR call.
pub const OCR_TIMEOUT_MS: u64 = 5000;

/// Upper bound for one spoken chunk.
pub const UTTERANCE_TIMEOUT_MS: u64 = 30_000;

/// Interval at which blocked workers re-check the stop signal.
pub const POLL_INTERVAL_MS: u64 = 50;

/// How long `stop` waits for workers before detaching them.
pub const SHUTDOWN_TIMEOUT_MS: u64 = 5000;

/// Width frames are normalised to before OCR.
pub const TARGET_WIDTH: u32 = 600;

/// Largest skew angle the deskew search considers, in degrees.
pub const MAX_SKEW_DEGREES: f32 = 5.0;

/// Step of the deskew search, in degrees.
pub const SKEW_STEP_DEGREES: f32 = 1.0;

/// Pixels of background kept around the inked area when cropping.
pub const CROP_MARGIN: u32 = 8;

/// Tesseract page segmentation mode: a single uniform block of text.
pub const TESSERACT_PSM: u32 = 6;

/// Default OCR program.
pub const OCR_PROGRAM: &str = "tesseract";

/// Default speech program.
pub const SPEECH_PROGRAM: &str = "espeak-ng";

/// Speech voices for common Tesseract language packs.
///
/// espeak-ng names voices by ISO 639-1 code while Tesseract uses ISO 639-2.
pub const SPEECH_VOICES: &[(&str, &str)] = &[
    ("eng", "en"),
    ("deu", "de"),
    ("fra", "fr"),
    ("spa", "es"),
    ("ita", "it"),
    ("por", "pt"),
    ("nld", "nl"),
];
