use crate::assembler::{AssemblerConfig, SimilarityMetric};
use crate::camera::FrameSourceConfig;
use crate::defaults;
use crate::error::{ReaderError, Result};
use crate::pipeline::types::LanguagePack;
use crate::vision::PreprocessConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub reader: ReaderConfig,
    pub camera: CameraConfig,
    pub vision: VisionConfig,
    pub ocr: OcrConfig,
    pub speech: SpeechConfig,
    pub pipeline: PipelineConfig,
}

/// Settings that may change while a run is active
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReaderConfig {
    pub language_pack: LanguagePack,
    pub confidence_threshold: f32,
    pub dedup_threshold: f32,
    pub dedup_metric: SimilarityMetric,
    pub idle_silence_seconds: f32,
    pub interrupt_policy: InterruptPolicy,
}

/// Frame acquisition configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    pub frame_timeout_ms: u64,
    pub min_frame_interval_ms: u64,
}

/// Frame preprocessing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VisionConfig {
    pub target_width: u32,
    pub deskew: bool,
    pub max_skew_degrees: f32,
    pub skew_step_degrees: f32,
    pub crop_margin: u32,
}

/// OCR program configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OcrConfig {
    pub program: String,
    pub psm: u32,
    pub timeout_ms: u64,
}

/// Speech program configuration
///
/// `args` may contain `{voice}` and `{text}` placeholders. `voices` maps a
/// language pack to the voice name passed to the program. An argument that
/// starts with `{text}` must follow a `--` so recognised text is never parsed
/// as an option.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpeechConfig {
    pub program: String,
    pub args: Vec<String>,
    pub voices: BTreeMap<String, String>,
    pub timeout_ms: u64,
    pub echo_text: bool,
}

/// Queueing and shutdown configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    pub window_size: usize,
    pub max_word_gap: f32,
    pub poll_interval_ms: u64,
    pub shutdown_timeout_ms: u64,
}

/// What happens to the utterance in progress when the pipeline stops
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InterruptPolicy {
    /// Let the current utterance end naturally
    #[default]
    Finish,
    /// Cancel the current utterance immediately
    Cut,
}

impl fmt::Display for InterruptPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptPolicy::Finish => write!(f, "finish"),
            InterruptPolicy::Cut => write!(f, "cut"),
        }
    }
}

impl FromStr for InterruptPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "finish" => Ok(InterruptPolicy::Finish),
            "cut" => Ok(InterruptPolicy::Cut),
            other => Err(format!(
                "unknown interrupt policy '{other}' (expected finish or cut)"
            )),
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            language_pack: LanguagePack::default(),
            confidence_threshold: defaults::CONFIDENCE_THRESHOLD,
            dedup_threshold: defaults::DEDUP_THRESHOLD,
            dedup_metric: SimilarityMetric::default(),
            idle_silence_seconds: defaults::IDLE_SILENCE_SECS,
            interrupt_policy: InterruptPolicy::default(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            frame_timeout_ms: defaults::FRAME_TIMEOUT_MS,
            min_frame_interval_ms: defaults::MIN_FRAME_INTERVAL_MS,
        }
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            target_width: defaults::TARGET_WIDTH,
            deskew: true,
            max_skew_degrees: defaults::MAX_SKEW_DEGREES,
            skew_step_degrees: defaults::SKEW_STEP_DEGREES,
            crop_margin: defaults::CROP_MARGIN,
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            program: defaults::OCR_PROGRAM.to_string(),
            psm: defaults::TESSERACT_PSM,
            timeout_ms: defaults::OCR_TIMEOUT_MS,
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            program: defaults::SPEECH_PROGRAM.to_string(),
            args: ["-v", "{voice}", "--", "{text}"].map(String::from).to_vec(),
            voices: defaults::SPEECH_VOICES
                .iter()
                .map(|(pack, voice)| (pack.to_string(), voice.to_string()))
                .collect(),
            timeout_ms: defaults::UTTERANCE_TIMEOUT_MS,
            echo_text: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: defaults::QUEUE_CAPACITY,
            window_size: defaults::WINDOW_SIZE,
            max_word_gap: defaults::MAX_WORD_GAP,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            shutdown_timeout_ms: defaults::SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - READALOUD_LANGUAGE → reader.language_pack
    /// - READALOUD_CONFIDENCE → reader.confidence_threshold
    /// - READALOUD_INTERRUPT → reader.interrupt_policy
    ///
    /// Unparseable values are ignored with a warning.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(language) = std::env::var("READALOUD_LANGUAGE")
            && !language.is_empty()
        {
            self.reader.language_pack = LanguagePack::new(language);
        }

        if let Ok(confidence) = std::env::var("READALOUD_CONFIDENCE")
            && !confidence.is_empty()
        {
            match confidence.parse() {
                Ok(value) => self.reader.confidence_threshold = value,
                Err(_) => tracing::warn!("ignoring READALOUD_CONFIDENCE={confidence}: not a number"),
            }
        }

        if let Ok(policy) = std::env::var("READALOUD_INTERRUPT")
            && !policy.is_empty()
        {
            match policy.parse() {
                Ok(value) => self.reader.interrupt_policy = value,
                Err(e) => tracing::warn!("ignoring READALOUD_INTERRUPT: {e}"),
            }
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/readaloud/config.toml on Linux
    #[cfg(feature = "cli")]
    pub fn default_path() -> Option<std::path::PathBuf> {
        dirs::config_dir().map(|dir| dir.join("readaloud").join("config.toml"))
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ReaderError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Check every value the pipeline depends on.
    pub fn validate(&self) -> Result<()> {
        let reader = &self.reader;
        let language = reader.language_pack.as_str();
        if language.is_empty()
            || !language
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '+')
        {
            return Err(ReaderError::configuration(
                "reader.language_pack",
                format!("'{language}' is not a language pack identifier"),
            ));
        }
        unit_interval("reader.confidence_threshold", reader.confidence_threshold)?;
        unit_interval("reader.dedup_threshold", reader.dedup_threshold)?;
        if reader.dedup_threshold == 0.0 {
            return Err(ReaderError::configuration(
                "reader.dedup_threshold",
                "0 would treat every line as a duplicate",
            ));
        }
        positive("reader.idle_silence_seconds", reader.idle_silence_seconds)?;

        nonzero("camera.frame_timeout_ms", self.camera.frame_timeout_ms)?;

        if !(0.0..=45.0).contains(&self.vision.max_skew_degrees) {
            return Err(ReaderError::configuration(
                "vision.max_skew_degrees",
                format!("{} is outside [0, 45]", self.vision.max_skew_degrees),
            ));
        }
        positive("vision.skew_step_degrees", self.vision.skew_step_degrees)?;

        if self.ocr.program.trim().is_empty() {
            return Err(ReaderError::configuration("ocr.program", "must not be empty"));
        }
        nonzero("ocr.timeout_ms", self.ocr.timeout_ms)?;

        if self.speech.program.trim().is_empty() {
            return Err(ReaderError::configuration("speech.program", "must not be empty"));
        }
        if !self.speech.args.iter().any(|arg| arg.contains("{text}")) {
            return Err(ReaderError::configuration(
                "speech.args",
                "must contain a {text} placeholder",
            ));
        }
        let end_of_options = self.speech.args.iter().position(|arg| arg == "--");
        let first_bare_text = self
            .speech
            .args
            .iter()
            .position(|arg| arg.starts_with("{text}"));
        if let Some(text_at) = first_bare_text
            && end_of_options.is_none_or(|end| end > text_at)
        {
            return Err(ReaderError::configuration(
                "speech.args",
                "{text} must come after a -- argument",
            ));
        }
        nonzero("speech.timeout_ms", self.speech.timeout_ms)?;

        if self.pipeline.queue_capacity == 0 {
            return Err(ReaderError::configuration(
                "pipeline.queue_capacity",
                "must be at least 1",
            ));
        }
        positive("pipeline.max_word_gap", self.pipeline.max_word_gap)?;
        nonzero("pipeline.poll_interval_ms", self.pipeline.poll_interval_ms)?;
        nonzero("pipeline.shutdown_timeout_ms", self.pipeline.shutdown_timeout_ms)?;
        Ok(())
    }

    pub fn frame_source(&self) -> FrameSourceConfig {
        FrameSourceConfig {
            frame_timeout: Duration::from_millis(self.camera.frame_timeout_ms),
            min_frame_interval: Duration::from_millis(self.camera.min_frame_interval_ms),
        }
    }

    pub fn preprocess(&self) -> PreprocessConfig {
        PreprocessConfig {
            target_width: self.vision.target_width,
            deskew: self.vision.deskew,
            max_skew_degrees: self.vision.max_skew_degrees,
            skew_step_degrees: self.vision.skew_step_degrees,
            crop_margin: self.vision.crop_margin,
        }
    }

    pub fn assembler(&self) -> AssemblerConfig {
        AssemblerConfig {
            window_size: self.pipeline.window_size,
            max_word_gap: self.pipeline.max_word_gap,
            metric: self.reader.dedup_metric,
        }
    }

    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_millis(self.ocr.timeout_ms)
    }

    pub fn utterance_timeout(&self) -> Duration {
        Duration::from_millis(self.speech.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.pipeline.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline.shutdown_timeout_ms)
    }
}

fn unit_interval(key: &str, value: f32) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ReaderError::configuration(
            key,
            format!("{value} is outside [0, 1]"),
        ))
    }
}

fn positive(key: &str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ReaderError::configuration(key, format!("{value} must be positive")))
    }
}

fn nonzero(key: &str, value: u64) -> Result<()> {
    if value > 0 {
        Ok(())
    } else {
        Err(ReaderError::configuration(key, "must be greater than 0"))
    }
}
