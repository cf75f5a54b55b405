//! Reading application entry point.
//!
//! Wires a camera (replayed frames or, with the `live-camera` feature, a
//! physical one), Tesseract and the speech program into a controller and
//! drives it until the frames run out or Ctrl+C.

#[cfg(feature = "live-camera")]
use crate::camera::LiveCamera;
use crate::camera::{CaptureDevice, ReplayCamera};
use crate::command::{CommandRunner, SystemCommandRunner};
use crate::config::{Config, InterruptPolicy};
use crate::error::{ReaderError, Result};
use crate::ocr::TesseractEngine;
use crate::pipeline::controller::{PipelineController, PollStatus};
use crate::pipeline::state::{RunEnd, RunSummary};
use crate::pipeline::types::LanguagePack;
use crate::tts::CommandSpeechEngine;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How often the binary asks the controller for progress.
const STATUS_INTERVAL: Duration = Duration::from_millis(100);

/// Log filter for the verbosity flags. `RUST_LOG` wins when set.
pub fn log_filter(quiet: bool, verbose: u8) -> &'static str {
    if quiet {
        return "warn";
    }
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Install the tracing subscriber, logging to stderr.
pub fn init_logging(quiet: bool, verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_filter(quiet, verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Command-line overrides for a reading run.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub frames: Option<PathBuf>,
    /// Live camera index; ignored when `frames` is set.
    pub device: Option<u32>,
    pub language: Option<String>,
    pub confidence: Option<f32>,
    pub interrupt: Option<InterruptPolicy>,
    pub looping: bool,
    pub echo: bool,
    pub interval: Option<Duration>,
}

impl ReadOptions {
    /// Apply the flags on top of file and environment configuration.
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(language) = &self.language {
            config.reader.language_pack = LanguagePack::new(language.as_str());
        }
        if let Some(confidence) = self.confidence {
            config.reader.confidence_threshold = confidence;
        }
        if let Some(policy) = self.interrupt {
            config.reader.interrupt_policy = policy;
        }
        if self.echo {
            config.speech.echo_text = true;
        }
        if let Some(interval) = self.interval {
            config.camera.min_frame_interval_ms =
                u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        }
        config
    }
}

/// The camera named by the options.
pub fn select_camera(options: &ReadOptions) -> Result<Box<dyn CaptureDevice>> {
    if let Some(frames) = &options.frames {
        return Ok(Box::new(ReplayCamera::new(frames.clone()).looping(options.looping)));
    }
    match options.device {
        #[cfg(feature = "live-camera")]
        Some(index) => Ok(Box::new(LiveCamera::new(index))),
        #[cfg(not(feature = "live-camera"))]
        Some(_) => Err(ReaderError::Other(
            "this build has no live camera support; rebuild with --features live-camera"
                .to_string(),
        )),
        None => Err(ReaderError::Other(
            "no frame source given; pass --frames <DIR> or --device <INDEX>".to_string(),
        )),
    }
}

/// Run the default command: read the selected camera aloud.
pub async fn run_read_command(config: Config, options: ReadOptions, quiet: bool) -> Result<RunSummary> {
    let camera = select_camera(&options)?;
    let config = options.apply(config);
    config.validate()?;

    let ocr = TesseractEngine::new(SystemCommandRunner::new(), &config.ocr.program, config.ocr.psm);
    let speech = CommandSpeechEngine::system(&config.speech);
    let controller = PipelineController::new(camera, Arc::new(ocr), Arc::new(speech));

    if !quiet {
        eprintln!("Reading. Press Ctrl+C to stop.");
    }
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("cannot listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };
    drive(controller, config, shutdown, quiet).await
}

/// Start `controller` and poll it until the run ends.
///
/// When `shutdown` completes, a stop is requested and the run drains
/// according to its interrupt policy. Needs a multi-threaded runtime.
pub async fn drive(
    mut controller: PipelineController,
    config: Config,
    shutdown: impl Future<Output = ()>,
    quiet: bool,
) -> Result<RunSummary> {
    controller.start(config)?;

    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    tokio::pin!(shutdown);
    let mut stopping = false;

    loop {
        tokio::select! {
            () = &mut shutdown, if !stopping => {
                stopping = true;
                if !quiet {
                    eprintln!("\nStopping...");
                }
                controller.request_stop()?;
            }
            _ = ticker.tick() => {
                // Teardown joins worker threads.
                match tokio::task::block_in_place(|| controller.poll())? {
                    PollStatus::Finished(summary) => return Ok(summary),
                    PollStatus::Idle => {
                        return Err(ReaderError::Other("pipeline stopped unexpectedly".to_string()));
                    }
                    PollStatus::Running(_) | PollStatus::Stopping(_) => {}
                }
            }
        }
    }
}

/// One line of `summary` for the terminal.
pub fn format_summary(summary: &RunSummary) -> String {
    let stats = &summary.stats;
    let reason = match summary.ended_by {
        RunEnd::Stopped => "stopped",
        RunEnd::Exhausted => "no more frames",
    };
    let mut line = format!(
        "{reason} after {}: {} frame(s), {} line(s) spoken, {} skipped frame(s), {} OCR failure(s)",
        humantime::format_duration(Duration::from_secs(summary.elapsed.as_secs())),
        stats.frames_captured,
        stats.chunks_spoken,
        stats.frames_skipped,
        stats.extraction_failures,
    );
    if stats.synthesis_failures > 0 {
        line.push_str(&format!(", {} speech failure(s)", stats.synthesis_failures));
    }
    if stats.chunks_dropped > 0 {
        line.push_str(&format!(", {} line(s) not spoken", stats.chunks_dropped));
    }
    if summary.detached_workers > 0 {
        line.push_str(&format!(", {} worker(s) detached", summary.detached_workers));
    }
    line
}

/// Result of one tool check.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckResult {
    /// Tool answered; carries its first output line.
    Ok(String),
    NotFound,
    Warning(String),
}

/// Check result for one external program.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCheck {
    pub role: &'static str,
    pub program: String,
    pub result: CheckResult,
}

/// Check the OCR and speech programs named in `config`.
pub fn check_tools<R: CommandRunner>(runner: &R, config: &Config) -> Vec<ToolCheck> {
    [("OCR", &config.ocr.program), ("speech", &config.speech.program)]
        .into_iter()
        .map(|(role, program)| ToolCheck {
            role,
            program: program.clone(),
            result: check_program(runner, program),
        })
        .collect()
}

fn check_program<R: CommandRunner>(runner: &R, program: &str) -> CheckResult {
    match runner.run(program, &["--version".to_string()], None) {
        Ok(output) => CheckResult::Ok(output.lines().next().unwrap_or("").trim().to_string()),
        Err(ReaderError::ToolNotFound { .. }) => CheckResult::NotFound,
        Err(e) => CheckResult::Warning(e.to_string()),
    }
}

/// Languages the configured Tesseract has data for.
pub fn ocr_languages<R: CommandRunner>(runner: R, config: &Config) -> Result<Vec<String>> {
    TesseractEngine::new(runner, &config.ocr.program, config.ocr.psm).list_languages()
}

/// Print the `check` report. Returns `true` when both programs answered.
pub fn run_check_command(config: &Config) -> bool {
    let runner = SystemCommandRunner::new();
    println!("Checking external programs...\n");

    let mut all_ok = true;
    for check in check_tools(&runner, config) {
        print!("{} ({}): ", check.program, check.role);
        match check.result {
            CheckResult::Ok(version) if version.is_empty() => println!("✓ OK"),
            CheckResult::Ok(version) => println!("✓ OK ({version})"),
            CheckResult::NotFound => {
                all_ok = false;
                println!("✗ NOT FOUND");
                println!("  Install: sudo apt install {}  (Debian/Ubuntu)", check.program);
            }
            CheckResult::Warning(message) => {
                all_ok = false;
                println!("⚠ WARNING: {message}");
            }
        }
    }

    match ocr_languages(runner, config) {
        Ok(languages) if languages.is_empty() => println!("\nOCR languages: none installed"),
        Ok(languages) => {
            let wanted = config.reader.language_pack.as_str();
            println!("\nOCR languages: {}", languages.join(", "));
            if !languages.iter().any(|l| l == wanted) {
                all_ok = false;
                println!("⚠ configured language '{wanted}' is not installed");
            }
        }
        Err(e) => println!("\nOCR languages: unavailable ({e})"),
    }
    all_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::MockCamera;
    use crate::command::MockCommandRunner;
    use crate::ocr::{MockOcrEngine, RecognizedText};
    use crate::pipeline::state::RunStats;
    use crate::pipeline::types::BoundingBox;
    use crate::tts::MockSpeechEngine;

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.camera.min_frame_interval_ms = 0;
        config.camera.frame_timeout_ms = 50;
        config.pipeline.poll_interval_ms = 10;
        config
    }

    #[test]
    fn test_log_filter_levels() {
        assert_eq!(log_filter(false, 0), "info");
        assert_eq!(log_filter(false, 1), "debug");
        assert_eq!(log_filter(false, 3), "trace");
        assert_eq!(log_filter(true, 2), "warn");
    }

    #[test]
    fn test_read_options_override_config() {
        let options = ReadOptions {
            language: Some("deu".to_string()),
            confidence: Some(0.8),
            interrupt: Some(InterruptPolicy::Cut),
            echo: true,
            interval: Some(Duration::from_millis(250)),
            ..ReadOptions::default()
        };
        let config = options.apply(Config::default());
        assert_eq!(config.reader.language_pack.as_str(), "deu");
        assert_eq!(config.reader.confidence_threshold, 0.8);
        assert_eq!(config.reader.interrupt_policy, InterruptPolicy::Cut);
        assert!(config.speech.echo_text);
        assert_eq!(config.camera.min_frame_interval_ms, 250);
    }

    #[test]
    fn test_empty_options_keep_config() {
        let config = ReadOptions::default().apply(Config::default());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_select_camera_prefers_frame_directory() {
        let options = ReadOptions {
            frames: Some(PathBuf::from("/tmp/pages")),
            ..ReadOptions::default()
        };
        let camera = select_camera(&options).unwrap();
        assert!(camera.name().contains("pages"));
    }

    #[cfg(not(feature = "live-camera"))]
    #[test]
    fn test_device_without_live_camera_support_is_an_error() {
        let options = ReadOptions {
            device: Some(0),
            ..ReadOptions::default()
        };
        let error = select_camera(&options).err().unwrap();
        assert!(error.to_string().contains("live-camera"));
    }

    #[cfg(feature = "live-camera")]
    #[test]
    fn test_device_selects_live_camera() {
        let options = ReadOptions {
            device: Some(2),
            ..ReadOptions::default()
        };
        assert_eq!(select_camera(&options).unwrap().name(), "camera 2");
    }

    #[tokio::test]
    async fn test_read_without_frames_is_an_error() {
        let result = run_read_command(Config::default(), ReadOptions::default(), true).await;
        assert!(matches!(result, Err(ReaderError::Other(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drive_runs_until_frames_run_out() {
        let text = vec![RecognizedText::new(
            "THE END",
            0.9,
            BoundingBox::new(5.0, 5.0, 80.0, 12.0),
        )];
        let speech = MockSpeechEngine::new();
        let controller = PipelineController::new(
            MockCamera::new().with_pages(2),
            Arc::new(MockOcrEngine::new().with_repeated_response(text, 2)),
            Arc::new(speech.clone()),
        );

        let summary = drive(controller, fast_config(), std::future::pending(), true)
            .await
            .unwrap();
        assert_eq!(summary.ended_by, RunEnd::Exhausted);
        assert_eq!(speech.spoken(), vec!["THE END"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drive_stops_on_shutdown_future() {
        let controller = PipelineController::new(
            MockCamera::new()
                .with_pages(100)
                .with_delay(Duration::from_millis(20)),
            Arc::new(MockOcrEngine::new()),
            Arc::new(MockSpeechEngine::new()),
        );
        let shutdown = tokio::time::sleep(Duration::from_millis(100));

        let summary = drive(controller, fast_config(), shutdown, true).await.unwrap();
        assert_eq!(summary.ended_by, RunEnd::Stopped);
    }

    #[test]
    fn test_format_summary_mentions_failures_only_when_present() {
        let mut summary = RunSummary {
            stats: RunStats {
                frames_captured: 10,
                chunks_spoken: 3,
                ..RunStats::default()
            },
            elapsed: Duration::from_secs(12),
            ended_by: RunEnd::Exhausted,
            detached_workers: 0,
        };
        let line = format_summary(&summary);
        assert!(line.starts_with("no more frames after 12s"));
        assert!(line.contains("3 line(s) spoken"));
        assert!(!line.contains("speech failure"));

        summary.stats.synthesis_failures = 2;
        summary.detached_workers = 1;
        let line = format_summary(&summary);
        assert!(line.contains("2 speech failure(s)"));
        assert!(line.contains("1 worker(s) detached"));
    }

    #[test]
    fn test_check_tools_reports_versions_and_missing_programs() {
        let runner = MockCommandRunner::new()
            .with_response("tesseract 5.3.4\n leptonica-1.82.0")
            .with_error(ReaderError::ToolNotFound {
                tool: "espeak-ng".to_string(),
            });
        let checks = check_tools(&runner, &Config::default());

        assert_eq!(checks[0].program, "tesseract");
        assert_eq!(checks[0].result, CheckResult::Ok("tesseract 5.3.4".to_string()));
        assert_eq!(checks[1].role, "speech");
        assert_eq!(checks[1].result, CheckResult::NotFound);
    }

    #[test]
    fn test_ocr_languages_from_list_langs() {
        let runner = MockCommandRunner::new()
            .with_response("List of available languages in \"/usr/share/tessdata/\" (2):\neng\nosd\n");
        let languages = ocr_languages(runner, &Config::default()).unwrap();
        assert_eq!(languages, vec!["eng", "osd"]);
    }
}
