//! Run lifecycle: start, reconfigure, poll and stop the capture-to-speech pipeline.

use crate::assembler::TextAssembler;
use crate::camera::{CaptureDevice, FrameSource, SharedDevice, shared};
use crate::config::Config;
use crate::error::{ReaderError, Result};
use crate::ocr::{OcrEngine, TextExtractor};
use crate::pipeline::error::{ErrorReporter, LogReporter};
use crate::pipeline::state::{
    Lifecycle, PipelineState, PipelineStatus, RunEnd, RunSettings, RunStats, RunSummary,
};
use crate::pipeline::station::StationRunner;
use crate::pipeline::stop::StopSignal;
use crate::pipeline::types::{AssembledChunk, LanguagePack};
use crate::pipeline::vision::{VisionEnd, VisionExit, VisionPath};
use crate::tts::{SpeechEngine, SpeechSynthesizer};
use crate::vision::FramePreprocessor;
use crossbeam_channel::{Sender, bounded};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const JOIN_POLL: Duration = Duration::from_millis(20);

/// Answer of [`PipelineController::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    /// No run.
    Idle,
    Running(RunStats),
    /// Stop was requested and workers are still winding down.
    Stopping(RunStats),
    /// The run ended and was torn down; the controller is idle again.
    Finished(RunSummary),
}

struct ActiveRun {
    state: PipelineState,
    stop: StopSignal,
    vision: JoinHandle<VisionExit>,
    audio: StationRunner,
    shutdown_timeout: Duration,
    stop_requested_at: Option<Instant>,
}

/// Owns the collaborators and at most one active run.
///
/// The camera and both engines outlive individual runs, so a controller can be
/// started again after a stop. Sequence numbers continue across runs.
pub struct PipelineController {
    camera: SharedDevice,
    ocr: Arc<dyn OcrEngine>,
    speech: Arc<dyn SpeechEngine>,
    reporter: Arc<dyn ErrorReporter>,
    config: Config,
    run: Option<ActiveRun>,
    next_sequence_no: u64,
}

impl PipelineController {
    pub fn new(
        camera: impl CaptureDevice + 'static,
        ocr: Arc<dyn OcrEngine>,
        speech: Arc<dyn SpeechEngine>,
    ) -> Self {
        Self {
            camera: shared(camera),
            ocr,
            speech,
            reporter: Arc::new(LogReporter),
            config: Config::default(),
            run: None,
            next_sequence_no: 0,
        }
    }

    /// Route absorbed per-frame and per-chunk errors somewhere other than the log.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.run
            .as_ref()
            .map_or(Lifecycle::Idle, |run| run.state.lifecycle)
    }

    /// Configuration of the current run, or the one stored for the next start.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens the camera and spawns the vision and audio workers.
    ///
    /// On failure everything already spawned is wound down again and the
    /// camera is left closed.
    pub fn start(&mut self, config: Config) -> Result<()> {
        if self.run.is_some() {
            return Err(self.invalid_state("start"));
        }
        config.validate()?;
        self.check_language(&config.reader.language_pack)?;

        let state = PipelineState::new(RunSettings::from(&config.reader));
        let stop = StopSignal::new();
        let (chunk_tx, chunk_rx) = bounded(config.pipeline.queue_capacity);

        let synthesizer = SpeechSynthesizer::new(
            Arc::clone(&self.speech),
            config.utterance_timeout(),
            stop.clone(),
            state.settings.clone(),
            Arc::clone(&state.progress),
        )?
        .with_echo(config.speech.echo_text)
        .resuming_after(self.next_sequence_no.checked_sub(1));
        let audio = StationRunner::spawn(synthesizer, chunk_rx, Arc::clone(&self.reporter))?;

        let (vision, device) = match self.launch_vision(&config, &state, &stop, chunk_tx) {
            Ok(launched) => launched,
            Err(error) => {
                // The queue's only sender is gone, so the idle station exits.
                stop.raise();
                if wait_until(Instant::now() + config.shutdown_timeout(), || audio.is_finished()) {
                    if let Err(message) = audio.join() {
                        tracing::error!("{message}");
                    }
                } else {
                    tracing::warn!("audio worker still running after failed start, detaching");
                }
                return Err(error);
            }
        };

        tracing::info!(
            device = %device,
            language = %config.reader.language_pack,
            first_sequence_no = self.next_sequence_no,
            "reading started"
        );
        let shutdown_timeout = config.shutdown_timeout();
        self.config = config;
        self.run = Some(ActiveRun {
            state,
            stop,
            vision,
            audio,
            shutdown_timeout,
            stop_requested_at: None,
        });
        Ok(())
    }

    /// Opens the camera and starts the vision thread feeding `chunk_tx`.
    ///
    /// Returns the thread and the device name. Whatever was set up before a
    /// failure is shut down before the error is returned.
    fn launch_vision(
        &self,
        config: &Config,
        state: &PipelineState,
        stop: &StopSignal,
        chunk_tx: Sender<AssembledChunk>,
    ) -> Result<(JoinHandle<VisionExit>, String)> {
        let wait = config.shutdown_timeout();
        let extractor = TextExtractor::new(
            Arc::clone(&self.ocr),
            config.ocr_timeout(),
            stop.clone(),
            Arc::clone(&self.reporter),
        )?;
        let mut source = match FrameSource::new(
            Arc::clone(&self.camera),
            config.frame_source(),
            stop.clone(),
            1,
        ) {
            Ok(source) => source,
            Err(error) => {
                extractor.shutdown(wait);
                return Err(error);
            }
        };
        if let Err(error) = source.open() {
            source.shutdown(wait);
            extractor.shutdown(wait);
            return Err(error);
        }
        let device = source.device_name().to_string();

        let path = VisionPath::new(
            source,
            FramePreprocessor::new(config.preprocess()),
            extractor,
            TextAssembler::new(config.assembler()).starting_at(self.next_sequence_no),
            chunk_tx,
            state.settings.clone(),
            Arc::clone(&state.progress),
            stop.clone(),
            Arc::clone(&self.reporter),
            config.poll_interval(),
        );
        let vision_wait = config.shutdown_timeout() / 2;
        match thread::Builder::new()
            .name("readaloud-vision".to_string())
            .spawn(move || path.run(vision_wait))
        {
            Ok(handle) => Ok((handle, device)),
            Err(error) => {
                // The path went down with the closure; its capture thread never ran.
                self.close_camera();
                Err(error.into())
            }
        }
    }

    fn close_camera(&self) {
        let mut device = match self.camera.lock() {
            Ok(device) => device,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = device.close() {
            tracing::warn!("failed to close camera: {e}");
        }
    }

    /// Raises the stop signal without waiting. `poll` finishes the teardown.
    pub fn request_stop(&mut self) -> Result<()> {
        let Some(run) = self.run.as_mut() else {
            return Err(ReaderError::InvalidState {
                operation: "stop",
                state: Lifecycle::Idle.as_str(),
            });
        };
        if run.stop_requested_at.is_none() {
            tracing::info!("stopping");
            run.stop.raise();
            run.stop_requested_at = Some(Instant::now());
            run.state.lifecycle = Lifecycle::Stopping;
        }
        Ok(())
    }

    /// Stops the run and waits for it to drain, at most `shutdown_timeout`.
    ///
    /// Returns the device error instead of a summary if the camera had failed.
    pub fn stop(&mut self) -> Result<RunSummary> {
        self.request_stop()?;
        match self.run.take() {
            Some(run) => self.finish(run),
            None => Err(self.invalid_state("stop")),
        }
    }

    /// Reports progress, and tears the run down once it has ended on its own
    /// (finite camera, device failure) or a requested stop has drained.
    pub fn poll(&mut self) -> Result<PollStatus> {
        let Some(run) = self.run.as_ref() else {
            return Ok(PollStatus::Idle);
        };
        let vision_done = run.vision.is_finished();
        let audio_done = run.audio.is_finished();
        let ended = match run.stop_requested_at {
            Some(at) => (vision_done && audio_done) || at.elapsed() >= run.shutdown_timeout,
            // Exhausted: wait until the queued chunks were spoken.
            None => vision_done && (run.stop.is_raised() || audio_done),
        };
        if !ended {
            let stats = run.state.progress.stats();
            return Ok(match run.state.lifecycle {
                Lifecycle::Stopping => PollStatus::Stopping(stats),
                _ => PollStatus::Running(stats),
            });
        }
        match self.run.take() {
            Some(run) => self.finish(run).map(PollStatus::Finished),
            None => Ok(PollStatus::Idle),
        }
    }

    /// Replaces the configuration.
    ///
    /// While running, the `[reader]` settings apply from the next frame; other
    /// sections take effect on the next start. Rejected values leave the
    /// previous configuration in place.
    pub fn configure(&mut self, config: Config) -> Result<()> {
        if self.lifecycle() == Lifecycle::Stopping {
            return Err(self.invalid_state("configure"));
        }
        config.validate()?;
        self.check_language(&config.reader.language_pack)?;

        if let Some(run) = self.run.as_ref() {
            run.state.settings.publish(RunSettings::from(&config.reader));
            tracing::info!(
                language = %config.reader.language_pack,
                confidence = config.reader.confidence_threshold,
                "settings updated"
            );
            let mut rest = config.clone();
            rest.reader = self.config.reader.clone();
            if rest != self.config || config.reader.dedup_metric != self.config.reader.dedup_metric {
                tracing::info!("changes outside live reader settings apply on the next start");
            }
        }
        self.config = config;
        Ok(())
    }

    pub fn status(&self) -> PipelineStatus {
        match self.run.as_ref() {
            Some(run) => PipelineStatus {
                lifecycle: run.state.lifecycle,
                settings: (*run.state.settings.snapshot()).clone(),
                stats: run.state.progress.stats(),
                idle: run.state.progress.is_idle(),
            },
            None => PipelineStatus {
                lifecycle: Lifecycle::Idle,
                settings: RunSettings::from(&self.config.reader),
                stats: RunStats::default(),
                idle: false,
            },
        }
    }

    fn check_language(&self, language: &LanguagePack) -> Result<()> {
        for (engine, supported) in [
            (self.ocr.name(), self.ocr.supports_language(language)),
            (self.speech.name(), self.speech.supports_language(language)),
        ] {
            if !supported {
                return Err(ReaderError::configuration(
                    "reader.language_pack",
                    format!("'{language}' is not available in {engine}"),
                ));
            }
        }
        Ok(())
    }

    fn invalid_state(&self, operation: &'static str) -> ReaderError {
        ReaderError::InvalidState {
            operation,
            state: self.lifecycle().as_str(),
        }
    }

    fn finish(&mut self, run: ActiveRun) -> Result<RunSummary> {
        let ActiveRun {
            state,
            stop,
            vision,
            audio,
            shutdown_timeout,
            stop_requested_at,
        } = run;
        stop.raise();
        let deadline = stop_requested_at.unwrap_or_else(Instant::now) + shutdown_timeout;
        let mut detached_workers = 0;

        // Vision first: it closes the chunk queue on its way out.
        let exit = if wait_until(deadline, || vision.is_finished()) {
            match vision.join() {
                Ok(exit) => Some(exit),
                Err(_) => {
                    tracing::error!("vision thread panicked");
                    None
                }
            }
        } else {
            detached_workers += 1;
            None
        };

        if wait_until(deadline, || audio.is_finished()) {
            if let Err(message) = audio.join() {
                tracing::error!("{message}");
            }
        } else {
            // Finish policy waits on the utterance; it must not outlive the run.
            self.speech.cancel();
            detached_workers += 1;
        }

        if let Some(exit) = exit.as_ref() {
            detached_workers += exit.detached_workers;
        }
        if detached_workers > 0 {
            tracing::warn!(detached_workers, "shutdown timeout, worker thread(s) detached");
        }

        let stats = state.progress.stats();
        if let Some(last) = stats.last_sequence_no {
            self.next_sequence_no = self.next_sequence_no.max(last + 1);
        }

        let ended_by = match exit.map(|exit| exit.end) {
            Some(VisionEnd::Failed(error)) => {
                tracing::info!("run ended by device failure");
                return Err(error);
            }
            Some(VisionEnd::Exhausted) => RunEnd::Exhausted,
            Some(VisionEnd::Stopped) | None => RunEnd::Stopped,
        };
        let summary = RunSummary {
            stats,
            elapsed: state.started_at.elapsed(),
            ended_by,
            detached_workers,
        };
        tracing::info!(
            frames = stats.frames_captured,
            spoken = stats.chunks_spoken,
            dropped = stats.chunks_dropped,
            elapsed = %humantime::format_duration(Duration::from_secs(summary.elapsed.as_secs())),
            "reading finished"
        );
        Ok(summary)
    }
}

/// Polls `finished` until it holds or `deadline` passes.
fn wait_until(deadline: Instant, finished: impl Fn() -> bool) -> bool {
    loop {
        if finished() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(JOIN_POLL);
    }
}
