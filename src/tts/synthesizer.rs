//! Audio-side station: speaks assembled chunks strictly in sequence order.

use crate::config::InterruptPolicy;
use crate::error::{ReaderError, Result};
use crate::pipeline::error::StationError;
use crate::pipeline::state::{RunProgress, SharedSettings};
use crate::pipeline::station::Station;
use crate::pipeline::stop::StopSignal;
use crate::pipeline::types::{AssembledChunk, LanguagePack};
use crate::pipeline::worker::{BoundedWorker, CallError};
use crate::tts::engine::SpeechEngine;
use std::sync::Arc;
use std::time::Duration;

/// How long the playback thread gets to exit when the station shuts down.
const PLAYBACK_SHUTDOWN: Duration = Duration::from_millis(500);

/// Wraps a speech engine as the terminal station of the pipeline.
///
/// Playback runs on its own thread so the station can give up on an utterance
/// after `utterance_timeout`, or immediately under the cut policy.
pub struct SpeechSynthesizer {
    engine: Arc<dyn SpeechEngine>,
    worker: Option<BoundedWorker<(String, LanguagePack), Result<()>>>,
    utterance_timeout: Duration,
    stop: StopSignal,
    settings: SharedSettings,
    progress: Arc<RunProgress>,
    last_spoken: Option<u64>,
    echo_text: bool,
}

impl SpeechSynthesizer {
    pub fn new(
        engine: Arc<dyn SpeechEngine>,
        utterance_timeout: Duration,
        stop: StopSignal,
        settings: SharedSettings,
        progress: Arc<RunProgress>,
    ) -> Result<Self> {
        let playback_engine = Arc::clone(&engine);
        let worker = BoundedWorker::spawn(
            "playback",
            move |(text, language): (String, LanguagePack)| {
                playback_engine.synthesize_and_play(&text, &language)
            },
        )?;
        Ok(Self {
            engine,
            worker: Some(worker),
            utterance_timeout,
            stop,
            settings,
            progress,
            last_spoken: None,
            echo_text: false,
        })
    }

    /// Also print every spoken chunk to stdout.
    pub fn with_echo(mut self, echo_text: bool) -> Self {
        self.echo_text = echo_text;
        self
    }

    /// Refuse anything at or below `sequence_no`.
    pub fn resuming_after(mut self, sequence_no: Option<u64>) -> Self {
        self.last_spoken = sequence_no;
        self
    }

    fn failure(&self, sequence_no: u64, message: impl Into<String>) -> StationError {
        self.progress.synthesis_failed();
        let error = ReaderError::SynthesisFailure {
            sequence_no,
            message: message.into(),
        };
        StationError::Recoverable(error.to_string())
    }
}

impl Station for SpeechSynthesizer {
    type Input = AssembledChunk;

    fn name(&self) -> &'static str {
        "synthesizer"
    }

    fn process(&mut self, chunk: AssembledChunk) -> std::result::Result<(), StationError> {
        let sequence_no = chunk.sequence_no;

        if self.stop.is_raised() {
            self.progress.chunk_dropped();
            tracing::debug!(sequence_no, "stopping, chunk not spoken");
            return Ok(());
        }

        if let Some(last) = self.last_spoken
            && sequence_no <= last
        {
            tracing::warn!(sequence_no, last, "out-of-order chunk dropped");
            return Ok(());
        }
        self.last_spoken = Some(sequence_no);

        if self.echo_text {
            println!("{}", chunk.text);
        }

        let Some(worker) = self.worker.as_mut() else {
            return Err(StationError::Fatal("playback thread already shut down".to_string()));
        };
        let policy = self.settings.snapshot().interrupt_policy;
        let interrupt = match policy {
            InterruptPolicy::Cut => Some(&self.stop),
            InterruptPolicy::Finish => None,
        };

        tracing::debug!(sequence_no, text = %chunk.text, "speaking");
        match worker.call((chunk.text, chunk.language), self.utterance_timeout, interrupt) {
            Ok(Ok(())) => {
                self.progress.chunk_spoken();
                Ok(())
            }
            Ok(Err(error)) => Err(self.failure(sequence_no, error.to_string())),
            Err(CallError::Interrupted) => {
                self.engine.cancel();
                tracing::info!(sequence_no, "utterance cut by stop");
                Ok(())
            }
            Err(CallError::TimedOut) => {
                self.engine.cancel();
                Err(self.failure(sequence_no, "utterance timed out"))
            }
            Err(error @ (CallError::Busy | CallError::NothingPending)) => {
                Err(self.failure(sequence_no, error.to_string()))
            }
            Err(CallError::Disconnected) => {
                Err(StationError::Fatal("playback thread exited".to_string()))
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take()
            && !worker.shutdown(PLAYBACK_SHUTDOWN)
        {
            self.engine.cancel();
        }
    }
}
