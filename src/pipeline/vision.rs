//! The vision worker: acquire, preprocess, extract, assemble, push.
//!
//! Frames are handled strictly one at a time. The camera is polled again only
//! after the previous frame's chunks were pushed, so a full chunk queue slows
//! the whole vision side down instead of piling up frames.

use crate::assembler::TextAssembler;
use crate::camera::{FrameResult, FrameSource};
use crate::error::{ReaderError, Result};
use crate::ocr::TextExtractor;
use crate::pipeline::error::{ErrorReporter, StationError};
use crate::pipeline::state::{RunProgress, RunSettings, SharedSettings};
use crate::pipeline::stop::StopSignal;
use crate::pipeline::types::AssembledChunk;
use crate::vision::{FramePreprocessor, Prepared, SkipReason};
use crossbeam_channel::{SendTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

/// What one `step` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A frame went through; `emitted` chunks were queued.
    Frame { frame_id: u64, emitted: usize },
    /// The frame was unusable.
    Skipped { frame_id: u64 },
    /// No frame this time.
    Empty,
    Exhausted,
    Stopped,
}

/// How the vision worker ended.
#[derive(Debug)]
pub enum VisionEnd {
    Stopped,
    Exhausted,
    Failed(ReaderError),
}

#[derive(Debug)]
pub struct VisionExit {
    pub end: VisionEnd,
    /// Helper threads left running after the shutdown wait.
    pub detached_workers: usize,
}

pub struct VisionPath {
    source: FrameSource,
    preprocessor: FramePreprocessor,
    extractor: TextExtractor,
    assembler: TextAssembler,
    chunk_tx: Sender<AssembledChunk>,
    settings: SharedSettings,
    progress: Arc<RunProgress>,
    stop: StopSignal,
    reporter: Arc<dyn ErrorReporter>,
    poll_interval: Duration,
    idle: bool,
}

impl VisionPath {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: FrameSource,
        preprocessor: FramePreprocessor,
        extractor: TextExtractor,
        assembler: TextAssembler,
        chunk_tx: Sender<AssembledChunk>,
        settings: SharedSettings,
        progress: Arc<RunProgress>,
        stop: StopSignal,
        reporter: Arc<dyn ErrorReporter>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            preprocessor,
            extractor,
            assembler,
            chunk_tx,
            settings,
            progress,
            stop,
            reporter,
            poll_interval,
            idle: false,
        }
    }

    /// Handles at most one frame.
    ///
    /// Only device failures are returned as errors; everything else is
    /// reported and absorbed.
    pub fn step(&mut self) -> Result<Step> {
        if self.stop.is_raised() {
            return Ok(Step::Stopped);
        }
        let frame = match self.source.next_frame()? {
            FrameResult::Frame(frame) => frame,
            FrameResult::Empty => {
                let settings = self.settings.snapshot();
                self.note_idle(&settings);
                return Ok(Step::Empty);
            }
            FrameResult::Exhausted => return Ok(Step::Exhausted),
        };
        // One snapshot per frame, taken after capture.
        let settings = self.settings.snapshot();
        let frame_id = frame.id;
        self.progress.frame_captured();

        let prepared = match self.preprocessor.prepare(&frame) {
            Prepared::Ready(prepared) => prepared,
            Prepared::Skip(reason) => {
                self.progress.frame_skipped();
                match reason {
                    SkipReason::Malformed(reason) => {
                        let error = ReaderError::MalformedFrame { frame_id, reason };
                        self.reporter
                            .report("preprocessor", &StationError::Recoverable(error.to_string()));
                    }
                    SkipReason::Blank => tracing::debug!(frame_id, "blank frame skipped"),
                }
                self.note_idle(&settings);
                return Ok(Step::Skipped { frame_id });
            }
        };
        drop(frame);

        let spans = self.extractor.extract(prepared, &settings);
        if spans.is_failure() {
            self.progress.extraction_failed();
        }
        let chunks = self.assembler.assemble(frame_id, spans, &settings);

        let mut emitted = 0;
        for chunk in chunks {
            self.progress.chunk_emitted(chunk.sequence_no);
            if self.push(chunk) {
                emitted += 1;
            } else {
                self.progress.chunk_dropped();
            }
        }
        self.note_idle(&settings);
        Ok(Step::Frame { frame_id, emitted })
    }

    /// Queues a chunk, waiting while the queue is full. Returns `false` if the
    /// chunk was dropped because of a stop or a closed audio side.
    fn push(&mut self, mut chunk: AssembledChunk) -> bool {
        loop {
            if self.stop.is_raised() {
                return false;
            }
            match self.chunk_tx.send_timeout(chunk, self.poll_interval) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(returned)) => chunk = returned,
                Err(SendTimeoutError::Disconnected(_)) => {
                    tracing::error!("speech side is gone, stopping");
                    self.stop.raise();
                    return false;
                }
            }
        }
    }

    fn note_idle(&mut self, settings: &RunSettings) {
        let idle = self.assembler.is_idle(settings.idle_silence);
        if idle == self.idle {
            return;
        }
        self.idle = idle;
        self.progress.set_idle(idle);
        if idle {
            tracing::info!(
                "no new text for {}, waiting",
                humantime::format_duration(settings.idle_silence)
            );
        } else {
            tracing::info!("new text, reading again");
        }
    }

    /// Runs until stopped, exhausted or failed, then releases the camera and
    /// helper threads.
    pub fn run(mut self, shutdown_wait: Duration) -> VisionExit {
        let end = loop {
            match self.step() {
                Ok(Step::Stopped) => break VisionEnd::Stopped,
                Ok(Step::Exhausted) => break VisionEnd::Exhausted,
                Ok(_) => {}
                Err(error) => {
                    self.reporter
                        .report("vision", &StationError::Fatal(error.to_string()));
                    self.stop.raise();
                    break VisionEnd::Failed(error);
                }
            }
        };
        let detached_workers = self.shutdown(shutdown_wait);
        VisionExit {
            end,
            detached_workers,
        }
    }

    /// Closes the camera and stops the capture and OCR threads.
    ///
    /// Returns the number of threads that had to be detached.
    pub fn shutdown(self, wait: Duration) -> usize {
        let Self {
            mut source,
            extractor,
            chunk_tx,
            ..
        } = self;
        // Closing the queue lets the audio side finish.
        drop(chunk_tx);
        source.close();
        let mut detached = 0;
        if !source.shutdown(wait) {
            detached += 1;
        }
        if !extractor.shutdown(wait) {
            detached += 1;
        }
        detached
    }
}
