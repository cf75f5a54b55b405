//! Capture-to-speech pipeline.
//!
//! Two workers connected by one bounded crossbeam channel: the vision worker
//! (acquire, preprocess, extract, assemble) and the audio worker (the speech
//! synthesizer station). The controller starts, reconfigures and stops them.

pub mod controller;
pub mod error;
pub mod state;
pub mod station;
pub mod stop;
pub mod types;
pub mod vision;
pub mod worker;

pub use controller::{PipelineController, PollStatus};
pub use error::{CollectingReporter, ErrorReporter, LogReporter, StationError};
pub use state::{
    Lifecycle, PipelineState, PipelineStatus, RunEnd, RunProgress, RunSettings, RunStats,
    RunSummary, SharedSettings,
};
pub use station::{Station, StationRunner};
pub use stop::StopSignal;
pub use types::{
    AssembledChunk, BoundingBox, Frame, FrameTransform, LanguagePack, PixelFormat,
    PreparedFrame, RawImage, Resolution, TextSpan,
};
pub use vision::{Step, VisionEnd, VisionExit, VisionPath};
pub use worker::{BoundedWorker, CallError};
