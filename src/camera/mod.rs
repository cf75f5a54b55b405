//! Frame acquisition: capture devices and the paced frame source.

pub mod device;
#[cfg(feature = "live-camera")]
pub mod live;
pub mod replay;
pub mod source;

pub use device::{CaptureDevice, MockCamera, MockCameraCounters, SharedDevice, shared};
#[cfg(feature = "live-camera")]
pub use live::LiveCamera;
pub use replay::ReplayCamera;
pub use source::{FrameResult, FrameSource, FrameSourceConfig};
