//! A physical camera, read through `nokhwa`.
//!
//! Camera handles are not always `Send`, so the handle lives on a grabber
//! thread for the whole run and frames are requested over channels.

use crate::camera::device::CaptureDevice;
use crate::error::{ReaderError, Result};
use crate::pipeline::types::{PixelFormat, RawImage, Resolution};
use crossbeam_channel::{Receiver, Sender, bounded};
use nokhwa::Camera;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use std::thread::{self, JoinHandle};

/// Grabber thread owning the open camera.
struct Grabber {
    request_tx: Sender<()>,
    frame_rx: Receiver<Result<RawImage>>,
    handle: JoinHandle<()>,
}

/// Camera selected by index, e.g. `0` for the first webcam.
pub struct LiveCamera {
    index: u32,
    name: String,
    grabber: Option<Grabber>,
}

impl LiveCamera {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            name: format!("camera {index}"),
            grabber: None,
        }
    }

    fn error(&self, message: impl std::fmt::Display) -> ReaderError {
        ReaderError::device(format!("{}: {message}", self.name))
    }
}

impl CaptureDevice for LiveCamera {
    fn open(&mut self) -> Result<()> {
        if self.grabber.is_some() {
            return Ok(());
        }
        let index = self.index;
        let (ready_tx, ready_rx) = bounded::<Result<String>>(1);
        let (request_tx, request_rx) = bounded::<()>(1);
        let (frame_tx, frame_rx) = bounded::<Result<RawImage>>(1);

        let handle = thread::Builder::new()
            .name("readaloud-camera".to_string())
            .spawn(move || {
                let mut camera = match open_stream(index) {
                    Ok(camera) => camera,
                    Err(error) => {
                        let _sent = ready_tx.send(Err(error));
                        return;
                    }
                };
                if ready_tx.send(Ok(camera.info().human_name())).is_err() {
                    return;
                }
                while request_rx.recv().is_ok() {
                    if frame_tx.send(grab(&mut camera)).is_err() {
                        break;
                    }
                }
                if let Err(e) = camera.stop_stream() {
                    tracing::warn!(index, "failed to stop camera stream: {e}");
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(human_name)) => {
                tracing::info!(index, camera = %human_name, "live camera streaming");
                self.grabber = Some(Grabber {
                    request_tx,
                    frame_rx,
                    handle,
                });
                Ok(())
            }
            Ok(Err(error)) => {
                let _joined = handle.join();
                Err(error)
            }
            Err(_) => Err(self.error("camera thread exited while opening")),
        }
    }

    fn capture_frame(&mut self) -> Result<Option<RawImage>> {
        let Some(grabber) = self.grabber.as_ref() else {
            return Err(self.error("not open"));
        };
        grabber
            .request_tx
            .send(())
            .map_err(|_| self.error("camera thread exited"))?;
        match grabber.frame_rx.recv() {
            Ok(frame) => frame.map(Some),
            Err(_) => Err(self.error("camera thread exited")),
        }
    }

    fn close(&mut self) -> Result<()> {
        let Some(grabber) = self.grabber.take() else {
            return Ok(());
        };
        drop(grabber.request_tx);
        grabber
            .handle
            .join()
            .map_err(|_| self.error("camera thread panicked"))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn open_stream(index: u32) -> Result<Camera> {
    let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
    let mut camera = Camera::new(CameraIndex::Index(index), format)
        .map_err(|e| ReaderError::device(format!("camera {index}: {e}")))?;
    camera
        .open_stream()
        .map_err(|e| ReaderError::device(format!("camera {index}: {e}")))?;
    Ok(camera)
}

/// Grabs and decodes one frame to packed RGB.
fn grab(camera: &mut Camera) -> Result<RawImage> {
    let buffer = camera
        .frame()
        .map_err(|e| ReaderError::device(format!("frame capture failed: {e}")))?;
    let decoded = buffer
        .decode_image::<RgbFormat>()
        .map_err(|e| ReaderError::device(format!("frame decode failed: {e}")))?;
    let resolution = Resolution::new(decoded.width(), decoded.height());
    Ok(RawImage::new(decoded.into_raw(), resolution, PixelFormat::Rgb8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_before_open_is_device_error() {
        let mut camera = LiveCamera::new(0);
        assert_eq!(camera.name(), "camera 0");
        assert!(matches!(
            camera.capture_frame(),
            Err(ReaderError::Device { .. })
        ));
        assert!(camera.close().is_ok());
    }

    #[test]
    fn test_missing_camera_fails_to_open() {
        let mut camera = LiveCamera::new(250);
        let error = camera.open().unwrap_err();
        assert!(matches!(error, ReaderError::Device { .. }));
        assert!(camera.capture_frame().is_err());
    }
}
