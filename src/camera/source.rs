//! Paced, stop-aware frame acquisition.

use crate::camera::device::{SharedDevice, into_device_error};
use crate::defaults;
use crate::error::{ReaderError, Result};
use crate::pipeline::stop::StopSignal;
use crate::pipeline::types::{Frame, RawImage};
use crate::pipeline::worker::{BoundedWorker, CallError};
use std::sync::{Arc, TryLockError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSourceConfig {
    /// Longest a single `next_frame` call blocks.
    pub frame_timeout: Duration,
    /// Minimum spacing between delivered frames.
    pub min_frame_interval: Duration,
}

impl Default for FrameSourceConfig {
    fn default() -> Self {
        Self {
            frame_timeout: Duration::from_millis(defaults::FRAME_TIMEOUT_MS),
            min_frame_interval: Duration::from_millis(defaults::MIN_FRAME_INTERVAL_MS),
        }
    }
}

/// Outcome of one `next_frame` call.
#[derive(Debug)]
pub enum FrameResult {
    Frame(Frame),
    /// Nothing arrived within the timeout, or stop was raised.
    Empty,
    /// A finite device has no more frames.
    Exhausted,
}

/// A capture result and the instant the device returned it.
type Capture = (Instant, Result<Option<RawImage>>);

pub struct FrameSource {
    device: SharedDevice,
    device_name: String,
    worker: BoundedWorker<(), Capture>,
    config: FrameSourceConfig,
    stop: StopSignal,
    next_id: u64,
    last_frame_at: Option<Instant>,
}

impl FrameSource {
    /// Spawns a capture thread for `device`.
    ///
    /// Fails if a capture from an earlier source is still stuck in the device.
    pub fn new(
        device: SharedDevice,
        config: FrameSourceConfig,
        stop: StopSignal,
        first_id: u64,
    ) -> Result<Self> {
        let device_name = match device.try_lock() {
            Ok(device) => device.name().to_string(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().name().to_string(),
            Err(TryLockError::WouldBlock) => {
                return Err(ReaderError::device("camera still busy with an earlier capture"));
            }
        };

        let capture_device = Arc::clone(&device);
        let worker = BoundedWorker::spawn("capture", move |()| -> Capture {
            let captured = capture_device
                .lock()
                .map_err(|_| ReaderError::device("capture device lock poisoned"))
                .and_then(|mut device| device.capture_frame());
            (Instant::now(), captured)
        })?;

        Ok(Self {
            device,
            device_name,
            worker,
            config,
            stop,
            next_id: first_id,
            last_frame_at: None,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn open(&mut self) -> Result<()> {
        let mut device = self
            .device
            .lock()
            .map_err(|_| ReaderError::device("capture device lock poisoned"))?;
        device.open().map_err(into_device_error)?;
        tracing::info!(device = %self.device_name, "camera opened");
        Ok(())
    }

    /// Waits for the next frame, at most `frame_timeout`.
    pub fn next_frame(&mut self) -> Result<FrameResult> {
        if self.stop.is_raised() {
            return Ok(FrameResult::Empty);
        }

        if let Some(last) = self.last_frame_at {
            let due = last + self.config.min_frame_interval;
            let now = Instant::now();
            if due > now {
                let wait = (due - now).min(self.config.frame_timeout);
                if self.stop.wait_timeout(wait) || Instant::now() < due {
                    return Ok(FrameResult::Empty);
                }
            }
        }

        let timeout = self.config.frame_timeout;
        let late = self.worker.has_pending();
        let outcome = if late {
            self.worker.resume(timeout, Some(&self.stop))
        } else {
            self.worker.call((), timeout, Some(&self.stop))
        };

        match outcome {
            Ok((captured_at, Ok(Some(image)))) => {
                let waited = captured_at.elapsed();
                if late && waited > timeout {
                    // The scene may have changed since; capture afresh.
                    tracing::debug!(
                        device = %self.device_name,
                        waited_ms = waited.as_millis() as u64,
                        "discarding stale frame from a timed-out capture"
                    );
                    return Ok(FrameResult::Empty);
                }
                let id = self.next_id;
                self.next_id += 1;
                self.last_frame_at = Some(Instant::now());
                tracing::debug!(frame_id = id, late, "frame captured");
                Ok(FrameResult::Frame(Frame::new(id, image).captured_at(captured_at)))
            }
            Ok((_, Ok(None))) => {
                tracing::info!(device = %self.device_name, "camera exhausted");
                Ok(FrameResult::Exhausted)
            }
            Ok((_, Err(error))) => Err(into_device_error(error)),
            Err(CallError::TimedOut) => {
                tracing::debug!(device = %self.device_name, "no frame within timeout");
                Ok(FrameResult::Empty)
            }
            Err(CallError::Interrupted | CallError::Busy | CallError::NothingPending) => {
                Ok(FrameResult::Empty)
            }
            Err(CallError::Disconnected) => {
                Err(ReaderError::device("capture thread exited unexpectedly"))
            }
        }
    }

    /// Id the next captured frame will get.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Closes the device unless a capture is still stuck inside it.
    pub fn close(&mut self) {
        let mut device = match self.device.try_lock() {
            Ok(device) => device,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                tracing::warn!(device = %self.device_name, "capture still running, device left open");
                return;
            }
        };
        match device.close() {
            Ok(()) => tracing::info!(device = %self.device_name, "camera closed"),
            Err(e) => tracing::warn!(device = %self.device_name, "failed to close camera: {e}"),
        }
    }

    /// Stops the capture thread. Returns `false` if it had to be detached.
    pub fn shutdown(self, wait: Duration) -> bool {
        self.worker.shutdown(wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::device::{MockCamera, shared};

    fn fast_config() -> FrameSourceConfig {
        FrameSourceConfig {
            frame_timeout: Duration::from_millis(200),
            min_frame_interval: Duration::ZERO,
        }
    }

    fn source(camera: MockCamera, config: FrameSourceConfig) -> FrameSource {
        let mut source = FrameSource::new(shared(camera), config, StopSignal::new(), 1).unwrap();
        source.open().unwrap();
        source
    }

    #[test]
    fn test_frames_get_increasing_ids_then_exhaust() {
        let mut source = source(MockCamera::new().with_pages(3), fast_config());
        let mut ids = Vec::new();
        loop {
            match source.next_frame().unwrap() {
                FrameResult::Frame(frame) => ids.push(frame.id),
                FrameResult::Empty => continue,
                FrameResult::Exhausted => break,
            }
        }
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_device_failure_is_fatal_error() {
        let mut source = source(MockCamera::new().with_failure("unplugged"), fast_config());
        let error = source.next_frame().unwrap_err();
        assert!(matches!(error, ReaderError::Device { .. }));
    }

    #[test]
    fn test_slow_device_returns_empty_then_delivers() {
        let camera = MockCamera::new()
            .with_pages(1)
            .with_delay(Duration::from_millis(150));
        let config = FrameSourceConfig {
            frame_timeout: Duration::from_millis(30),
            min_frame_interval: Duration::ZERO,
        };
        let mut source = source(camera, config);

        assert!(matches!(source.next_frame().unwrap(), FrameResult::Empty));
        let mut delivered = None;
        for _ in 0..50 {
            if let FrameResult::Frame(frame) = source.next_frame().unwrap() {
                delivered = Some(frame.id);
                break;
            }
        }
        assert_eq!(delivered, Some(1));
    }

    #[test]
    fn test_stale_frame_from_timed_out_capture_is_discarded() {
        let camera = MockCamera::new()
            .with_pages(2)
            .with_delay(Duration::from_millis(60));
        let counters = camera.counters();
        let config = FrameSourceConfig {
            frame_timeout: Duration::from_millis(20),
            min_frame_interval: Duration::ZERO,
        };
        let mut source = source(camera, config);

        assert!(matches!(source.next_frame().unwrap(), FrameResult::Empty));
        // The first capture completes and then sits unclaimed past the timeout.
        std::thread::sleep(Duration::from_millis(200));
        assert!(matches!(source.next_frame().unwrap(), FrameResult::Empty));
        assert_eq!(counters.captures(), 1);

        let mut delivered = None;
        for _ in 0..50 {
            if let FrameResult::Frame(frame) = source.next_frame().unwrap() {
                delivered = Some(frame);
                break;
            }
        }
        let frame = delivered.unwrap();
        assert_eq!(frame.id, 1);
        assert_eq!(counters.captures(), 2);
        assert!(frame.timestamp.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn test_pacing_holds_back_next_frame() {
        let config = FrameSourceConfig {
            frame_timeout: Duration::from_millis(20),
            min_frame_interval: Duration::from_secs(5),
        };
        let mut source = source(MockCamera::new().with_pages(2), config);
        assert!(matches!(source.next_frame().unwrap(), FrameResult::Frame(_)));
        assert!(matches!(source.next_frame().unwrap(), FrameResult::Empty));
    }

    #[test]
    fn test_raised_stop_returns_empty_immediately() {
        let stop = StopSignal::new();
        let camera = shared(MockCamera::new().with_pages(1));
        let mut source = FrameSource::new(camera, fast_config(), stop.clone(), 1).unwrap();
        stop.raise();
        assert!(matches!(source.next_frame().unwrap(), FrameResult::Empty));
    }

    #[test]
    fn test_busy_device_cannot_back_a_new_source() {
        let camera = shared(MockCamera::new().with_pages(1).with_delay(Duration::from_millis(300)));
        let config = FrameSourceConfig {
            frame_timeout: Duration::from_millis(10),
            min_frame_interval: Duration::ZERO,
        };
        let mut first = FrameSource::new(Arc::clone(&camera), config.clone(), StopSignal::new(), 1).unwrap();
        assert!(matches!(first.next_frame().unwrap(), FrameResult::Empty));

        // The abandoned capture still holds the device
        std::thread::sleep(Duration::from_millis(20));
        let second = FrameSource::new(camera, config, StopSignal::new(), 1);
        assert!(matches!(second, Err(ReaderError::Device { .. })));
    }

    #[test]
    fn test_close_reaches_device() {
        let camera = MockCamera::new();
        let counters = camera.counters();
        let mut source = source(camera, fast_config());
        source.close();
        assert_eq!(counters.opens(), 1);
        assert_eq!(counters.closes(), 1);
        assert!(source.shutdown(Duration::from_secs(1)));
    }
}
