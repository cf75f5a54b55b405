use crate::error::{ReaderError, Result};
use crate::pipeline::types::RawImage;
use crate::vision::fill_rect;
use image::{GrayImage, Luma};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Trait for camera-like frame producers.
///
/// This trait allows swapping implementations (live camera, replayed images, mock).
pub trait CaptureDevice: Send {
    /// Acquire the device for a run.
    fn open(&mut self) -> Result<()>;

    /// Capture one image.
    ///
    /// # Returns
    /// `Ok(Some(image))` for a frame, `Ok(None)` once a finite device has no
    /// more frames, or a device error
    fn capture_frame(&mut self) -> Result<Option<RawImage>>;

    /// Release the device.
    fn close(&mut self) -> Result<()>;

    /// Human-readable device name for logs.
    fn name(&self) -> &str;
}

/// Lets the binary pick a device at run time.
impl<T: CaptureDevice + ?Sized> CaptureDevice for Box<T> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn capture_frame(&mut self) -> Result<Option<RawImage>> {
        (**self).capture_frame()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Device shared between the controller, the frame source and its capture thread.
pub type SharedDevice = Arc<Mutex<Box<dyn CaptureDevice>>>;

pub fn shared(device: impl CaptureDevice + 'static) -> SharedDevice {
    Arc::new(Mutex::new(Box::new(device)))
}

/// Wraps any error from a device call as a device failure.
pub(crate) fn into_device_error(error: ReaderError) -> ReaderError {
    match error {
        ReaderError::Device { .. } => error,
        other => ReaderError::device(other.to_string()),
    }
}

#[derive(Debug, Clone)]
enum Shot {
    Image(RawImage),
    Failure(String),
}

/// Counters shared between a [`MockCamera`] and the test that built it.
#[derive(Debug, Clone, Default)]
pub struct MockCameraCounters {
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    captures: Arc<AtomicUsize>,
}

impl MockCameraCounters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

/// Mock camera for testing
///
/// Plays a script of images and failures, then reports exhaustion.
#[derive(Debug, Clone)]
pub struct MockCamera {
    name: String,
    script: VecDeque<Shot>,
    delay: Option<Duration>,
    fail_open: bool,
    counters: MockCameraCounters,
}

impl MockCamera {
    /// Create a mock camera with an empty script
    pub fn new() -> Self {
        Self {
            name: "mock-camera".to_string(),
            script: VecDeque::new(),
            delay: None,
            fail_open: false,
            counters: MockCameraCounters::default(),
        }
    }

    /// Append one image to the script
    pub fn with_frame(mut self, image: RawImage) -> Self {
        self.script.push_back(Shot::Image(image));
        self
    }

    /// Append `count` copies of [`MockCamera::printed_page`]
    pub fn with_pages(mut self, count: usize) -> Self {
        for _ in 0..count {
            self.script.push_back(Shot::Image(Self::printed_page()));
        }
        self
    }

    /// Append a capture failure to the script
    pub fn with_failure(mut self, message: &str) -> Self {
        self.script.push_back(Shot::Failure(message.to_string()));
        self
    }

    /// Sleep before every capture
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail when opened
    pub fn with_open_failure(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Handle for observing the camera after it was moved into a pipeline
    pub fn counters(&self) -> MockCameraCounters {
        self.counters.clone()
    }

    /// A white 320x120 page with two dark blocks standing in for text lines.
    pub fn printed_page() -> RawImage {
        let mut page = GrayImage::from_pixel(320, 120, Luma([235]));
        fill_rect(&mut page, 30, 30, 240, 14, 25);
        fill_rect(&mut page, 30, 70, 180, 14, 25);
        RawImage::gray(320, 120, page.into_raw())
    }
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDevice for MockCamera {
    fn open(&mut self) -> Result<()> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(ReaderError::device("mock camera failed to open"));
        }
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<Option<RawImage>> {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.counters.captures.fetch_add(1, Ordering::SeqCst);
        match self.script.pop_front() {
            Some(Shot::Image(image)) => Ok(Some(image)),
            Some(Shot::Failure(message)) => Err(ReaderError::Device { message }),
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
