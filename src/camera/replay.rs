//! Capture device that replays a directory of stored frames.
//!
//! Every file whose extension names an image format `image` can read (PNG,
//! JPEG, PGM/PPM, BMP, TIFF, ...) is played in file-name order.
//! A file that fails to decode is delivered as an empty frame, which the
//! preprocessor skips as malformed; the run carries on with the next file.

use crate::camera::device::CaptureDevice;
use crate::error::{ReaderError, Result};
use crate::pipeline::types::RawImage;
use image::ImageFormat;
use std::fs;
use std::path::{Path, PathBuf};

pub struct ReplayCamera {
    dir: PathBuf,
    name: String,
    looping: bool,
    files: Vec<PathBuf>,
    next: usize,
}

impl ReplayCamera {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            name: format!("replay:{}", dir.display()),
            dir,
            looping: false,
            files: Vec::new(),
            next: 0,
        }
    }

    /// Start over from the first file after the last one.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Lists replayable files in `dir`, sorted by name.
    pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(dir).map_err(|e| {
            ReaderError::device(format!("cannot read frame directory {}: {e}", dir.display()))
        })?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| ReaderError::device(format!("cannot list {}: {e}", dir.display())))?
                .path();
            let replayable = path
                .extension()
                .and_then(ImageFormat::from_extension)
                .is_some_and(|format| format.reading_enabled());
            if replayable && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl CaptureDevice for ReplayCamera {
    fn open(&mut self) -> Result<()> {
        self.files = Self::list_frames(&self.dir)?;
        if self.files.is_empty() {
            return Err(ReaderError::device(format!(
                "no image files in {}",
                self.dir.display()
            )));
        }
        self.next = 0;
        tracing::info!(device = %self.name, frames = self.files.len(), "replay camera opened");
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<Option<RawImage>> {
        if self.next >= self.files.len() {
            if !self.looping || self.files.is_empty() {
                return Ok(None);
            }
            self.next = 0;
        }
        let path = &self.files[self.next];
        self.next += 1;

        let bytes = fs::read(path)
            .map_err(|e| ReaderError::device(format!("cannot read {}: {e}", path.display())))?;
        match image::load_from_memory(&bytes) {
            Ok(image) => Ok(Some(RawImage::from_dynamic(image))),
            Err(e) => {
                tracing::warn!(file = %path.display(), "{e}");
                Ok(Some(RawImage::gray(0, 0, Vec::new())))
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.files.clear();
        self.next = 0;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::PixelFormat;
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_frame(dir: &Path, name: &str, value: u8) {
        GrayImage::from_pixel(2, 2, Luma([value]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_replays_in_name_order_then_exhausts() {
        let dir = TempDir::new().unwrap();
        write_frame(dir.path(), "b.png", 20);
        write_frame(dir.path(), "a.png", 10);
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut camera = ReplayCamera::new(dir.path());
        camera.open().unwrap();
        assert_eq!(camera.capture_frame().unwrap().unwrap().pixels, vec![10; 4]);
        assert_eq!(camera.capture_frame().unwrap().unwrap().pixels, vec![20; 4]);
        assert!(camera.capture_frame().unwrap().is_none());
    }

    #[test]
    fn test_png_and_jpeg_captures_are_replayed() {
        let dir = TempDir::new().unwrap();
        write_frame(dir.path(), "01.png", 40);
        RgbImage::from_pixel(4, 4, Rgb([200, 10, 10]))
            .save(dir.path().join("02.jpg"))
            .unwrap();

        let mut camera = ReplayCamera::new(dir.path());
        camera.open().unwrap();
        let gray = camera.capture_frame().unwrap().unwrap();
        assert_eq!(gray.format, PixelFormat::Gray8);
        assert_eq!(gray.pixels, vec![40; 4]);
        let color = camera.capture_frame().unwrap().unwrap();
        assert_eq!(color.format, PixelFormat::Rgb8);
        assert_eq!(color.pixels.len(), 4 * 4 * 3);
        assert!(camera.capture_frame().unwrap().is_none());
    }

    #[test]
    fn test_looping_restarts() {
        let dir = TempDir::new().unwrap();
        write_frame(dir.path(), "only.png", 5);

        let mut camera = ReplayCamera::new(dir.path()).looping(true);
        camera.open().unwrap();
        for _ in 0..3 {
            assert!(camera.capture_frame().unwrap().is_some());
        }
    }

    #[test]
    fn test_undecodable_file_yields_empty_frame() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.png"), b"\x89PNG\r\n\x1a\ntruncated").unwrap();

        let mut camera = ReplayCamera::new(dir.path());
        camera.open().unwrap();
        let image = camera.capture_frame().unwrap().unwrap();
        assert!(image.pixels.is_empty());
    }

    #[test]
    fn test_open_fails_without_frames() {
        let dir = TempDir::new().unwrap();
        let mut camera = ReplayCamera::new(dir.path());
        assert!(matches!(camera.open(), Err(ReaderError::Device { .. })));

        let mut missing = ReplayCamera::new(dir.path().join("missing"));
        assert!(matches!(missing.open(), Err(ReaderError::Device { .. })));
    }
}
