//! Data types flowing through the capture-to-speech pipeline.

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Opaque language identifier handed to the OCR and speech engines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguagePack(String);

impl LanguagePack {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LanguagePack {
    fn default() -> Self {
        Self::new(crate::defaults::LANGUAGE_PACK)
    }
}

impl fmt::Display for LanguagePack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels, or `None` on overflow.
    pub fn pixel_count(&self) -> Option<usize> {
        (self.width as usize).checked_mul(self.height as usize)
    }
}

/// Memory layout of a camera pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    Bgr8,
}

impl PixelFormat {
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
        }
    }
}

/// Pixel buffer as delivered by a capture device.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub pixels: Vec<u8>,
    pub resolution: Resolution,
    pub format: PixelFormat,
}

impl RawImage {
    pub fn new(pixels: Vec<u8>, resolution: Resolution, format: PixelFormat) -> Self {
        Self {
            pixels,
            resolution,
            format,
        }
    }

    /// Builds an 8-bit grayscale image.
    pub fn gray(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self::new(pixels, Resolution::new(width, height), PixelFormat::Gray8)
    }

    /// Converts a decoded image, keeping grayscale images single-channel.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        let resolution = Resolution::new(image.width(), image.height());
        if image.color().has_color() {
            Self::new(image.into_rgb8().into_raw(), resolution, PixelFormat::Rgb8)
        } else {
            Self::new(image.into_luma8().into_raw(), resolution, PixelFormat::Gray8)
        }
    }
}

/// A captured camera frame. Immutable once created.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonically increasing within one run.
    pub id: u64,
    /// When the device returned the frame.
    pub timestamp: Instant,
    pub pixels: Vec<u8>,
    pub resolution: Resolution,
    pub format: PixelFormat,
}

impl Frame {
    pub fn new(id: u64, image: RawImage) -> Self {
        Self {
            id,
            timestamp: Instant::now(),
            pixels: image.pixels,
            resolution: image.resolution,
            format: image.format,
        }
    }

    /// Stamps the frame with the instant the device returned it.
    pub fn captured_at(mut self, at: Instant) -> Self {
        self.timestamp = at;
        self
    }
}

/// Maps prepared-image coordinates back to frame coordinates.
///
/// Applied in reverse order of preprocessing: undo the crop, undo the deskew
/// rotation (about the centre of the scaled image), then undo the scaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTransform {
    /// Frame pixels per prepared pixel.
    pub scale: f32,
    /// Rotation applied to the scaled image to straighten it, in degrees.
    pub rotation_degrees: f32,
    /// Centre of the rotation in scaled-image coordinates.
    pub rotation_center: (f32, f32),
    /// Top-left corner of the crop in rotated-image coordinates.
    pub crop_offset: (f32, f32),
}

impl Default for FrameTransform {
    fn default() -> Self {
        Self {
            scale: 1.0,
            rotation_degrees: 0.0,
            rotation_center: (0.0, 0.0),
            crop_offset: (0.0, 0.0),
        }
    }
}

impl FrameTransform {
    /// Maps a single point from prepared to frame coordinates.
    pub fn map_point(&self, x: f32, y: f32) -> (f32, f32) {
        let (x, y) = (x + self.crop_offset.0, y + self.crop_offset.1);
        let (x, y) = if self.rotation_degrees != 0.0 {
            let theta = -self.rotation_degrees.to_radians();
            let (sin, cos) = theta.sin_cos();
            let (cx, cy) = self.rotation_center;
            let (dx, dy) = (x - cx, y - cy);
            (cx + dx * cos - dy * sin, cy + dx * sin + dy * cos)
        } else {
            (x, y)
        };
        (x * self.scale, y * self.scale)
    }

    /// Maps a box to the axis-aligned box enclosing its mapped corners.
    pub fn map_box(&self, bbox: &BoundingBox) -> BoundingBox {
        let corners = [
            self.map_point(bbox.x, bbox.y),
            self.map_point(bbox.right(), bbox.y),
            self.map_point(bbox.x, bbox.bottom()),
            self.map_point(bbox.right(), bbox.bottom()),
        ];
        let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min);
        let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min);
        let max_x = corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max);
        let max_y = corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max);
        BoundingBox::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }
}

/// Frame normalised for OCR. Consumed by the extractor.
#[derive(Debug, Clone)]
pub struct PreparedFrame {
    pub source_frame_id: u64,
    pub image: GrayImage,
    pub transform: FrameTransform,
}

/// Axis-aligned rectangle; `x`/`y` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }

    /// Finite coordinates and a positive area.
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        BoundingBox::new(x, y, right - x, bottom - y)
    }

    /// Length of the vertical overlap with `other` (0 when disjoint).
    pub fn vertical_overlap(&self, other: &BoundingBox) -> f32 {
        (self.bottom().min(other.bottom()) - self.y.max(other.y)).max(0.0)
    }
}

/// One OCR-recognised fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub text: String,
    /// Calibrated probability in `[0, 1]`.
    pub confidence: f32,
    /// Position in frame coordinates.
    pub bbox: BoundingBox,
    pub source_frame_id: u64,
}

impl TextSpan {
    pub fn new(text: &str, confidence: f32, bbox: BoundingBox, source_frame_id: u64) -> Self {
        Self {
            text: text.to_string(),
            confidence,
            bbox,
            source_frame_id,
        }
    }
}

/// Deduplicated unit of text queued for speech.
///
/// Immutable once emitted; the synthesizer owns it afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledChunk {
    pub text: String,
    /// Member spans in reading order.
    pub spans: Vec<TextSpan>,
    /// Strictly increasing in emission order.
    pub sequence_no: u64,
    /// Language pack in effect when the chunk was assembled.
    pub language: LanguagePack,
    pub source_frame_id: u64,
}
