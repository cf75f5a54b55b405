//! Frame normalisation ahead of OCR.
//!
//! `prepare` never fails: frames that cannot be used come back as
//! [`Prepared::Skip`] so one bad frame never stops the stream.

use crate::defaults;
use crate::pipeline::types::{Frame, FrameTransform, PixelFormat, PreparedFrame};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use std::fmt;

const INK: u8 = 0;
const PAPER: u8 = 255;

/// Preprocessing options.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessConfig {
    /// Frames wider than this are scaled down to it. 0 disables scaling.
    pub target_width: u32,
    pub deskew: bool,
    pub max_skew_degrees: f32,
    pub skew_step_degrees: f32,
    pub crop_margin: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            target_width: defaults::TARGET_WIDTH,
            deskew: true,
            max_skew_degrees: defaults::MAX_SKEW_DEGREES,
            skew_step_degrees: defaults::SKEW_STEP_DEGREES,
            crop_margin: defaults::CROP_MARGIN,
        }
    }
}

/// Why a frame was not handed to OCR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Buffer and declared geometry disagree, or the frame is empty.
    Malformed(String),
    /// Nothing that could be text.
    Blank,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Malformed(reason) => write!(f, "malformed frame: {reason}"),
            SkipReason::Blank => write!(f, "no text-like content"),
        }
    }
}

/// Result of preparing one frame.
#[derive(Debug, Clone)]
pub enum Prepared {
    Ready(PreparedFrame),
    Skip(SkipReason),
}

/// Deterministic frame normaliser.
#[derive(Debug, Clone, Default)]
pub struct FramePreprocessor {
    config: PreprocessConfig,
}

impl FramePreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Grayscale, scale, binarize, deskew and crop one frame.
    pub fn prepare(&self, frame: &Frame) -> Prepared {
        let gray = match to_gray(frame) {
            Ok(gray) => gray,
            Err(reason) => return Prepared::Skip(SkipReason::Malformed(reason)),
        };

        let (scaled, scale) = downscale(gray, self.config.target_width);

        let Some(mut binary) = binarize(scaled) else {
            return Prepared::Skip(SkipReason::Blank);
        };

        let mut transform = FrameTransform {
            scale,
            ..Default::default()
        };

        if self.config.deskew {
            let angle = estimate_skew(
                &binary,
                self.config.max_skew_degrees,
                self.config.skew_step_degrees,
            );
            if angle != 0.0 {
                let center = (
                    binary.width() as f32 / 2.0,
                    binary.height() as f32 / 2.0,
                );
                binary = rotate(&binary, angle, center);
                transform.rotation_degrees = angle;
                transform.rotation_center = center;
            }
        }

        let Some((x0, y0, x1, y1)) = ink_bounds(&binary) else {
            return Prepared::Skip(SkipReason::Blank);
        };
        let margin = self.config.crop_margin;
        let left = x0.saturating_sub(margin);
        let top = y0.saturating_sub(margin);
        let right = (x1 + 1 + margin).min(binary.width());
        let bottom = (y1 + 1 + margin).min(binary.height());
        let cropped = imageops::crop_imm(&binary, left, top, right - left, bottom - top).to_image();
        transform.crop_offset = (left as f32, top as f32);

        Prepared::Ready(PreparedFrame {
            source_frame_id: frame.id,
            image: cropped,
            transform,
        })
    }
}

/// Grayscale conversion with geometry validation.
fn to_gray(frame: &Frame) -> Result<GrayImage, String> {
    let Some(pixel_count) = frame.resolution.pixel_count() else {
        return Err("resolution overflows".to_string());
    };
    if pixel_count == 0 {
        return Err(format!(
            "empty resolution {}x{}",
            frame.resolution.width, frame.resolution.height
        ));
    }
    let expected = pixel_count
        .checked_mul(frame.format.channels())
        .ok_or_else(|| "resolution overflows".to_string())?;
    if frame.pixels.len() != expected {
        return Err(format!(
            "buffer holds {} bytes, {}x{} {:?} needs {}",
            frame.pixels.len(),
            frame.resolution.width,
            frame.resolution.height,
            frame.format,
            expected
        ));
    }

    let (width, height) = (frame.resolution.width, frame.resolution.height);
    let rgb = match frame.format {
        PixelFormat::Gray8 => {
            return GrayImage::from_raw(width, height, frame.pixels.clone())
                .ok_or_else(|| "buffer length mismatch".to_string());
        }
        PixelFormat::Rgb8 => frame.pixels.clone(),
        PixelFormat::Bgr8 => frame
            .pixels
            .chunks_exact(3)
            .flat_map(|p| [p[2], p[1], p[0]])
            .collect(),
    };
    RgbImage::from_raw(width, height, rgb)
        .map(|rgb| imageops::grayscale(&rgb))
        .ok_or_else(|| "buffer length mismatch".to_string())
}

/// Scales down to `target_width`. Returns the image and the factor from
/// scaled to original coordinates.
fn downscale(image: GrayImage, target_width: u32) -> (GrayImage, f32) {
    if target_width == 0 || image.width() <= target_width {
        return (image, 1.0);
    }
    let scale = image.width() as f32 / target_width as f32;
    let height = ((image.height() as f32 / scale).round() as u32).max(1);
    let scaled = imageops::resize(&image, target_width, height, FilterType::Triangle);
    (scaled, scale)
}

fn histogram(image: &GrayImage) -> [u64; 256] {
    let mut histogram = [0u64; 256];
    for &value in image.as_raw() {
        histogram[value as usize] += 1;
    }
    histogram
}

/// Otsu threshold over a 256-bin histogram.
///
/// Returns `None` when the image has a single intensity class.
pub fn otsu_threshold(histogram: &[u64; 256]) -> Option<u8> {
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return None;
    }
    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(value, &count)| value as f64 * count as f64)
        .sum();

    let mut background_weight = 0u64;
    let mut background_sum = 0f64;
    let mut best: Option<(u8, f64)> = None;

    for (value, &count) in histogram.iter().enumerate() {
        background_weight += count;
        if background_weight == 0 {
            continue;
        }
        let foreground_weight = total - background_weight;
        if foreground_weight == 0 {
            break;
        }
        background_sum += value as f64 * count as f64;
        let mean_background = background_sum / background_weight as f64;
        let mean_foreground = (weighted_total - background_sum) / foreground_weight as f64;
        let diff = mean_background - mean_foreground;
        let variance = background_weight as f64 * foreground_weight as f64 * diff * diff;
        if best.is_none_or(|(_, v)| variance > v) {
            best = Some((value as u8, variance));
        }
    }

    best.filter(|(_, variance)| *variance > 0.0).map(|(t, _)| t)
}

/// Binarizes to dark ink on white paper, whatever the original polarity.
fn binarize(mut image: GrayImage) -> Option<GrayImage> {
    let threshold = otsu_threshold(&histogram(&image))?;
    let dark = image.as_raw().iter().filter(|&&v| v <= threshold).count();
    // Ink is the minority class; light text on a dark page is inverted.
    let dark_is_ink = dark * 2 <= image.as_raw().len();
    for pixel in image.pixels_mut() {
        let is_dark = pixel.0[0] <= threshold;
        pixel.0[0] = if is_dark == dark_is_ink { INK } else { PAPER };
    }
    Some(image)
}

/// Finds the rotation (in degrees) that best aligns ink into horizontal rows.
///
/// Scores each candidate angle by the sum of squared row counts of the rotated
/// ink pixels; the sharpest profile wins. Candidates are tried from 0 outwards
/// so ties keep the smaller correction.
pub fn estimate_skew(image: &GrayImage, max_degrees: f32, step_degrees: f32) -> f32 {
    if max_degrees <= 0.0 || step_degrees <= 0.0 {
        return 0.0;
    }
    let ink: Vec<(f32, f32)> = image
        .enumerate_pixels()
        .filter(|(_, _, pixel)| pixel.0[0] == INK)
        .map(|(x, y, _)| (x as f32, y as f32))
        .collect();
    if ink.is_empty() {
        return 0.0;
    }

    let cx = image.width() as f32 / 2.0;
    let cy = image.height() as f32 / 2.0;
    let steps = (max_degrees / step_degrees).floor() as i32;
    let mut candidates = vec![0.0f32];
    for i in 1..=steps {
        let angle = i as f32 * step_degrees;
        candidates.push(angle);
        candidates.push(-angle);
    }

    let mut best_angle = 0.0;
    let mut best_score = f64::MIN;
    let mut rows: Vec<u64> = Vec::new();
    for angle in candidates {
        let (sin, cos) = angle.to_radians().sin_cos();
        rows.clear();
        rows.resize(image.height() as usize * 2 + 1, 0);
        let offset = image.height() as f32 / 2.0;
        for &(x, y) in &ink {
            let rotated_y = (x - cx) * sin + (y - cy) * cos + cy;
            let row = (rotated_y + offset).round();
            if row >= 0.0 && (row as usize) < rows.len() {
                rows[row as usize] += 1;
            }
        }
        let score: f64 = rows.iter().map(|&c| (c * c) as f64).sum();
        if score > best_score {
            best_score = score;
            best_angle = angle;
        }
    }
    best_angle
}

/// Rotates by `degrees` about `center`, nearest neighbour, paper fill.
fn rotate(image: &GrayImage, degrees: f32, center: (f32, f32)) -> GrayImage {
    let (sin, cos) = (-degrees.to_radians()).sin_cos();
    let (cx, cy) = center;
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let (dx, dy) = (x as f32 - cx, y as f32 - cy);
        let src_x = (cx + dx * cos - dy * sin).round();
        let src_y = (cy + dx * sin + dy * cos).round();
        if src_x < 0.0 || src_y < 0.0 {
            return Luma([PAPER]);
        }
        image
            .get_pixel_checked(src_x as u32, src_y as u32)
            .copied()
            .unwrap_or(Luma([PAPER]))
    })
}

/// Inclusive bounds of all ink pixels.
fn ink_bounds(image: &GrayImage) -> Option<(u32, u32, u32, u32)> {
    image
        .enumerate_pixels()
        .filter(|(_, _, pixel)| pixel.0[0] == INK)
        .fold(None, |bounds, (x, y, _)| {
            Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{RawImage, Resolution};
    use crate::vision::fill_rect;

    fn value_at(image: &GrayImage, x: u32, y: u32) -> u8 {
        image.get_pixel(x, y).0[0]
    }

    fn page_with_block(width: u32, height: u32) -> Frame {
        let mut image = GrayImage::from_pixel(width, height, Luma([240]));
        fill_rect(&mut image, 20, 30, 60, 10, 20);
        Frame::new(1, RawImage::gray(width, height, image.into_raw()))
    }

    fn no_deskew() -> FramePreprocessor {
        FramePreprocessor::new(PreprocessConfig {
            deskew: false,
            ..Default::default()
        })
    }

    #[test]
    fn test_malformed_buffer_is_skipped() {
        let frame = Frame::new(
            3,
            RawImage::new(vec![0; 10], Resolution::new(4, 4), PixelFormat::Gray8),
        );
        let prepared = FramePreprocessor::default().prepare(&frame);
        assert!(matches!(prepared, Prepared::Skip(SkipReason::Malformed(_))));
    }

    #[test]
    fn test_empty_frame_is_skipped() {
        let frame = Frame::new(3, RawImage::gray(0, 0, Vec::new()));
        let prepared = FramePreprocessor::default().prepare(&frame);
        assert!(matches!(prepared, Prepared::Skip(SkipReason::Malformed(_))));
    }

    #[test]
    fn test_uniform_frame_is_blank() {
        let frame = Frame::new(1, RawImage::gray(50, 50, vec![200; 2500]));
        let prepared = FramePreprocessor::default().prepare(&frame);
        assert!(matches!(prepared, Prepared::Skip(SkipReason::Blank)));
    }

    #[test]
    fn test_block_is_cropped_with_margin() {
        let prepared = no_deskew().prepare(&page_with_block(200, 100));
        let Prepared::Ready(prepared) = prepared else {
            panic!("expected a prepared frame");
        };
        assert_eq!(prepared.source_frame_id, 1);
        // 60x10 block plus 8px on each side
        assert_eq!(prepared.image.width(), 76);
        assert_eq!(prepared.image.height(), 26);
        assert_eq!(prepared.transform.crop_offset, (12.0, 22.0));
        assert_eq!(value_at(&prepared.image, 8, 8), INK);
        assert_eq!(value_at(&prepared.image, 0, 0), PAPER);
    }

    #[test]
    fn test_light_text_on_dark_page_is_inverted() {
        let mut image = GrayImage::from_pixel(100, 50, Luma([10]));
        fill_rect(&mut image, 10, 10, 30, 5, 250);
        let frame = Frame::new(2, RawImage::gray(100, 50, image.into_raw()));
        let Prepared::Ready(prepared) = no_deskew().prepare(&frame) else {
            panic!("expected a prepared frame");
        };
        assert_eq!(prepared.image.width(), 30 + 16);
        assert_eq!(value_at(&prepared.image, 8, 8), INK);
    }

    #[test]
    fn test_wide_frame_is_scaled_down() {
        let preprocessor = FramePreprocessor::new(PreprocessConfig {
            target_width: 100,
            deskew: false,
            crop_margin: 0,
            ..Default::default()
        });
        let Prepared::Ready(prepared) = preprocessor.prepare(&page_with_block(200, 100)) else {
            panic!("expected a prepared frame");
        };
        assert_eq!(prepared.transform.scale, 2.0);
        // The 60x10 block halves; filtering may blur one pixel at each edge.
        assert!((29..=32).contains(&prepared.image.width()));
        assert!((4..=7).contains(&prepared.image.height()));
    }

    #[test]
    fn test_rgb_and_bgr_frames_are_accepted() {
        for format in [PixelFormat::Rgb8, PixelFormat::Bgr8] {
            let mut pixels = vec![230u8; 40 * 20 * 3];
            for x in 5..25 {
                let i = (10 * 40 + x) * 3;
                pixels[i..i + 3].copy_from_slice(&[10, 10, 10]);
            }
            let frame = Frame::new(1, RawImage::new(pixels, Resolution::new(40, 20), format));
            assert!(matches!(no_deskew().prepare(&frame), Prepared::Ready(_)));
        }
    }

    #[test]
    fn test_prepare_is_deterministic() {
        let frame = page_with_block(120, 80);
        let preprocessor = FramePreprocessor::default();
        let (Prepared::Ready(a), Prepared::Ready(b)) =
            (preprocessor.prepare(&frame), preprocessor.prepare(&frame))
        else {
            panic!("expected prepared frames");
        };
        assert_eq!(a.image, b.image);
        assert_eq!(a.transform, b.transform);
    }

    #[test]
    fn test_otsu_separates_two_levels() {
        let mut histogram = [0u64; 256];
        histogram[20] = 100;
        histogram[220] = 300;
        let threshold = otsu_threshold(&histogram).unwrap();
        assert!((20..220).contains(&threshold));
    }

    #[test]
    fn test_otsu_single_level_has_no_threshold() {
        let mut histogram = [0u64; 256];
        histogram[128] = 50;
        assert_eq!(otsu_threshold(&histogram), None);
    }

    #[test]
    fn test_level_text_needs_no_deskew() {
        let mut image = GrayImage::from_pixel(200, 100, Luma([PAPER]));
        fill_rect(&mut image, 20, 20, 160, 4, INK);
        fill_rect(&mut image, 20, 50, 160, 4, INK);
        assert_eq!(estimate_skew(&image, 5.0, 1.0), 0.0);
    }

    #[test]
    fn test_skewed_line_is_detected() {
        // A line rising 3 degrees from left to right
        let mut image = GrayImage::from_pixel(300, 100, Luma([PAPER]));
        let slope = 3.0f32.to_radians().tan();
        for x in 20..280 {
            let y = 60.0 - (x as f32 - 20.0) * slope;
            fill_rect(&mut image, x, y.round() as u32, 1, 3, INK);
        }
        let angle = estimate_skew(&image, 5.0, 1.0);
        assert_eq!(angle.abs(), 3.0);
    }
}
