//! Image handling ahead of OCR.
//!
//! Decoding, grayscale conversion and scaling go through the `image` crate;
//! this module adds the document-specific steps on top.

pub mod preprocess;

pub use image::GrayImage;
pub use preprocess::{FramePreprocessor, PreprocessConfig, Prepared, SkipReason};

use image::{Luma, imageops};

/// Paints a solid rectangle, clipped to the image.
pub fn fill_rect(image: &mut GrayImage, x: u32, y: u32, width: u32, height: u32, value: u8) {
    let patch = GrayImage::from_pixel(width, height, Luma([value]));
    imageops::replace(image, &patch, i64::from(x), i64::from(y));
}
