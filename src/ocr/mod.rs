//! Text extraction: OCR engines and the extractor that bounds and filters them.

pub mod engine;
pub mod extractor;
pub mod tesseract;

pub use engine::{MockOcrEngine, OcrEngine, RecognizedText};
pub use extractor::{ExtractedSpans, TextExtractor};
pub use tesseract::TesseractEngine;
