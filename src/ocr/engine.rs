use crate::error::{ReaderError, Result};
use crate::pipeline::types::{BoundingBox, LanguagePack};
use image::GrayImage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// One fragment as reported by an OCR engine, in prepared-image coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedText {
    pub text: String,
    /// Engine confidence mapped to `[0, 1]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl RecognizedText {
    pub fn new(text: &str, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            text: text.to_string(),
            confidence,
            bbox,
        }
    }
}

/// Trait for optical character recognition.
///
/// This trait allows swapping implementations (Tesseract vs mock).
pub trait OcrEngine: Send + Sync {
    /// Recognize text in a prepared (binarized, deskewed, cropped) image.
    fn recognize(&self, image: &GrayImage, language: &LanguagePack)
    -> Result<Vec<RecognizedText>>;

    /// Whether the engine has data for `language`.
    fn supports_language(&self, language: &LanguagePack) -> bool;

    /// Engine name for logs
    fn name(&self) -> &str;
}

/// Implement OcrEngine for Arc<T> to allow sharing across runs.
impl<T: OcrEngine + ?Sized> OcrEngine for Arc<T> {
    fn recognize(
        &self,
        image: &GrayImage,
        language: &LanguagePack,
    ) -> Result<Vec<RecognizedText>> {
        (**self).recognize(image, language)
    }

    fn supports_language(&self, language: &LanguagePack) -> bool {
        (**self).supports_language(language)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Mock OCR engine for testing
///
/// Answers calls from a script, one entry per call, then returns nothing.
#[derive(Debug, Clone)]
pub struct MockOcrEngine {
    script: Arc<Mutex<VecDeque<Result<Vec<RecognizedText>>>>>,
    languages: Vec<LanguagePack>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl MockOcrEngine {
    /// Create a mock engine that supports "eng"
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            languages: vec![LanguagePack::new("eng")],
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue the answer for the next call
    pub fn with_response(self, spans: Vec<RecognizedText>) -> Self {
        self.push(Ok(spans));
        self
    }

    /// Queue the same answer for the next `count` calls
    pub fn with_repeated_response(self, spans: Vec<RecognizedText>, count: usize) -> Self {
        for _ in 0..count {
            self.push(Ok(spans.clone()));
        }
        self
    }

    /// Queue a failure for the next call
    pub fn with_failure(self, message: &str) -> Self {
        self.push(Err(ReaderError::ToolFailed {
            message: message.to_string(),
        }));
        self
    }

    /// Replace the supported language list
    pub fn with_languages(mut self, languages: &[&str]) -> Self {
        self.languages = languages.iter().map(|l| LanguagePack::new(*l)).collect();
        self
    }

    /// Sleep inside every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `recognize` calls so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn push(&self, answer: Result<Vec<RecognizedText>>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(answer);
        }
    }
}

impl Default for MockOcrEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrEngine for MockOcrEngine {
    fn recognize(
        &self,
        _image: &GrayImage,
        _language: &LanguagePack,
    ) -> Result<Vec<RecognizedText>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        let next = self
            .script
            .lock()
            .map_err(|_| ReaderError::Other("mock OCR script poisoned".to_string()))?
            .pop_front();
        next.unwrap_or_else(|| Ok(Vec::new()))
    }

    fn supports_language(&self, language: &LanguagePack) -> bool {
        self.languages.contains(language)
    }

    fn name(&self) -> &str {
        "mock-ocr"
    }
}
