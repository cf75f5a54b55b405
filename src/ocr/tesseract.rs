//! OCR through the `tesseract` command-line program.
//!
//! The prepared image is piped in as PNG and results are read back in
//! Tesseract's TSV format, one row per recognised word.

use crate::command::{CommandRunner, SystemCommandRunner};
use crate::defaults;
use crate::error::{ReaderError, Result};
use crate::ocr::engine::{OcrEngine, RecognizedText};
use crate::pipeline::types::{BoundingBox, LanguagePack};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, GrayImage, ImageEncoder};
use std::sync::OnceLock;

/// TSV `level` of a word row.
const WORD_LEVEL: &str = "5";

pub struct TesseractEngine<R: CommandRunner> {
    runner: R,
    program: String,
    psm: u32,
    languages: OnceLock<Vec<String>>,
}

impl<R: CommandRunner> TesseractEngine<R> {
    pub fn new(runner: R, program: &str, psm: u32) -> Self {
        Self {
            runner,
            program: program.to_string(),
            psm,
            languages: OnceLock::new(),
        }
    }

    /// Installed language data, as reported by `--list-langs`.
    pub fn list_languages(&self) -> Result<Vec<String>> {
        let output = self
            .runner
            .run(&self.program, &["--list-langs".to_string()], None)?;
        Ok(parse_language_list(&output))
    }
}

impl TesseractEngine<SystemCommandRunner> {
    /// Engine using the system `tesseract` with default page segmentation.
    pub fn system() -> Self {
        Self::new(
            SystemCommandRunner::new(),
            defaults::OCR_PROGRAM,
            defaults::TESSERACT_PSM,
        )
    }
}

impl<R: CommandRunner> OcrEngine for TesseractEngine<R> {
    fn recognize(
        &self,
        image: &GrayImage,
        language: &LanguagePack,
    ) -> Result<Vec<RecognizedText>> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        let args = [
            "stdin".to_string(),
            "stdout".to_string(),
            "-l".to_string(),
            language.as_str().to_string(),
            "--psm".to_string(),
            self.psm.to_string(),
            "tsv".to_string(),
        ];
        let output = self
            .runner
            .run(&self.program, &args, Some(&encode_png(image)?))?;
        parse_tsv(&output)
    }

    fn supports_language(&self, language: &LanguagePack) -> bool {
        let languages = self.languages.get_or_init(|| {
            self.list_languages().unwrap_or_else(|e| {
                tracing::warn!("cannot list OCR languages: {e}");
                Vec::new()
            })
        });
        languages.iter().any(|l| l == language.as_str())
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Encodes an 8-bit grayscale image as PNG for Tesseract's stdin.
pub fn encode_png(image: &GrayImage) -> Result<Vec<u8>> {
    let mut encoded = Vec::new();
    PngEncoder::new(&mut encoded).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::L8,
    )?;
    Ok(encoded)
}

fn parse_language_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of"))
        .map(str::to_string)
        .collect()
}

/// Parses word rows of Tesseract TSV output.
///
/// Rows with confidence -1 (page, block and line rows) and rows without text
/// are dropped; confidence is mapped from 0-100 to 0-1.
pub fn parse_tsv(output: &str) -> Result<Vec<RecognizedText>> {
    let mut words = Vec::new();
    for (index, line) in output.lines().enumerate() {
        if index == 0 && line.starts_with("level") {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 11 {
            return Err(malformed(index, "too few columns"));
        }
        if fields[0] != WORD_LEVEL {
            continue;
        }
        let text = fields.get(11).map(|t| t.trim()).unwrap_or("");
        let confidence: f32 = fields[10]
            .trim()
            .parse()
            .map_err(|_| malformed(index, "bad confidence"))?;
        if confidence < 0.0 || text.is_empty() {
            continue;
        }
        let mut geometry = [0f32; 4];
        for (slot, field) in geometry.iter_mut().zip(&fields[6..10]) {
            *slot = field
                .trim()
                .parse()
                .map_err(|_| malformed(index, "bad geometry"))?;
        }
        let [left, top, width, height] = geometry;
        words.push(RecognizedText::new(
            text,
            confidence / 100.0,
            BoundingBox::new(left, top, width, height),
        ));
    }
    Ok(words)
}

fn malformed(row: usize, what: &str) -> ReaderError {
    ReaderError::ToolFailed {
        message: format!("unexpected tesseract output on row {row}: {what}"),
    }
}
