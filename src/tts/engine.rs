use crate::error::{ReaderError, Result};
use crate::pipeline::types::LanguagePack;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Trait for text-to-speech output.
///
/// This trait allows swapping implementations (speech program vs mock).
pub trait SpeechEngine: Send + Sync {
    /// Speak `text` and return once playback has finished.
    fn synthesize_and_play(&self, text: &str, language: &LanguagePack) -> Result<()>;

    /// Abort the utterance in progress, if any. Called from another thread.
    fn cancel(&self);

    /// Whether the engine has a voice for `language`.
    fn supports_language(&self, language: &LanguagePack) -> bool;

    /// Engine name for logs
    fn name(&self) -> &str;
}

/// Implement SpeechEngine for Arc<T> to allow sharing across runs.
impl<T: SpeechEngine + ?Sized> SpeechEngine for Arc<T> {
    fn synthesize_and_play(&self, text: &str, language: &LanguagePack) -> Result<()> {
        (**self).synthesize_and_play(text, language)
    }

    fn cancel(&self) {
        (**self).cancel()
    }

    fn supports_language(&self, language: &LanguagePack) -> bool {
        (**self).supports_language(language)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Mock speech engine for testing
///
/// Records every utterance. Clones share their records, so a test can keep a
/// clone after handing the engine to a pipeline.
#[derive(Debug, Clone)]
pub struct MockSpeechEngine {
    started: Arc<Mutex<Vec<(String, LanguagePack)>>>,
    completed: Arc<Mutex<Vec<String>>>,
    failing_texts: HashSet<String>,
    languages: Vec<LanguagePack>,
    duration: Duration,
    cancelled: Arc<AtomicBool>,
    cancellations: Arc<AtomicUsize>,
}

impl MockSpeechEngine {
    /// Create a mock engine that supports "eng" and speaks instantly
    pub fn new() -> Self {
        Self {
            started: Arc::new(Mutex::new(Vec::new())),
            completed: Arc::new(Mutex::new(Vec::new())),
            failing_texts: HashSet::new(),
            languages: vec![LanguagePack::new("eng")],
            duration: Duration::ZERO,
            cancelled: Arc::new(AtomicBool::new(false)),
            cancellations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// How long each utterance takes
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Fail whenever asked to speak `text`
    pub fn with_failure_on(mut self, text: &str) -> Self {
        self.failing_texts.insert(text.to_string());
        self
    }

    /// Replace the supported language list
    pub fn with_languages(mut self, languages: &[&str]) -> Self {
        self.languages = languages.iter().map(|l| LanguagePack::new(*l)).collect();
        self
    }

    /// Texts handed to the engine, in order
    pub fn spoken(&self) -> Vec<String> {
        self.utterances().into_iter().map(|(text, _)| text).collect()
    }

    /// Texts and languages handed to the engine, in order
    pub fn utterances(&self) -> Vec<(String, LanguagePack)> {
        self.started.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Texts that played to the end
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of `cancel` calls
    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }
}

impl Default for MockSpeechEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechEngine for MockSpeechEngine {
    fn synthesize_and_play(&self, text: &str, language: &LanguagePack) -> Result<()> {
        self.cancelled.store(false, Ordering::SeqCst);
        if let Ok(mut started) = self.started.lock() {
            started.push((text.to_string(), language.clone()));
        }
        if self.failing_texts.contains(text) {
            return Err(ReaderError::ToolFailed {
                message: format!("mock speech failure on '{text}'"),
            });
        }

        let finishes_at = Instant::now() + self.duration;
        while Instant::now() < finishes_at {
            if self.cancelled.load(Ordering::SeqCst) {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(2));
        }

        if let Ok(mut completed) = self.completed.lock() {
            completed.push(text.to_string());
        }
        Ok(())
    }

    fn cancel(&self) {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn supports_language(&self, language: &LanguagePack) -> bool {
        self.languages.contains(language)
    }

    fn name(&self) -> &str {
        "mock-speech"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_utterances() {
        let engine = MockSpeechEngine::new();
        let recorder = engine.clone();
        engine
            .synthesize_and_play("HELLO", &LanguagePack::default())
            .unwrap();
        assert_eq!(recorder.spoken(), vec!["HELLO"]);
        assert_eq!(recorder.completed(), vec!["HELLO"]);
    }

    #[test]
    fn test_mock_failure_on_text() {
        let engine = MockSpeechEngine::new().with_failure_on("BAD");
        assert!(engine.synthesize_and_play("BAD", &LanguagePack::default()).is_err());
        assert!(engine.synthesize_and_play("GOOD", &LanguagePack::default()).is_ok());
        assert_eq!(engine.spoken(), vec!["BAD", "GOOD"]);
        assert_eq!(engine.completed(), vec!["GOOD"]);
    }

    #[test]
    fn test_mock_cancel_ends_utterance_early() {
        let engine = MockSpeechEngine::new().with_duration(Duration::from_secs(10));
        let speaker = engine.clone();
        let handle = thread::spawn(move || {
            speaker.synthesize_and_play("LONG", &LanguagePack::default())
        });
        thread::sleep(Duration::from_millis(50));
        engine.cancel();
        assert!(handle.join().unwrap().is_ok());
        assert!(engine.completed().is_empty());
        assert_eq!(engine.cancellations(), 1);
    }
}
