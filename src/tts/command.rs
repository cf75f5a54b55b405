//! Speech through an external program such as `espeak-ng`.

use crate::command::{CommandRunner, RunningCommand, SystemCommandRunner};
use crate::config::SpeechConfig;
use crate::error::{ReaderError, Result};
use crate::pipeline::types::LanguagePack;
use crate::tts::engine::SpeechEngine;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

const EXIT_POLL: Duration = Duration::from_millis(10);

/// The child playing an utterance, tagged with the utterance that owns it.
type Playing = Option<(u64, Box<dyn RunningCommand>)>;

/// Runs one program invocation per utterance.
///
/// Arguments are expanded per utterance: `{voice}` becomes the voice mapped to
/// the language pack and `{text}` the text to speak. Only one child plays at a
/// time; starting an utterance kills a child left over from an abandoned one.
pub struct CommandSpeechEngine<R: CommandRunner> {
    runner: R,
    program: String,
    args: Vec<String>,
    voices: BTreeMap<String, String>,
    current: Mutex<Playing>,
    next_utterance: AtomicU64,
    cancelled: AtomicBool,
}

impl<R: CommandRunner> CommandSpeechEngine<R> {
    pub fn new(runner: R, config: &SpeechConfig) -> Self {
        Self {
            runner,
            program: config.program.clone(),
            args: config.args.clone(),
            voices: config.voices.clone(),
            current: Mutex::new(None),
            next_utterance: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    fn expand_args(&self, text: &str, voice: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace("{voice}", voice).replace("{text}", text))
            .collect()
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Playing> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl CommandSpeechEngine<SystemCommandRunner> {
    pub fn system(config: &SpeechConfig) -> Self {
        Self::new(SystemCommandRunner::new(), config)
    }
}

impl<R: CommandRunner> SpeechEngine for CommandSpeechEngine<R> {
    fn synthesize_and_play(&self, text: &str, language: &LanguagePack) -> Result<()> {
        let voice = self
            .voices
            .get(language.as_str())
            .map(String::as_str)
            .unwrap_or(language.as_str());
        let args = self.expand_args(text, voice);

        let utterance = self.next_utterance.fetch_add(1, Ordering::SeqCst);
        let child = self.runner.spawn(&self.program, &args)?;
        self.cancelled.store(false, Ordering::SeqCst);
        if let Some((_, mut previous)) = self.lock_current().replace((utterance, child)) {
            tracing::warn!("{} still playing an earlier utterance, stopping it", self.program);
            if let Err(e) = previous.kill() {
                tracing::warn!("failed to stop {}: {e}", self.program);
            }
        }

        loop {
            {
                let mut current = self.lock_current();
                let Some((owner, child)) = current.as_mut() else {
                    return Ok(());
                };
                if *owner != utterance {
                    // Superseded: the newer utterance owns the slot now.
                    return Ok(());
                }
                if let Some(success) = child.try_wait()? {
                    current.take();
                    if success || self.cancelled.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                    return Err(ReaderError::ToolFailed {
                        message: format!("{} exited with an error", self.program),
                    });
                }
            }
            thread::sleep(EXIT_POLL);
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some((_, child)) = self.lock_current().as_mut()
            && let Err(e) = child.kill()
        {
            tracing::warn!("failed to stop {}: {e}", self.program);
        }
    }

    fn supports_language(&self, language: &LanguagePack) -> bool {
        self.voices.contains_key(language.as_str())
    }

    fn name(&self) -> &str {
        &self.program
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MockCommandRunner;
    use std::sync::Arc;

    #[test]
    fn test_voice_and_text_are_substituted() {
        let runner = MockCommandRunner::new();
        let engine = CommandSpeechEngine::new(runner.clone(), &SpeechConfig::default());

        engine
            .synthesize_and_play("HELLO WORLD", &LanguagePack::new("deu"))
            .unwrap();

        let (program, args) = &runner.calls()[0];
        assert_eq!(program, "espeak-ng");
        assert_eq!(
            args,
            &["-v", "de", "--", "HELLO WORLD"].map(String::from).to_vec()
        );
    }

    #[test]
    fn test_text_with_leading_dash_stays_an_operand() {
        let runner = MockCommandRunner::new();
        let engine = CommandSpeechEngine::new(runner.clone(), &SpeechConfig::default());

        for line in ["-w/tmp/x.wav", "- Milk", "--version"] {
            engine
                .synthesize_and_play(line, &LanguagePack::default())
                .unwrap();
        }

        for (call, line) in runner.calls().iter().zip(["-w/tmp/x.wav", "- Milk", "--version"]) {
            let args = &call.1;
            let text_at = args.iter().position(|arg| arg == line).unwrap();
            assert_eq!(text_at, args.len() - 1);
            assert_eq!(args[text_at - 1], "--");
            assert!(!args[..text_at - 1].iter().any(|arg| arg.starts_with("-w")));
        }
    }

    #[test]
    fn test_unmapped_language_is_passed_through_but_unsupported() {
        let runner = MockCommandRunner::new();
        let engine = CommandSpeechEngine::new(runner.clone(), &SpeechConfig::default());
        let pack = LanguagePack::new("hin");

        assert!(!engine.supports_language(&pack));
        assert!(engine.supports_language(&LanguagePack::new("eng")));
        engine.synthesize_and_play("namaste", &pack).unwrap();
        assert_eq!(runner.calls()[0].1[1], "hin");
    }

    #[test]
    fn test_failed_exit_is_an_error() {
        let runner = MockCommandRunner::new().with_spawn_failure();
        let engine = CommandSpeechEngine::new(runner, &SpeechConfig::default());
        let result = engine.synthesize_and_play("oops", &LanguagePack::default());
        assert!(matches!(result, Err(ReaderError::ToolFailed { .. })));
    }

    #[test]
    fn test_cancel_kills_running_utterance() {
        let runner = MockCommandRunner::new().with_spawn_duration(Duration::from_secs(30));
        let engine = Arc::new(CommandSpeechEngine::new(runner, &SpeechConfig::default()));
        let speaker = Arc::clone(&engine);
        let handle = thread::spawn(move || {
            speaker.synthesize_and_play("a long paragraph", &LanguagePack::default())
        });

        thread::sleep(Duration::from_millis(50));
        engine.cancel();
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_new_utterance_kills_abandoned_child() {
        let runner = MockCommandRunner::new().with_spawn_duration(Duration::from_secs(30));
        let engine = Arc::new(CommandSpeechEngine::new(runner.clone(), &SpeechConfig::default()));

        let abandoned = Arc::clone(&engine);
        let first = thread::spawn(move || {
            abandoned.synthesize_and_play("a long paragraph", &LanguagePack::default())
        });
        thread::sleep(Duration::from_millis(50));

        let current = Arc::clone(&engine);
        let second = thread::spawn(move || {
            current.synthesize_and_play("the next page", &LanguagePack::default())
        });

        // The first call gives up its slot instead of waiting on the new child.
        assert!(first.join().unwrap().is_ok());
        assert_eq!(runner.kills(), 1);

        engine.cancel();
        assert!(second.join().unwrap().is_ok());
        assert_eq!(runner.kills(), 2);
        assert_eq!(runner.calls().len(), 2);
    }
}
