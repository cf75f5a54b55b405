//! Per-run state owned by the controller and shared read-only with workers.

use crate::config::{InterruptPolicy, ReaderConfig};
use crate::defaults;
use crate::pipeline::types::LanguagePack;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    Running,
    Stopping,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Idle => "idle",
            Lifecycle::Running => "running",
            Lifecycle::Stopping => "stopping",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings read by the workers at the start of every frame or chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub language: LanguagePack,
    pub confidence_threshold: f32,
    pub dedup_threshold: f32,
    pub idle_silence: Duration,
    pub interrupt_policy: InterruptPolicy,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            language: LanguagePack::default(),
            confidence_threshold: defaults::CONFIDENCE_THRESHOLD,
            dedup_threshold: defaults::DEDUP_THRESHOLD,
            idle_silence: Duration::from_secs_f32(defaults::IDLE_SILENCE_SECS),
            interrupt_policy: InterruptPolicy::default(),
        }
    }
}

impl From<&ReaderConfig> for RunSettings {
    fn from(reader: &ReaderConfig) -> Self {
        Self {
            language: reader.language_pack.clone(),
            confidence_threshold: reader.confidence_threshold,
            dedup_threshold: reader.dedup_threshold,
            // Validated positive and finite before a run starts.
            idle_silence: Duration::try_from_secs_f32(reader.idle_silence_seconds)
                .unwrap_or(Duration::from_secs_f32(defaults::IDLE_SILENCE_SECS)),
            interrupt_policy: reader.interrupt_policy,
        }
    }
}

/// Latest settings snapshot. Written by the controller only.
#[derive(Debug, Clone)]
pub struct SharedSettings {
    inner: Arc<RwLock<Arc<RunSettings>>>,
}

impl SharedSettings {
    pub fn new(settings: RunSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(settings))),
        }
    }

    /// Current snapshot. Later `publish` calls do not affect it.
    pub fn snapshot(&self) -> Arc<RunSettings> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn publish(&self, settings: RunSettings) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(settings);
    }
}

/// Live counters written by the workers.
#[derive(Debug, Default)]
pub struct RunProgress {
    frames_captured: AtomicU64,
    frames_skipped: AtomicU64,
    extraction_failures: AtomicU64,
    chunks_emitted: AtomicU64,
    chunks_spoken: AtomicU64,
    chunks_dropped: AtomicU64,
    synthesis_failures: AtomicU64,
    /// Last emitted sequence number plus one; 0 while nothing was emitted.
    emitted_through: AtomicU64,
    idle: AtomicBool,
}

impl RunProgress {
    pub fn frame_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn extraction_failed(&self) {
        self.extraction_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunk_emitted(&self, sequence_no: u64) {
        self.chunks_emitted.fetch_add(1, Ordering::Relaxed);
        self.emitted_through
            .fetch_max(sequence_no.saturating_add(1), Ordering::SeqCst);
    }

    pub fn chunk_spoken(&self) {
        self.chunks_spoken.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunk_dropped(&self) {
        self.chunks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn synthesis_failed(&self) {
        self.synthesis_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_idle(&self, idle: bool) {
        self.idle.store(idle, Ordering::Relaxed);
    }

    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Relaxed)
    }

    pub fn last_sequence_no(&self) -> Option<u64> {
        self.emitted_through
            .load(Ordering::SeqCst)
            .checked_sub(1)
    }

    pub fn stats(&self) -> RunStats {
        RunStats {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            extraction_failures: self.extraction_failures.load(Ordering::Relaxed),
            chunks_emitted: self.chunks_emitted.load(Ordering::Relaxed),
            chunks_spoken: self.chunks_spoken.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            synthesis_failures: self.synthesis_failures.load(Ordering::Relaxed),
            last_sequence_no: self.last_sequence_no(),
        }
    }
}

/// Point-in-time copy of the run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub frames_captured: u64,
    pub frames_skipped: u64,
    pub extraction_failures: u64,
    pub chunks_emitted: u64,
    pub chunks_spoken: u64,
    /// Queued chunks discarded by a stop.
    pub chunks_dropped: u64,
    pub synthesis_failures: u64,
    pub last_sequence_no: Option<u64>,
}

/// State of the active run. Created on `start`, folded into a summary on stop.
#[derive(Debug)]
pub struct PipelineState {
    pub lifecycle: Lifecycle,
    pub settings: SharedSettings,
    pub progress: Arc<RunProgress>,
    pub started_at: Instant,
}

impl PipelineState {
    pub fn new(settings: RunSettings) -> Self {
        Self {
            lifecycle: Lifecycle::Running,
            settings: SharedSettings::new(settings),
            progress: Arc::new(RunProgress::default()),
            started_at: Instant::now(),
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// `stop` was called.
    Stopped,
    /// The camera ran out of frames.
    Exhausted,
}

/// Result of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub stats: RunStats,
    pub elapsed: Duration,
    pub ended_by: RunEnd,
    /// Worker threads that missed the shutdown deadline and were detached.
    pub detached_workers: usize,
}

/// Controller view returned by `status`.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStatus {
    pub lifecycle: Lifecycle,
    pub settings: RunSettings,
    pub stats: RunStats,
    pub idle: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_not_retroactive() {
        let shared = SharedSettings::new(RunSettings::default());
        let before = shared.snapshot();
        shared.publish(RunSettings {
            confidence_threshold: 0.9,
            ..RunSettings::default()
        });
        assert_eq!(before.confidence_threshold, 0.6);
        assert_eq!(shared.snapshot().confidence_threshold, 0.9);
    }

    #[test]
    fn test_progress_tracks_last_sequence() {
        let progress = RunProgress::default();
        assert_eq!(progress.last_sequence_no(), None);
        progress.chunk_emitted(0);
        progress.chunk_emitted(1);
        progress.frame_captured();
        let stats = progress.stats();
        assert_eq!(stats.chunks_emitted, 2);
        assert_eq!(stats.frames_captured, 1);
        assert_eq!(stats.last_sequence_no, Some(1));
    }

    #[test]
    fn test_settings_from_reader_config() {
        let reader = ReaderConfig {
            idle_silence_seconds: 2.5,
            interrupt_policy: InterruptPolicy::Cut,
            ..ReaderConfig::default()
        };
        let settings = RunSettings::from(&reader);
        assert_eq!(settings.idle_silence, Duration::from_millis(2500));
        assert_eq!(settings.interrupt_policy, InterruptPolicy::Cut);
        assert_eq!(settings.language.as_str(), "eng");
    }

    #[test]
    fn test_lifecycle_names() {
        assert_eq!(Lifecycle::Idle.to_string(), "idle");
        assert_eq!(Lifecycle::Stopping.as_str(), "stopping");
    }
}
