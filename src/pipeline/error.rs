//! Error types and reporting for pipeline stations.

use crate::error::ReaderError;
use std::fmt;
use std::sync::Mutex;

/// Errors that can occur while a station processes one item.
#[derive(Debug, Clone, PartialEq)]
pub enum StationError {
    /// The item is lost, the station keeps running.
    Recoverable(String),
    /// The station must shut down.
    Fatal(String),
}

impl fmt::Display for StationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            StationError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for StationError {}

impl From<ReaderError> for StationError {
    fn from(error: ReaderError) -> Self {
        if matches!(error, ReaderError::Device { .. }) {
            StationError::Fatal(error.to_string())
        } else {
            StationError::Recoverable(error.to_string())
        }
    }
}

/// Sink for errors that are absorbed inside the pipeline.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from a station.
    fn report(&self, station: &str, error: &StationError);
}

/// Reporter that forwards to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, station: &str, error: &StationError) {
        match error {
            StationError::Recoverable(msg) => tracing::warn!(station, "{msg}"),
            StationError::Fatal(msg) => tracing::error!(station, "{msg}"),
        }
    }
}

/// Reporter that keeps every report, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<(String, StationError)>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all reports so far.
    pub fn reports(&self) -> Vec<(String, StationError)> {
        match self.reports.lock() {
            Ok(reports) => reports.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, station: &str, error: &StationError) {
        let mut reports = match self.reports.lock() {
            Ok(reports) => reports,
            Err(poisoned) => poisoned.into_inner(),
        };
        reports.push((station.to_string(), error.clone()));
    }
}
