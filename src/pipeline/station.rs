//! Terminal station: a thread that consumes a channel until it closes.

use crate::error::Result;
use crate::pipeline::error::{ErrorReporter, StationError};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// The last stage of the pipeline, fed by a queue.
pub trait Station: Send + 'static {
    type Input: Send + 'static;

    /// Handles one item. A recoverable error is reported and the next item is
    /// taken; a fatal error ends the station.
    fn process(&mut self, input: Self::Input) -> std::result::Result<(), StationError>;

    /// Name used in thread names and error reports.
    fn name(&self) -> &'static str;

    /// Called once after the last item.
    fn shutdown(&mut self) {}
}

/// A station running on its own thread.
pub struct StationRunner {
    handle: Option<JoinHandle<()>>,
    station_name: &'static str,
}

impl StationRunner {
    /// Spawns `station` to drain `input_rx`.
    ///
    /// The thread exits once every sender is dropped and the queue is empty,
    /// or on a fatal error.
    pub fn spawn<S: Station>(
        mut station: S,
        input_rx: Receiver<S::Input>,
        error_reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self> {
        let station_name = station.name();
        let handle = thread::Builder::new()
            .name(format!("readaloud-{station_name}"))
            .spawn(move || {
                for input in input_rx.iter() {
                    match station.process(input) {
                        Ok(()) => {}
                        Err(error @ StationError::Recoverable(_)) => {
                            error_reporter.report(station_name, &error);
                        }
                        Err(error @ StationError::Fatal(_)) => {
                            error_reporter.report(station_name, &error);
                            break;
                        }
                    }
                }
                station.shutdown();
            })?;

        Ok(Self {
            handle: Some(handle),
            station_name,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Waits for the station thread.
    pub fn join(mut self) -> std::result::Result<(), String> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| format!("station '{}' panicked", self.station_name)),
            None => Ok(()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.station_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::CollectingReporter;
    use crossbeam_channel::bounded;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records inputs; odd numbers are rejected, zero is fatal.
    struct Tally {
        seen: Arc<Mutex<Vec<i32>>>,
        closed: Arc<AtomicBool>,
    }

    impl Station for Tally {
        type Input = i32;

        fn process(&mut self, input: i32) -> std::result::Result<(), StationError> {
            if input == 0 {
                return Err(StationError::Fatal("zero".to_string()));
            }
            if input % 2 == 1 {
                return Err(StationError::Recoverable(format!("odd: {input}")));
            }
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(input);
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "tally"
        }

        fn shutdown(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn tally() -> (Tally, Arc<Mutex<Vec<i32>>>, Arc<AtomicBool>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let station = Tally {
            seen: seen.clone(),
            closed: closed.clone(),
        };
        (station, seen, closed)
    }

    #[test]
    fn test_drains_queue_then_shuts_down() {
        let (station, seen, closed) = tally();
        let (input_tx, input_rx) = bounded(10);
        let runner =
            StationRunner::spawn(station, input_rx, Arc::new(CollectingReporter::new())).unwrap();
        assert_eq!(runner.name(), "tally");

        for i in [2, 4, 6] {
            input_tx.send(i).unwrap();
        }
        drop(input_tx);

        runner.join().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![2, 4, 6]);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_recoverable_errors_are_reported_and_skipped() {
        let (station, seen, _) = tally();
        let reporter = Arc::new(CollectingReporter::new());
        let (input_tx, input_rx) = bounded(10);
        let runner = StationRunner::spawn(station, input_rx, reporter.clone()).unwrap();

        for i in 1..=5 {
            input_tx.send(i).unwrap();
        }
        drop(input_tx);
        runner.join().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![2, 4]);
        let reports = reporter.reports();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].0, "tally");
    }

    #[test]
    fn test_fatal_error_ends_station_with_queue_open() {
        let (station, seen, closed) = tally();
        let reporter = Arc::new(CollectingReporter::new());
        let (input_tx, input_rx) = bounded(10);
        for i in [2, 0, 4] {
            input_tx.send(i).unwrap();
        }
        let runner = StationRunner::spawn(station, input_rx, reporter.clone()).unwrap();

        runner.join().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![2]);
        assert!(closed.load(Ordering::SeqCst));
        assert!(matches!(reporter.reports()[0].1, StationError::Fatal(_)));
        drop(input_tx);
    }
}
