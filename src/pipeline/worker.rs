//! Helper thread that turns a blocking call into a call with a deadline.
//!
//! Collaborator calls (camera capture, OCR, playback) may hang. Each of them
//! runs on a dedicated worker; the caller waits on a channel with a timeout and
//! the stop signal, and walks away if either fires. At most one request is in
//! flight: while an abandoned call is still running, new calls fail fast with
//! [`CallError::Busy`] instead of queueing behind it. Late answers are matched
//! by ticket and discarded.

use crate::error::Result;
use crate::pipeline::stop::StopSignal;
use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, never, select};
use std::fmt;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Why a bounded call returned without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallError {
    /// The previous call has not returned yet.
    Busy,
    /// No answer within the timeout.
    TimedOut,
    /// The stop signal was raised while waiting.
    Interrupted,
    /// The worker thread is gone (it panicked or was shut down).
    Disconnected,
    /// `resume` was called with no call outstanding.
    NothingPending,
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Busy => write!(f, "engine busy with an earlier request"),
            CallError::TimedOut => write!(f, "timed out"),
            CallError::Interrupted => write!(f, "interrupted by stop"),
            CallError::Disconnected => write!(f, "worker thread exited"),
            CallError::NothingPending => write!(f, "no call outstanding"),
        }
    }
}

impl std::error::Error for CallError {}

pub struct BoundedWorker<I, O> {
    name: String,
    request_tx: Option<Sender<(u64, I)>>,
    response_rx: Receiver<(u64, O)>,
    next_ticket: u64,
    pending: Option<u64>,
    handle: Option<JoinHandle<()>>,
}

impl<I: Send + 'static, O: Send + 'static> BoundedWorker<I, O> {
    /// Spawns the worker thread running `call` for every request.
    pub fn spawn<F>(name: &str, mut call: F) -> Result<Self>
    where
        F: FnMut(I) -> O + Send + 'static,
    {
        let (request_tx, request_rx) = bounded::<(u64, I)>(1);
        let (response_tx, response_rx) = bounded::<(u64, O)>(1);

        let handle = thread::Builder::new()
            .name(format!("readaloud-{name}"))
            .spawn(move || {
                while let Ok((ticket, input)) = request_rx.recv() {
                    let output = call(input);
                    if response_tx.send((ticket, output)).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            name: name.to_string(),
            request_tx: Some(request_tx),
            response_rx,
            next_ticket: 0,
            pending: None,
            handle: Some(handle),
        })
    }

    /// Runs one call, waiting at most `timeout`.
    ///
    /// With `stop` set, the wait also ends as soon as the signal is raised.
    pub fn call(
        &mut self,
        input: I,
        timeout: Duration,
        stop: Option<&StopSignal>,
    ) -> std::result::Result<O, CallError> {
        self.collect_stale()?;
        if self.pending.is_some() {
            return Err(CallError::Busy);
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let Some(request_tx) = &self.request_tx else {
            return Err(CallError::Disconnected);
        };
        request_tx
            .try_send((ticket, input))
            .map_err(|_| CallError::Disconnected)?;
        self.pending = Some(ticket);

        self.wait_for(ticket, timeout, stop)
    }

    /// Keeps waiting for the outstanding call instead of discarding its answer.
    pub fn resume(
        &mut self,
        timeout: Duration,
        stop: Option<&StopSignal>,
    ) -> std::result::Result<O, CallError> {
        let Some(ticket) = self.pending else {
            return Err(CallError::NothingPending);
        };
        self.wait_for(ticket, timeout, stop)
    }

    /// Whether a call is outstanding, without touching its answer.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn wait_for(
        &mut self,
        ticket: u64,
        timeout: Duration,
        stop: Option<&StopSignal>,
    ) -> std::result::Result<O, CallError> {
        let never_rx = never::<()>();
        let stop_rx = stop.map(|s| s.receiver()).unwrap_or(&never_rx);
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            select! {
                recv(self.response_rx) -> message => match message {
                    Ok((answered, output)) if answered == ticket => {
                        self.pending = None;
                        return Ok(output);
                    }
                    Ok(_) => continue,
                    Err(_) => return Err(CallError::Disconnected),
                },
                recv(stop_rx) -> _ => return Err(CallError::Interrupted),
                default(remaining) => return Err(CallError::TimedOut),
            }
        }
    }

    /// Whether an abandoned call is still running.
    pub fn is_busy(&mut self) -> bool {
        // A dead worker is not busy; the next call reports it.
        let _stale = self.collect_stale();
        self.pending.is_some()
    }

    fn collect_stale(&mut self) -> std::result::Result<(), CallError> {
        while let Some(pending) = self.pending {
            match self.response_rx.try_recv() {
                Ok((answered, _late)) => {
                    if answered == pending {
                        tracing::debug!(worker = %self.name, ticket = answered, "discarded late answer");
                        self.pending = None;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Err(CallError::Disconnected),
            }
        }
        Ok(())
    }

    /// Closes the request channel and joins the thread if it exits within `wait`.
    ///
    /// Returns `false` when the thread was left running (detached).
    pub fn shutdown(mut self, wait: Duration) -> bool {
        self.request_tx.take();
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let deadline = Instant::now() + wait;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!(worker = %self.name, "worker still busy at shutdown, detaching");
                return false;
            }
            // Drain answers so a finished call does not block on a full channel.
            while self.response_rx.try_recv().is_ok() {}
            thread::sleep(Duration::from_millis(5));
        }
        if handle.join().is_err() {
            tracing::error!(worker = %self.name, "worker thread panicked");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_returns_result() {
        let mut worker = BoundedWorker::spawn("double", |x: u32| x * 2).unwrap();
        assert_eq!(worker.call(21, Duration::from_secs(5), None), Ok(42));
        assert_eq!(worker.call(5, Duration::from_secs(5), None), Ok(10));
        assert!(worker.shutdown(Duration::from_secs(1)));
    }

    #[test]
    fn test_slow_call_times_out_then_reports_busy() {
        let mut worker = BoundedWorker::spawn("slow", |ms: u64| {
            thread::sleep(Duration::from_millis(ms));
            ms
        })
        .unwrap();

        assert_eq!(
            worker.call(300, Duration::from_millis(20), None),
            Err(CallError::TimedOut)
        );
        assert_eq!(
            worker.call(1, Duration::from_millis(20), None),
            Err(CallError::Busy)
        );
        assert!(worker.is_busy());

        thread::sleep(Duration::from_millis(400));
        assert!(!worker.is_busy());
        assert_eq!(worker.call(1, Duration::from_secs(5), None), Ok(1));
    }

    #[test]
    fn test_stop_interrupts_wait() {
        let mut worker = BoundedWorker::spawn("sleepy", |ms: u64| {
            thread::sleep(Duration::from_millis(ms));
        })
        .unwrap();
        let stop = StopSignal::new();
        stop.raise();

        let started = Instant::now();
        assert_eq!(
            worker.call(500, Duration::from_secs(10), Some(&stop)),
            Err(CallError::Interrupted)
        );
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_resume_collects_late_answer() {
        let mut worker = BoundedWorker::spawn("late", |ms: u64| {
            thread::sleep(Duration::from_millis(ms));
            ms
        })
        .unwrap();

        assert_eq!(
            worker.call(100, Duration::from_millis(10), None),
            Err(CallError::TimedOut)
        );
        assert!(worker.has_pending());
        assert_eq!(worker.resume(Duration::from_secs(5), None), Ok(100));
        assert!(!worker.has_pending());
        assert_eq!(
            worker.resume(Duration::from_millis(10), None),
            Err(CallError::NothingPending)
        );
    }

    #[test]
    fn test_panicking_worker_disconnects() {
        let mut worker = BoundedWorker::spawn("panics", |_: ()| -> u32 {
            panic!("engine crashed");
        })
        .unwrap();
        assert_eq!(
            worker.call((), Duration::from_secs(5), None),
            Err(CallError::Disconnected)
        );
    }
}
