//! External program execution with testable command runners.
//!
//! The OCR and speech adapters drive `tesseract` and `espeak-ng` through the
//! `CommandRunner` trait, so both are testable without the programs installed.

use crate::error::{ReaderError, Result};
use std::collections::VecDeque;
use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Trait for executing system commands.
///
/// Object-safe, Send + Sync for use in concurrent contexts.
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion, optionally feeding `stdin`.
    ///
    /// Returns the stdout of the command on success.
    fn run(&self, program: &str, args: &[String], stdin: Option<&[u8]>) -> Result<String>;

    /// Start a command without waiting for it.
    fn spawn(&self, program: &str, args: &[String]) -> Result<Box<dyn RunningCommand>>;
}

/// Handle to a started command.
pub trait RunningCommand: Send {
    /// Non-blocking exit check: `Some(success)` once the command has exited.
    fn try_wait(&mut self) -> Result<Option<bool>>;

    /// Terminate the command.
    fn kill(&mut self) -> Result<()>;
}

fn launch_error(program: &str, error: std::io::Error) -> ReaderError {
    if error.kind() == std::io::ErrorKind::NotFound {
        ReaderError::ToolNotFound {
            tool: program.to_string(),
        }
    } else {
        ReaderError::ToolFailed {
            message: format!("Failed to execute {program}: {error}"),
        }
    }
}

/// Production command runner using std::process::Command.
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[String], stdin: Option<&[u8]>) -> Result<String> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| launch_error(program, e))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).map_err(|e| ReaderError::ToolFailed {
                message: format!("Failed to write to {program}: {e}"),
            })?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ReaderError::ToolFailed {
                message: format!(
                    "{} failed with status {:?}: {}",
                    program,
                    output.status,
                    stderr.trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn spawn(&self, program: &str, args: &[String]) -> Result<Box<dyn RunningCommand>> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| launch_error(program, e))?;
        Ok(Box::new(SystemChild(child)))
    }
}

struct SystemChild(Child);

impl RunningCommand for SystemChild {
    fn try_wait(&mut self) -> Result<Option<bool>> {
        Ok(self.0.try_wait()?.map(|status| status.success()))
    }

    fn kill(&mut self) -> Result<()> {
        match self.0.kill() {
            Ok(()) => {
                // Reap so the child does not linger as a zombie.
                let _status = self.0.wait();
                Ok(())
            }
            // Already exited
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Mock command runner for testing.
///
/// Records every invocation and returns configured responses in order; once
/// they run out, `run` returns an empty string. Spawned commands "run" for the
/// configured duration.
#[derive(Debug, Clone, Default)]
pub struct MockCommandRunner {
    calls: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    inputs: Arc<Mutex<Vec<Vec<u8>>>>,
    responses: Arc<Mutex<VecDeque<Result<String>>>>,
    kills: Arc<AtomicUsize>,
    spawn_duration: Duration,
    spawn_failure: bool,
}

impl MockCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response
    pub fn with_response(self, stdout: &str) -> Self {
        self.push(Ok(stdout.to_string()));
        self
    }

    /// Queue a failure
    pub fn with_error(self, error: ReaderError) -> Self {
        self.push(Err(error));
        self
    }

    /// How long spawned commands run before exiting successfully
    pub fn with_spawn_duration(mut self, duration: Duration) -> Self {
        self.spawn_duration = duration;
        self
    }

    /// Spawned commands exit with a failure status
    pub fn with_spawn_failure(mut self) -> Self {
        self.spawn_failure = true;
        self
    }

    fn push(&self, response: Result<String>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(response);
        }
    }

    fn record(&self, program: &str, args: &[String]) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((program.to_string(), args.to_vec()));
        }
    }

    /// All invocations so far, in order.
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of spawned commands killed so far.
    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    /// Bytes piped to `run` so far, one entry per call that had stdin.
    pub fn inputs(&self) -> Vec<Vec<u8>> {
        self.inputs.lock().map(|i| i.clone()).unwrap_or_default()
    }
}

impl CommandRunner for MockCommandRunner {
    fn run(&self, program: &str, args: &[String], stdin: Option<&[u8]>) -> Result<String> {
        self.record(program, args);
        if let (Some(input), Ok(mut inputs)) = (stdin, self.inputs.lock()) {
            inputs.push(input.to_vec());
        }
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front());
        next.unwrap_or_else(|| Ok(String::new()))
    }

    fn spawn(&self, program: &str, args: &[String]) -> Result<Box<dyn RunningCommand>> {
        self.record(program, args);
        Ok(Box::new(MockChild {
            finishes_at: Instant::now() + self.spawn_duration,
            success: !self.spawn_failure,
            killed: false,
            kills: Arc::clone(&self.kills),
        }))
    }
}

struct MockChild {
    finishes_at: Instant,
    success: bool,
    killed: bool,
    kills: Arc<AtomicUsize>,
}

impl RunningCommand for MockChild {
    fn try_wait(&mut self) -> Result<Option<bool>> {
        if self.killed {
            return Ok(Some(false));
        }
        Ok((Instant::now() >= self.finishes_at).then_some(self.success))
    }

    fn kill(&mut self) -> Result<()> {
        if !self.killed {
            self.killed = true;
            self.kills.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_missing_program_is_tool_not_found() {
        let runner = SystemCommandRunner::new();
        let result = runner.run("readaloud-no-such-program", &[], None);
        assert!(matches!(result, Err(ReaderError::ToolNotFound { .. })));
    }

    #[test]
    fn test_mock_records_calls_and_replays_responses() {
        let runner = MockCommandRunner::new()
            .with_response("first")
            .with_error(ReaderError::ToolFailed {
                message: "boom".to_string(),
            });

        assert_eq!(runner.run("a", &args(&["-x"]), None).unwrap(), "first");
        assert!(runner.run("b", &[], None).is_err());
        assert_eq!(runner.run("c", &[], None).unwrap(), "");
        assert_eq!(runner.calls()[0], ("a".to_string(), args(&["-x"])));
        assert_eq!(runner.calls().len(), 3);
    }

    #[test]
    fn test_mock_child_exits_after_duration_or_kill() {
        let runner = MockCommandRunner::new().with_spawn_duration(Duration::from_secs(60));
        let mut child = runner.spawn("say", &[]).unwrap();
        assert_eq!(child.try_wait().unwrap(), None);
        child.kill().unwrap();
        assert_eq!(child.try_wait().unwrap(), Some(false));

        let quick = MockCommandRunner::new();
        let mut child = quick.spawn("say", &[]).unwrap();
        assert_eq!(child.try_wait().unwrap(), Some(true));
    }
}
