//! External command invocation with a per-invocation deadline.
//!
//! The exporter never talks to the kopia repository directly; every fact it
//! publishes comes from shelling out to the kopia CLI. This module owns that
//! seam: a `CommandRunner` trait with a real implementation for production
//! and a scripted mock for tests.
//!
//! A non-zero exit is a normal, expected outcome (kopia not yet configured,
//! repository locked, ...) and is reported as `CommandError::Exit`, never a
//! panic. A command that outlives its deadline is killed and reported as
//! `CommandError::Deadline` so one hung invocation cannot stall every
//! subsequent poll. Retry policy lives with the caller, not here.

use std::collections::HashMap;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

/// How often the real runner polls a child for completion.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Error type for external command invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandError {
    /// The command could not be started at all.
    Spawn(String),
    /// The command ran past its deadline and was killed.
    Deadline(Duration),
    /// The command ran to completion but reported failure.
    Exit {
        code: Option<i32>,
        stderr: String,
    },
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Spawn(msg) => write!(f, "failed to start command: {}", msg),
            CommandError::Deadline(d) => {
                write!(f, "command exceeded deadline of {:.1}s", d.as_secs_f64())
            }
            CommandError::Exit { code, stderr } => {
                let stderr = stderr.trim();
                match code {
                    Some(code) if stderr.is_empty() => write!(f, "command exited with {}", code),
                    Some(code) => write!(f, "command exited with {}: {}", code, stderr),
                    None => write!(f, "command terminated by signal: {}", stderr),
                }
            }
        }
    }
}

impl std::error::Error for CommandError {}

/// Runs an external command to completion and captures its output.
///
/// Implemented by `RealRunner` for production and `MockRunner` for tests,
/// mirroring the real/mock filesystem split used by the collector.
pub trait CommandRunner {
    /// Runs `program` with `args`, waiting at most `deadline`.
    ///
    /// Returns captured stdout on success. Non-zero exit, spawn failure and
    /// deadline expiry are all typed failures; stderr is captured for error
    /// context either way.
    fn run(&self, program: &str, args: &[&str], deadline: Duration)
    -> Result<Vec<u8>, CommandError>;
}

/// Production runner backed by `std::process::Command`.
#[derive(Debug, Clone, Default)]
pub struct RealRunner;

impl RealRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for RealRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        deadline: Duration,
    ) -> Result<Vec<u8>, CommandError> {
        let start = Instant::now();

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CommandError::Spawn(format!("{}: {}", program, e)))?;

        // Drain both pipes on dedicated threads so a chatty child cannot
        // deadlock against a full pipe buffer while we wait on it.
        let stdout_handle = child.stdout.take().map(spawn_reader);
        let stderr_handle = child.stderr.take().map(spawn_reader);

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if start.elapsed() >= deadline {
                        kill_and_reap(&mut child);
                        join_reader(stdout_handle);
                        join_reader(stderr_handle);
                        debug!(program, ?deadline, "killed command after deadline");
                        return Err(CommandError::Deadline(deadline));
                    }
                    thread::sleep(WAIT_POLL_INTERVAL);
                }
                Err(e) => {
                    kill_and_reap(&mut child);
                    join_reader(stdout_handle);
                    join_reader(stderr_handle);
                    return Err(CommandError::Spawn(format!("wait failed: {}", e)));
                }
            }
        };

        let stdout = join_reader(stdout_handle);
        let stderr = join_reader(stderr_handle);

        if status.success() {
            Ok(stdout)
        } else {
            Err(CommandError::Exit {
                code: status.code(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            })
        }
    }
}

/// Kills and reaps an abandoned child. Best effort: the child may have
/// exited in the meantime; without the wait it would linger as a zombie.
fn kill_and_reap(child: &mut std::process::Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_reader<R: Read + Send + 'static>(mut source: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = source.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Scripted runner for tests: maps the first argument after the program
/// name (the kopia subcommand, e.g. "snapshot") to a canned response.
#[derive(Debug, Default)]
pub struct MockRunner {
    responses: Mutex<HashMap<String, Result<Vec<u8>, CommandError>>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a successful response for the given subcommand.
    pub fn respond(self, subcommand: &str, stdout: &[u8]) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(subcommand.to_string(), Ok(stdout.to_vec()));
        self
    }

    /// Registers a failure for the given subcommand.
    pub fn fail(self, subcommand: &str, error: CommandError) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(subcommand.to_string(), Err(error));
        self
    }
}

impl CommandRunner for MockRunner {
    fn run(
        &self,
        _program: &str,
        args: &[&str],
        _deadline: Duration,
    ) -> Result<Vec<u8>, CommandError> {
        let key = args.first().copied().unwrap_or_default();
        self.responses
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_else(|| {
                Err(CommandError::Spawn(format!(
                    "mock: no response registered for '{}'",
                    key
                )))
            })
    }
}
