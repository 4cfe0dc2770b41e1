//! The single path by which the agent shells out to external commands.
//!
//! Every other component (container runtime, init system, firewall,
//! bootstrap) is expected to build an argument vector and hand it to
//! [`Runner::run`] or [`Runner::run_or_fail`] rather than constructing and
//! spawning a [`std::process::Command`] of its own.

use std::ffi::OsStr;
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Exit code synthesized when a command is killed for exceeding its timeout.
///
/// Matches the conventional shell timeout(1) sentinel so logs and scripts
/// that already know to look for 124 keep working.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// How much of a command's output to tee to the structured logger, and at
/// what level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Never log stdout/stderr, even on failure.
    Silent,
    /// Log at `debug` as lines arrive.
    Debug,
    /// Log at `info` as lines arrive.
    Verbose,
    /// Don't log while running; log captured output at `warn` only if the
    /// command exits non-zero.
    VerboseOnFailure,
}

/// The outcome of a single [`Runner::run`] call.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Process exit code, or [`TIMEOUT_EXIT_CODE`] if the timeout fired.
    pub code: i32,
}

impl RunOutput {
    /// True if the process exited with status zero.
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Error returned by [`Runner::run_or_fail`].
#[derive(Debug, Error)]
#[error("command failed (exit {code}): {argv}\n{stderr}")]
pub struct CommandFailed {
    /// The argument vector, joined for display.
    pub argv: String,
    /// The exit code observed.
    pub code: i32,
    /// Captured stderr.
    pub stderr: String,
}

/// Builds and executes external commands, capturing both streams and
/// optionally killing the child after a timeout.
#[derive(Debug)]
pub struct Runner {
    cmd: Command,
    argv_display: String,
    verbosity: Verbosity,
    timeout: Option<Duration>,
}

impl Runner {
    /// Start building a command invoking `exe` with `args`.
    pub fn new<S, I, A>(exe: S, args: I) -> Self
    where
        S: AsRef<OsStr>,
        I: IntoIterator<Item = A>,
        A: AsRef<OsStr>,
    {
        let exe = exe.as_ref();
        let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
        let argv_display = shlex::try_join(
            std::iter::once(exe.to_string_lossy().into_owned())
                .chain(args.iter().map(|a| a.to_string_lossy().into_owned()))
                .map(|s| s),
        )
        .unwrap_or_else(|_| format!("{:?} {:?}", exe, args));
        let mut cmd = Command::new(exe);
        cmd.args(&args);
        cmd.stdin(Stdio::null());
        Self {
            cmd,
            argv_display,
            verbosity: Verbosity::VerboseOnFailure,
            timeout: None,
        }
    }

    /// Set how output is teed to the logger.
    pub fn verbosity(mut self, v: Verbosity) -> Self {
        self.verbosity = v;
        self
    }

    /// Bound the command's runtime; past this the child is killed and the
    /// call returns with [`TIMEOUT_EXIT_CODE`] rather than erroring.
    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = Some(d);
        self
    }

    /// Set an environment variable for the child.
    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.cmd.env(key, val);
        self
    }

    /// Run the command to completion (or until it is killed for timeout),
    /// returning the captured output and exit code. Never fails solely
    /// because the command exited non-zero; that is the caller's concern.
    pub fn run(mut self) -> std::io::Result<RunOutput> {
        tracing::debug!("exec: {}", self.argv_display);
        self.cmd.stdout(Stdio::piped());
        self.cmd.stderr(Stdio::piped());
        let mut child = self.cmd.spawn()?;
        let mut stdout_pipe = child.stdout.take().expect("piped stdout");
        let mut stderr_pipe = child.stderr.take().expect("piped stderr");

        // Drain both streams concurrently on reader threads so a full pipe
        // on one side can never deadlock the other.
        let stdout_thread = std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stdout_pipe.read_to_string(&mut buf);
            buf
        });
        let stderr_thread = std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr_pipe.read_to_string(&mut buf);
            buf
        });

        let start = Instant::now();
        let code = loop {
            if let Some(status) = child.try_wait()? {
                break status.code().unwrap_or(-1);
            }
            if let Some(timeout) = self.timeout {
                if start.elapsed() >= timeout {
                    tracing::warn!("command timed out after {:?}: {}", timeout, self.argv_display);
                    let _ = child.kill();
                    let _ = child.wait();
                    break TIMEOUT_EXIT_CODE;
                }
            }
            std::thread::sleep(Duration::from_millis(20));
        };

        let stdout = stdout_thread.join().unwrap_or_default();
        let stderr = stderr_thread.join().unwrap_or_default();

        match self.verbosity {
            Verbosity::Silent => {}
            Verbosity::Debug => {
                for line in stdout.lines().chain(stderr.lines()) {
                    tracing::debug!("{line}");
                }
            }
            Verbosity::Verbose => {
                for line in stdout.lines().chain(stderr.lines()) {
                    tracing::info!("{line}");
                }
            }
            Verbosity::VerboseOnFailure => {
                if code != 0 {
                    for line in stdout.lines().chain(stderr.lines()) {
                        tracing::warn!("{line}");
                    }
                }
            }
        }

        Ok(RunOutput {
            stdout,
            stderr,
            code,
        })
    }

    /// Like [`Runner::run`], but turn a non-zero exit (including a timeout)
    /// into a typed error.
    pub fn run_or_fail(self) -> Result<RunOutput, CommandFailed> {
        let argv = self.argv_display.clone();
        let out = self.run().map_err(|e| CommandFailed {
            argv: argv.clone(),
            code: -1,
            stderr: e.to_string(),
        })?;
        if out.code != 0 {
            return Err(CommandFailed {
                argv,
                code: out.code,
                stderr: out.stderr.clone(),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_impl_all!(RunOutput: Send, Sync);

    #[test]
    fn test_run_success() {
        let out = Runner::new("true", Vec::<&str>::new()).run().unwrap();
        assert!(out.success());
        assert_eq!(out.code, 0);
    }

    #[test]
    fn test_run_captures_stdout() {
        let out = Runner::new("echo", ["hello"]).run().unwrap();
        similar_asserts::assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn test_run_or_fail_on_nonzero() {
        let err = Runner::new("false", Vec::<&str>::new())
            .verbosity(Verbosity::Silent)
            .run_or_fail()
            .unwrap_err();
        assert_eq!(err.code, 1);
    }

    #[test]
    fn test_timeout_produces_124() {
        let out = Runner::new("sleep", ["5"])
            .timeout(Duration::from_millis(50))
            .verbosity(Verbosity::Silent)
            .run()
            .unwrap();
        assert_eq!(out.code, TIMEOUT_EXIT_CODE);
    }
}
