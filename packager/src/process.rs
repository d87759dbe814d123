//! Subprocess execution with bounded waits.
//!
//! Every external command (the upstream downloader, environment creation,
//! interpreter checks) goes through [`CommandRunner`] so tests can script
//! responses. [`SystemCommandRunner`] runs commands synchronously with
//! captured output and kills them when they exceed their timeout.

use camino::Utf8PathBuf;
use std::fmt;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use wait_timeout::ChildExt;

/// A fully described command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute.
    pub program: Utf8PathBuf,
    /// Arguments, excluding the program.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Working directory, when not inherited.
    pub cwd: Option<Utf8PathBuf>,
    /// Upper bound on the run time.
    pub timeout: Duration,
}

impl CommandSpec {
    /// Describe `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<Utf8PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            timeout,
        }
    }

    /// Append arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_owned(), value.to_owned()));
        self
    }

    /// Run the child in `dir`.
    #[must_use]
    pub fn cwd(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) || arg.contains('\n') {
                write!(f, " '<{} bytes>'", arg.len())?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Captured result of a completed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or `None` when terminated by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// A successful run printing `stdout`.
    #[must_use]
    pub fn success(stdout: &str) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.to_owned(),
            stderr: String::new(),
        }
    }

    /// A failed run printing `stderr`.
    #[must_use]
    pub fn failure(code: i32, stderr: &str) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_owned(),
        }
    }

    /// Whether the command exited with status zero.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.code == Some(0)
    }

    /// Standard output, falling back to standard error when empty.
    ///
    /// `python --version` prints to stderr on older interpreters.
    #[must_use]
    pub fn text(&self) -> &str {
        let stdout = self.stdout.trim();
        if stdout.is_empty() {
            self.stderr.trim()
        } else {
            stdout
        }
    }

    /// A one-line summary of a failure for reports.
    #[must_use]
    pub fn failure_summary(&self) -> String {
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        let last = detail.lines().last().unwrap_or("");
        match self.code {
            Some(code) if last.is_empty() => format!("exit status {code}"),
            Some(code) => format!("exit status {code}: {last}"),
            None if last.is_empty() => "terminated by signal".to_owned(),
            None => format!("terminated by signal: {last}"),
        }
    }
}

/// Errors raised while running a command.
#[derive(Debug, Error)]
pub enum RunError {
    /// The program could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// The program that failed to start.
        program: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The command exceeded its time limit and was killed.
    #[error("{program} timed out after {} seconds", timeout.as_secs())]
    TimedOut {
        /// The program that was killed.
        program: Utf8PathBuf,
        /// The limit that was exceeded.
        timeout: Duration,
    },

    /// Waiting for or reading from the child failed.
    #[error("I/O error while running command: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstraction for running external commands, enabling test doubles.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner {
    /// Run `spec` to completion and capture its output.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when the command cannot be started, times out,
    /// or its output cannot be collected. A non-zero exit is not an error.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunError>;
}

/// Runs commands as child processes of the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunError> {
        log::debug!("running {spec}");
        let mut cmd = Command::new(spec.program.as_std_path());
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir.as_std_path());
        }

        let deadline = Instant::now().checked_add(spec.timeout);
        let mut child = cmd.spawn().map_err(|source| RunError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        // Pipes are drained while waiting; a child blocked on a full pipe
        // never exits.
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let Some(status) = child.wait_timeout(spec.timeout)? else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(timed_out(spec));
        };

        // A process the child left behind can hold the pipes open after the
        // child exits; the deadline covers collecting output as well.
        let output = CommandOutput {
            code: status.code(),
            stdout: collect_output(stdout.as_ref(), deadline, spec)?,
            stderr: collect_output(stderr.as_ref(), deadline, spec)?,
        };
        log::trace!("{} exited with {:?}", spec.program, output.code);
        Ok(output)
    }
}

fn timed_out(spec: &CommandSpec) -> RunError {
    RunError::TimedOut {
        program: spec.program.clone(),
        timeout: spec.timeout,
    }
}

type PipeReader = Receiver<std::io::Result<String>>;

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> PipeReader {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let result = pipe
            .read_to_end(&mut buffer)
            .map(|_| String::from_utf8_lossy(&buffer).into_owned());
        // The receiver is gone once the run has given up on this pipe.
        let _ = sender.send(result);
    });
    receiver
}

fn collect_output(
    reader: Option<&PipeReader>,
    deadline: Option<Instant>,
    spec: &CommandSpec,
) -> Result<String, RunError> {
    let Some(reader) = reader else {
        return Ok(String::new());
    };
    let received = match deadline {
        Some(deadline) => reader.recv_timeout(deadline.saturating_duration_since(Instant::now())),
        None => reader.recv().map_err(|_| RecvTimeoutError::Disconnected),
    };
    match received {
        Ok(result) => result.map_err(RunError::Io),
        Err(RecvTimeoutError::Timeout) => {
            log::debug!("{} exited but its output pipes stayed open", spec.program);
            Err(timed_out(spec))
        }
        Err(RecvTimeoutError::Disconnected) => {
            Err(RunError::Io(std::io::Error::other("output reader stopped without a result")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_elides_multiline_arguments() {
        let spec = CommandSpec::new("/usr/bin/python3", Duration::from_secs(1))
            .args(["-c", "import sys\nprint(sys.version)"]);
        assert_eq!(spec.to_string(), "/usr/bin/python3 -c '<29 bytes>'");
    }

    #[test]
    fn text_prefers_stdout() {
        let output = CommandOutput {
            code: Some(0),
            stdout: "Python 3.11.7\n".to_owned(),
            stderr: "warning".to_owned(),
        };
        assert_eq!(output.text(), "Python 3.11.7");
    }

    #[test]
    fn text_falls_back_to_stderr() {
        let output = CommandOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: "Python 2.7.18\n".to_owned(),
        };
        assert_eq!(output.text(), "Python 2.7.18");
    }

    #[test]
    fn failure_summary_uses_last_stderr_line() {
        let output = CommandOutput::failure(1, "Traceback:\n  ...\nImportError: libpq.so.5");
        assert_eq!(output.failure_summary(), "exit status 1: ImportError: libpq.so.5");
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let spec = CommandSpec::new("/nonexistent/abipack-test-binary", Duration::from_secs(5));
        let err = SystemCommandRunner.run(&spec).expect_err("spawn fails");
        assert!(matches!(err, RunError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn captures_output_and_exit_code() {
        let spec = CommandSpec::new("/bin/sh", Duration::from_secs(10))
            .args(["-c", "echo out; echo err >&2; exit 3"]);
        let output = SystemCommandRunner.run(&spec).expect("runs");
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[test]
    fn slow_commands_are_killed() {
        let spec = CommandSpec::new("/bin/sh", Duration::from_millis(200)).args(["-c", "sleep 10"]);
        let err = SystemCommandRunner.run(&spec).expect_err("times out");
        assert!(matches!(err, RunError::TimedOut { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn lingering_background_process_does_not_extend_the_wait() {
        let spec = CommandSpec::new("/bin/sh", Duration::from_secs(1))
            .args(["-c", "sleep 8 & echo started"]);
        let started = Instant::now();

        let err = SystemCommandRunner.run(&spec).expect_err("output never closes in time");

        assert!(matches!(err, RunError::TimedOut { .. }), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn environment_and_working_directory_are_applied() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cwd = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8");
        let spec = CommandSpec::new("/bin/sh", Duration::from_secs(10))
            .args(["-c", "echo \"$ABIPACK_MARKER\"; pwd"])
            .env("ABIPACK_MARKER", "set")
            .cwd(cwd.clone());
        let output = SystemCommandRunner.run(&spec).expect("runs");
        let mut lines = output.stdout.lines();
        assert_eq!(lines.next(), Some("set"));
        let reported = std::fs::canonicalize(lines.next().expect("pwd line")).expect("canonical");
        assert_eq!(reported, std::fs::canonicalize(&cwd).expect("canonical"));
    }
}
