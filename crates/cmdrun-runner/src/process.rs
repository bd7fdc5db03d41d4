use std::time::Duration;

use crate::error::{CommandFailed, ExecError};
use crate::options::ExecOptions;

use super::CommandSpec;

// ============================================================================
// Captured output
// ============================================================================

/// One captured output stream.
///
/// [`ExecOptions::raw`] selects the representation: the raw byte buffer,
/// or the buffer split into lines with `\n` / `\r\n` terminators removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Captured {
    Raw(Vec<u8>),
    Lines(Vec<Vec<u8>>),
}

impl Captured {
    /// Build the representation requested by `raw`.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>, raw: bool) -> Self {
        if raw {
            Self::Raw(bytes)
        } else {
            Self::Lines(split_lines(&bytes))
        }
    }

    /// Total number of bytes, excluding stripped line terminators for
    /// [`Captured::Lines`].
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Raw(bytes) => bytes.len(),
            Self::Lines(lines) => lines.iter().map(Vec::len).sum(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Raw(bytes) => bytes.is_empty(),
            Self::Lines(lines) => lines.is_empty(),
        }
    }

    /// Lines of the stream, splitting the raw buffer on demand.
    #[must_use]
    pub fn lines(&self) -> Vec<&[u8]> {
        match self {
            Self::Raw(bytes) => split_line_slices(bytes).collect(),
            Self::Lines(lines) => lines.iter().map(Vec::as_slice).collect(),
        }
    }

    /// The raw buffer, if this stream was captured raw.
    #[must_use]
    pub fn as_raw(&self) -> Option<&[u8]> {
        match self {
            Self::Raw(bytes) => Some(bytes),
            Self::Lines(_) => None,
        }
    }

    /// Lossy UTF-8 rendering; lines are joined with `\n`.
    #[must_use]
    pub fn to_string_lossy(&self) -> String {
        match self {
            Self::Raw(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Self::Lines(lines) => lines
                .iter()
                .map(|line| String::from_utf8_lossy(line))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

fn split_line_slices(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let pieces = if bytes.is_empty() { None } else { Some(body.split(|&b| b == b'\n')) };
    pieces
        .into_iter()
        .flatten()
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}

fn split_lines(bytes: &[u8]) -> Vec<Vec<u8>> {
    split_line_slices(bytes).map(<[u8]>::to_vec).collect()
}

// ============================================================================
// ExecOutput
// ============================================================================

/// Result of one invocation that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit status; `-signal` when the child was killed by a signal.
    pub exit_code: i32,
    /// Terminating signal, if any.
    pub signal: Option<i32>,
    pub stdout: Captured,
    pub stderr: Captured,
    /// Wall-clock time from spawn to reap.
    pub elapsed: Duration,
}

impl ExecOutput {
    /// Check if the process exited successfully (exit code 0).
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into [`CommandFailed`] for callers that treat
    /// it as an error.
    pub fn check(self, cmd: &CommandSpec) -> Result<Self, CommandFailed> {
        if self.success() {
            return Ok(self);
        }
        Err(CommandFailed {
            command: cmd.display(),
            exit_code: self.exit_code,
            stdout: self.stdout.to_string_lossy(),
            stderr: self.stderr.to_string_lossy(),
        })
    }
}

// ============================================================================
// ProcessRunner Trait
// ============================================================================

/// Trait for process execution.
///
/// Implementations MUST use argv-style APIs only (no shell string
/// evaluation) and MUST keep every stream of the child moving: input is
/// written while both outputs are drained, so no payload or output size
/// can deadlock the call.
///
/// # Threading
///
/// `ProcessRunner` is a synchronous interface: `run` returns once the
/// child has been reaped and all output captured, or the deadline in
/// [`ExecOptions::timeout`] expired. Runners hold no per-invocation state,
/// so one instance can be shared by any number of threads.
///
/// # Example
///
/// ```rust
/// use cmdrun_runner::{Captured, CommandSpec, ExecError, ExecOptions, ExecOutput, ProcessRunner};
/// use std::time::Duration;
///
/// struct EchoRunner;
///
/// impl ProcessRunner for EchoRunner {
///     fn run(&self, cmd: &CommandSpec, opts: &ExecOptions) -> Result<ExecOutput, ExecError> {
///         let text = cmd.args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" ");
///         Ok(ExecOutput {
///             exit_code: 0,
///             signal: None,
///             stdout: Captured::from_bytes(format!("{text}\n").into_bytes(), opts.raw),
///             stderr: Captured::from_bytes(Vec::new(), opts.raw),
///             elapsed: Duration::ZERO,
///         })
///     }
/// }
///
/// let out = EchoRunner
///     .run(&CommandSpec::new("echo").arg("hello"), &ExecOptions::new())
///     .unwrap();
/// assert_eq!(out.stdout.lines(), vec![b"hello".as_slice()]);
/// ```
pub trait ProcessRunner: Send + Sync {
    /// Execute a command to completion.
    ///
    /// # Returns
    ///
    /// * `Ok(ExecOutput)` - The process completed (possibly with non-zero exit code)
    /// * `Err(ExecError::Spawn)` - The program could not be launched
    /// * `Err(ExecError::Timeout)` - The deadline expired and the child was killed
    /// * `Err(ExecError::Io)` - A pipe failed mid-execution; partial output attached
    fn run(&self, cmd: &CommandSpec, opts: &ExecOptions) -> Result<ExecOutput, ExecError>;
}

impl<R: ProcessRunner + ?Sized> ProcessRunner for &R {
    fn run(&self, cmd: &CommandSpec, opts: &ExecOptions) -> Result<ExecOutput, ExecError> {
        (**self).run(cmd, opts)
    }
}

impl<R: ProcessRunner + ?Sized> ProcessRunner for std::sync::Arc<R> {
    fn run(&self, cmd: &CommandSpec, opts: &ExecOptions) -> Result<ExecOutput, ExecError> {
        (**self).run(cmd, opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(exit_code: i32, stdout: &[u8], stderr: &[u8]) -> ExecOutput {
        ExecOutput {
            exit_code,
            signal: None,
            stdout: Captured::from_bytes(stdout.to_vec(), true),
            stderr: Captured::from_bytes(stderr.to_vec(), true),
            elapsed: Duration::ZERO,
        }
    }

    // ============================================================================
    // Captured Tests
    // ============================================================================

    #[test]
    fn test_captured_lines_split() {
        let captured = Captured::from_bytes(b"one\ntwo\r\nthree\n".to_vec(), false);
        assert_eq!(
            captured,
            Captured::Lines(vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()])
        );
        assert_eq!(captured.len(), 11);
    }

    #[test]
    fn test_captured_lines_without_trailing_newline() {
        let captured = Captured::from_bytes(b"a\nb".to_vec(), false);
        assert_eq!(captured.lines(), vec![b"a".as_slice(), b"b".as_slice()]);
    }

    #[test]
    fn test_captured_lines_keep_inner_empty_lines() {
        let captured = Captured::from_bytes(b"a\n\nb\n".to_vec(), false);
        assert_eq!(
            captured.lines(),
            vec![b"a".as_slice(), b"".as_slice(), b"b".as_slice()]
        );
    }

    #[test]
    fn test_captured_empty() {
        assert!(Captured::from_bytes(Vec::new(), false).is_empty());
        assert!(Captured::from_bytes(Vec::new(), true).is_empty());
        assert_eq!(Captured::from_bytes(b"\n".to_vec(), false).lines(), vec![b"".as_slice()]);
    }

    #[test]
    fn test_captured_raw_keeps_bytes() {
        let bytes = vec![0u8; 4096];
        let captured = Captured::from_bytes(bytes.clone(), true);
        assert_eq!(captured.as_raw(), Some(bytes.as_slice()));
        assert_eq!(captured.len(), 4096);
        assert!(Captured::from_bytes(bytes, false).as_raw().is_none());
    }

    #[test]
    fn test_captured_lossy_utf8() {
        let invalid_utf8 = vec![0xff, 0xfe, 0x00, 0x01];
        let captured = Captured::from_bytes(invalid_utf8, true);
        assert!(!captured.to_string_lossy().is_empty());
    }

    #[test]
    fn test_captured_lines_to_string() {
        let captured = Captured::from_bytes(b"x\ny\n".to_vec(), false);
        assert_eq!(captured.to_string_lossy(), "x\ny");
    }

    // ============================================================================
    // ExecOutput Tests
    // ============================================================================

    #[test]
    fn test_exec_output_success() {
        assert!(output(0, b"", b"").success());
        assert!(!output(1, b"", b"").success());
        assert!(!output(-9, b"", b"").success());
    }

    #[test]
    fn test_exec_output_check() {
        let cmd = CommandSpec::new("taskset").args(["--pid", "1"]);
        assert!(output(0, b"ok", b"").check(&cmd).is_ok());

        let err = output(1, b"", b"failed to get pid 1's affinity").check(&cmd).unwrap_err();
        assert_eq!(err.command, "taskset --pid 1");
        assert_eq!(err.exit_code, 1);
        assert_eq!(err.stderr, "failed to get pid 1's affinity");
    }

    // ============================================================================
    // ProcessRunner Trait Tests
    // ============================================================================

    /// A mock implementation of ProcessRunner for testing
    struct MockRunner {
        expected_output: ExecOutput,
    }

    impl ProcessRunner for MockRunner {
        fn run(&self, _cmd: &CommandSpec, _opts: &ExecOptions) -> Result<ExecOutput, ExecError> {
            Ok(self.expected_output.clone())
        }
    }

    #[test]
    fn test_process_runner_trait_implementation() {
        let mock = MockRunner {
            expected_output: output(0, b"mock stdout", b"mock stderr"),
        };

        let cmd = CommandSpec::new("test").arg("--flag");
        let result = mock.run(&cmd, &ExecOptions::new()).unwrap();

        assert_eq!(result.stdout.to_string_lossy(), "mock stdout");
        assert_eq!(result.stderr.to_string_lossy(), "mock stderr");
        assert!(result.success());
    }

    #[test]
    fn test_process_runner_through_reference_and_arc() {
        fn run_with<R: ProcessRunner>(runner: R) -> ExecOutput {
            runner.run(&CommandSpec::new("x"), &ExecOptions::new()).unwrap()
        }

        let mock = MockRunner {
            expected_output: output(3, b"", b""),
        };
        assert_eq!(run_with(&mock).exit_code, 3);
        assert_eq!(run_with(std::sync::Arc::new(mock)).exit_code, 3);
    }

    #[test]
    fn test_process_runner_with_timeout_error() {
        struct TimeoutRunner;

        impl ProcessRunner for TimeoutRunner {
            fn run(&self, cmd: &CommandSpec, opts: &ExecOptions) -> Result<ExecOutput, ExecError> {
                Err(ExecError::Timeout {
                    command: cmd.display(),
                    timeout: opts.timeout.unwrap_or_default(),
                    partial: None,
                })
            }
        }

        let opts = ExecOptions::new().timeout(Duration::from_secs(60));
        match TimeoutRunner.run(&CommandSpec::new("sleep").arg("100"), &opts) {
            Err(ExecError::Timeout { timeout, command, .. }) => {
                assert_eq!(timeout, Duration::from_secs(60));
                assert_eq!(command, "sleep 100");
            }
            other => panic!("Expected Timeout error, got {other:?}"),
        }
    }
}
