//! Error types for process execution

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::affinity::AffinityError;

/// The pipe an I/O failure happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stdin => "stdin",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output collected before an invocation failed.
///
/// `exit_code` is `None` when the child had not been reaped yet, for
/// example because the deadline expired first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
}

/// Execution errors.
///
/// A non-zero exit status is not an error: it is reported through
/// [`ExecOutput::exit_code`](crate::ExecOutput::exit_code).
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Empty command: argv must contain at least the program")]
    EmptyCommand,

    #[error("Invalid execution options: {reason}")]
    InvalidOptions { reason: String },

    #[error("Failed to spawn process '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to compute CPU affinity: {0}")]
    Affinity(#[from] AffinityError),

    #[error("Execution of '{command}' timed out after {timeout:?}")]
    Timeout {
        command: String,
        timeout: Duration,
        /// Present only with [`TimeoutPolicy::KeepPartial`](crate::TimeoutPolicy::KeepPartial).
        partial: Option<Box<PartialOutput>>,
    },

    #[error("I/O error on {stream} of '{command}': {source}")]
    Io {
        command: String,
        stream: StreamKind,
        #[source]
        source: io::Error,
        partial: Box<PartialOutput>,
    },

    #[error("Failed to wait for '{command}': {source}")]
    Wait {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl ExecError {
    /// Output captured before the failure, if any was kept.
    #[must_use]
    pub fn partial(&self) -> Option<&PartialOutput> {
        match self {
            Self::Timeout { partial, .. } => partial.as_deref(),
            Self::Io { partial, .. } => Some(partial),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// A command ran to completion but exited with a non-zero status.
///
/// Produced by [`ExecOutput::check`](crate::ExecOutput::check) for callers
/// that treat failure exit codes as errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Command '{command}' failed with exit code {exit_code}: {stderr}")]
pub struct CommandFailed {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}
