//! Bookkeeping shared by the thread and async runners: preparing the
//! command line, collecting pipe results and turning them into an
//! [`ExecOutput`] or an [`ExecError`].

use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use tracing::{debug, warn};

use crate::affinity;
use crate::command_spec::CommandSpec;
use crate::error::{ExecError, PartialOutput, StreamKind};
use crate::options::{ExecOptions, ExtTools, TimeoutPolicy};
use crate::platform::{self, ChildSetup};
use crate::process::{Captured, ExecOutput};

/// Bytes of stderr included in completion log events.
const LOG_EXCERPT_BYTES: usize = 256;

pub(crate) struct Invocation<'a> {
    pub(crate) spec: CommandSpec,
    pub(crate) setup: ChildSetup,
    pub(crate) command: String,
    opts: &'a ExecOptions,
}

impl<'a> Invocation<'a> {
    pub(crate) fn prepare(
        cmd: &CommandSpec,
        opts: &'a ExecOptions,
        tools: &ExtTools,
    ) -> Result<Self, ExecError> {
        if cmd.program.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        opts.validate()?;

        let cpus = if opts.reset_cpu_affinity {
            Some(affinity::online_cpus()?)
        } else {
            None
        };
        let setup = ChildSetup::new(opts.setsid, cpus.as_ref()).map_err(|e| {
            ExecError::InvalidOptions {
                reason: format!("CPU set not representable: {e}"),
            }
        })?;

        let spec = opts.wrap(cmd, tools);
        let command = spec.display();
        Ok(Self {
            spec,
            setup,
            command,
            opts,
        })
    }

    pub(crate) fn log_start(&self) {
        debug!(
            command = %self.command,
            stdin_bytes = self.opts.data.as_ref().map_or(0, |d| d.len()),
            setsid = self.opts.setsid,
            timeout_ms = self.opts.timeout.map(|t| t.as_millis()),
            "Executing command"
        );
    }

    pub(crate) fn spawn_error(&self, source: io::Error) -> ExecError {
        debug!(command = %self.command, error = %source, "Failed to spawn command");
        ExecError::Spawn {
            program: self.spec.program.to_string_lossy().into_owned(),
            source,
        }
    }

    pub(crate) fn wait_error(&self, source: io::Error) -> ExecError {
        ExecError::Wait {
            command: self.command.clone(),
            source,
        }
    }

    pub(crate) fn timeout_error(
        &self,
        pipes: PipeSet,
        status: Option<io::Result<ExitStatus>>,
    ) -> ExecError {
        let timeout = self.opts.timeout.unwrap_or_default();
        warn!(
            command = %self.command,
            timeout_ms = timeout.as_millis(),
            stdout_bytes = pipes.stdout.len(),
            stderr_bytes = pipes.stderr.len(),
            "Command timed out, process group killed"
        );
        let exit_code = status.and_then(Result::ok).map(|s| platform::decode_status(s).0);
        let partial = match self.opts.on_timeout {
            TimeoutPolicy::Discard => None,
            TimeoutPolicy::KeepPartial => Some(Box::new(pipes.into_partial(exit_code))),
        };
        ExecError::Timeout {
            command: self.command.clone(),
            timeout,
            partial,
        }
    }

    /// Assemble the final result once the child has been reaped.
    pub(crate) fn complete(
        &self,
        pipes: PipeSet,
        status: ExitStatus,
        elapsed: Duration,
    ) -> Result<ExecOutput, ExecError> {
        let (exit_code, signal) = platform::decode_status(status);

        if let Some((stream, source)) = pipes.error {
            warn!(
                command = %self.command,
                stream = %stream,
                exit_code,
                error = %source,
                "I/O error while communicating with command"
            );
            return Err(ExecError::Io {
                command: self.command.clone(),
                stream,
                source,
                partial: Box::new(PartialOutput {
                    stdout: pipes.stdout,
                    stderr: pipes.stderr,
                    exit_code: Some(exit_code),
                }),
            });
        }

        let elapsed_ms = elapsed.as_millis();
        let excerpt = excerpt(&pipes.stderr);
        if exit_code == 0 {
            debug!(command = %self.command, elapsed_ms, stderr = %excerpt, "SUCCESS");
        } else {
            debug!(command = %self.command, exit_code, elapsed_ms, stderr = %excerpt, "FAILED");
        }

        Ok(ExecOutput {
            exit_code,
            signal,
            stdout: Captured::from_bytes(pipes.stdout, self.opts.raw),
            stderr: Captured::from_bytes(pipes.stderr, self.opts.raw),
            elapsed,
        })
    }
}

fn excerpt(bytes: &[u8]) -> String {
    let end = bytes.len().min(LOG_EXCERPT_BYTES);
    let mut text = String::from_utf8_lossy(&bytes[..end]).into_owned();
    if end < bytes.len() {
        text.push_str("...");
    }
    text
}

/// Output collected from the child's pipes. Only the first I/O error is
/// reported to the caller, later ones are logged.
#[derive(Debug, Default)]
pub(crate) struct PipeSet {
    pub(crate) stdout: Vec<u8>,
    pub(crate) stderr: Vec<u8>,
    pub(crate) error: Option<(StreamKind, io::Error)>,
}

impl PipeSet {
    pub(crate) fn record(&mut self, kind: StreamKind, bytes: Vec<u8>, error: Option<io::Error>) {
        match kind {
            StreamKind::Stdout => self.stdout = bytes,
            StreamKind::Stderr => self.stderr = bytes,
            StreamKind::Stdin => {}
        }
        if let Some(error) = error {
            self.fail(kind, error);
        }
    }

    pub(crate) fn fail(&mut self, kind: StreamKind, error: io::Error) {
        if let Some((first, _)) = &self.error {
            warn!(stream = %kind, first = %first, error = %error, "Additional pipe error");
            return;
        }
        self.error = Some((kind, error));
    }

    pub(crate) fn into_partial(self, exit_code: Option<i32>) -> PartialOutput {
        PartialOutput {
            stdout: self.stdout,
            stderr: self.stderr,
            exit_code,
        }
    }
}
