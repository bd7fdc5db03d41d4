use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::time::timeout;

use crate::error::{ExecError, StreamKind};
use crate::invocation::{Invocation, PipeSet};
use crate::options::{ExecOptions, ExtTools};
use crate::platform;

use super::{CommandSpec, ExecOutput};

/// How long to keep draining after a timed-out child was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Async process runner on top of `tokio::process`.
///
/// The stdin writer and both output drains are three futures joined on the
/// calling task, so they progress independently without extra threads.
/// Semantics match [`NativeRunner`](crate::NativeRunner).
#[derive(Debug, Clone, Default)]
pub struct TokioRunner {
    tools: ExtTools,
}

impl TokioRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_tools(tools: ExtTools) -> Self {
        Self { tools }
    }

    /// Execute a command to completion.
    ///
    /// Same contract as [`ProcessRunner::run`](crate::ProcessRunner::run).
    /// If the returned future is dropped early, the child is killed.
    pub async fn run_async(
        &self,
        cmd: &CommandSpec,
        opts: &ExecOptions,
    ) -> Result<ExecOutput, ExecError> {
        let invocation = Invocation::prepare(cmd, opts, &self.tools)?;

        let mut command = invocation.spec.to_tokio_command();
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        invocation.setup.install_tokio(&mut command);

        invocation.log_start();
        let started = Instant::now();

        let mut child = command
            .spawn()
            .map_err(|source| invocation.spawn_error(source))?;
        let pid = child.id();

        let stdin = child.stdin.take();
        let (Some(mut stdout_pipe), Some(mut stderr_pipe)) = (child.stdout.take(), child.stderr.take())
        else {
            if let Some(pid) = pid {
                platform::kill_group(pid);
            }
            let _ = child.wait().await;
            return Err(ExecError::Io {
                command: invocation.command.clone(),
                stream: StreamKind::Stdout,
                source: io::Error::other("child pipes were not captured"),
                partial: Box::default(),
            });
        };

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let finished = {
            let io = async {
                let (written, out, err) = tokio::join!(
                    write_stdin(stdin, opts.data.clone()),
                    stdout_pipe.read_to_end(&mut stdout),
                    stderr_pipe.read_to_end(&mut stderr),
                );
                let status = child.wait().await;
                (written.err(), out.err(), err.err(), status)
            };
            match opts.timeout {
                Some(limit) => timeout(limit, io).await.ok(),
                None => Some(io.await),
            }
        };

        let Some((write_err, out_err, err_err, status)) = finished else {
            let status = match pid {
                Some(pid) => {
                    platform::kill_group(pid);
                    Some(child.wait().await)
                }
                None => None,
            };
            let _ = timeout(DRAIN_GRACE, async {
                tokio::join!(
                    drain_rest(&mut stdout_pipe, &mut stdout),
                    drain_rest(&mut stderr_pipe, &mut stderr),
                )
            })
            .await;

            let mut pipes = PipeSet::default();
            pipes.record(StreamKind::Stdout, stdout, None);
            pipes.record(StreamKind::Stderr, stderr, None);
            return Err(invocation.timeout_error(pipes, status));
        };

        let status = status.map_err(|source| invocation.wait_error(source))?;

        let mut pipes = PipeSet::default();
        pipes.record(StreamKind::Stdin, Vec::new(), write_err);
        pipes.record(StreamKind::Stdout, stdout, out_err);
        pipes.record(StreamKind::Stderr, stderr, err_err);
        invocation.complete(pipes, status, started.elapsed())
    }
}

/// Write the payload and close stdin. Without a payload stdin is closed
/// immediately.
async fn write_stdin(stdin: Option<ChildStdin>, data: Option<Arc<[u8]>>) -> io::Result<()> {
    let (Some(mut stdin), Some(data)) = (stdin, data) else {
        return Ok(());
    };
    stdin.write_all(&data).await?;
    stdin.shutdown().await
}

async fn drain_rest<R>(pipe: &mut R, buf: &mut Vec<u8>)
where
    R: AsyncRead + Unpin,
{
    let _ = pipe.read_to_end(buf).await;
}
