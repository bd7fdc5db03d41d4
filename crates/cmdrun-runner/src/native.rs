use std::io::{self, Read, Write};
use std::process::{Child, ChildStdin, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{ExecError, StreamKind};
use crate::invocation::{Invocation, PipeSet};
use crate::options::{ExecOptions, ExtTools};
use crate::platform;

use super::{CommandSpec, ExecOutput, ProcessRunner};

/// How long to keep collecting output after a timed-out child was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Upper bound on the sleep between exit polls while a deadline is armed.
const MAX_WAIT_POLL: Duration = Duration::from_millis(50);

// ============================================================================
// NativeRunner - thread-based process execution
// ============================================================================

/// Native process runner using `std::process::Command`.
///
/// Every invocation gets three dedicated pipe workers: one thread writes
/// [`ExecOptions::data`] to stdin and closes it, two threads drain stdout
/// and stderr to end-of-stream. The calling thread only waits for their
/// results, enforces the deadline and reaps the child, so input and output
/// sizes never block each other.
///
/// # Threading
///
/// `NativeRunner` is a synchronous interface and holds no per-invocation
/// state; share one instance between threads freely.
///
/// # Example
///
/// ```rust,no_run
/// use cmdrun_runner::{CommandSpec, ExecOptions, NativeRunner, ProcessRunner};
///
/// let runner = NativeRunner::new();
/// let cmd = CommandSpec::new("echo").arg("hello world");
///
/// let output = runner.run(&cmd, &ExecOptions::new()).unwrap();
/// assert!(output.success());
/// assert_eq!(output.stdout.lines(), vec![b"hello world".as_slice()]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct NativeRunner {
    tools: ExtTools,
}

impl NativeRunner {
    /// Create a new `NativeRunner` resolving helper programs through `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a `NativeRunner` using the given helper program paths.
    #[must_use]
    pub const fn with_tools(tools: ExtTools) -> Self {
        Self { tools }
    }

    #[must_use]
    pub const fn tools(&self) -> &ExtTools {
        &self.tools
    }
}

impl ProcessRunner for NativeRunner {
    fn run(&self, cmd: &CommandSpec, opts: &ExecOptions) -> Result<ExecOutput, ExecError> {
        let invocation = Invocation::prepare(cmd, opts, &self.tools)?;

        let mut command = invocation.spec.to_command();
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        invocation.setup.install(&mut command);

        invocation.log_start();
        let started = Instant::now();
        let deadline = opts.timeout.map(|timeout| started + timeout);

        let child = command
            .spawn()
            .map_err(|source| invocation.spawn_error(source))?;
        let mut child = ChildGuard::new(child);

        let (tx, rx) = mpsc::channel();
        let workers = child
            .start_workers(opts.data.clone(), &tx)
            .map_err(|(stream, source)| {
                let mut pipes = PipeSet::default();
                pipes.fail(stream, source);
                // The guard kills the group on return, which lets any
                // worker that did start run into end-of-stream.
                invocation_io_error(&invocation, pipes)
            })?;
        drop(tx);

        let mut pipes = PipeSet::default();
        let mut pending = workers.len();
        while pending > 0 {
            let received = match deadline {
                Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(outcome) => {
                    pending -= 1;
                    pipes.record(outcome.kind, outcome.bytes, outcome.error);
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(expire(&invocation, child, rx, pipes, workers));
                }
                // A worker died without reporting; its join below says which.
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for (kind, handle) in workers {
            if handle.join().is_err() {
                pipes.fail(kind, io::Error::other(format!("{kind} worker panicked")));
            }
        }

        let status = match deadline {
            Some(deadline) => match child.wait_until(deadline) {
                Ok(Some(status)) => status,
                Ok(None) => return Err(expire(&invocation, child, rx, pipes, Vec::new())),
                Err(source) => return Err(invocation.wait_error(source)),
            },
            None => child.wait().map_err(|source| invocation.wait_error(source))?,
        };

        invocation.complete(pipes, status, started.elapsed())
    }
}

fn invocation_io_error(invocation: &Invocation<'_>, pipes: PipeSet) -> ExecError {
    let (stream, source) = pipes
        .error
        .unwrap_or_else(|| (StreamKind::Stdout, io::Error::other("pipe setup failed")));
    ExecError::Io {
        command: invocation.command.clone(),
        stream,
        source,
        partial: Box::default(),
    }
}

/// Kill the timed-out child's process group, reap it and gather whatever
/// the pipe workers read before their pipes closed.
fn expire(
    invocation: &Invocation<'_>,
    mut child: ChildGuard,
    rx: Receiver<PipeOutcome>,
    mut pipes: PipeSet,
    workers: Vec<(StreamKind, JoinHandle<()>)>,
) -> ExecError {
    let status = child.kill_and_reap();

    let grace_end = Instant::now() + DRAIN_GRACE;
    while let Ok(outcome) = rx.recv_timeout(grace_end.saturating_duration_since(Instant::now())) {
        pipes.record(outcome.kind, outcome.bytes, outcome.error);
    }
    // Workers still blocked here hold a pipe inherited by a process that
    // left the group; they exit once it closes.
    for (_, handle) in workers {
        if handle.is_finished() {
            let _ = handle.join();
        }
    }

    invocation.timeout_error(pipes, Some(status))
}

// ============================================================================
// Child ownership and pipe workers
// ============================================================================

/// Result reported by one pipe worker.
struct PipeOutcome {
    kind: StreamKind,
    bytes: Vec<u8>,
    error: Option<io::Error>,
}

/// Owns the child; kills its process group and reaps it on drop unless it
/// was already reaped.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    const fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    /// Start the stdout and stderr drains and, when there is a payload, the
    /// stdin writer. Without a payload stdin is closed right away.
    fn start_workers(
        &mut self,
        data: Option<Arc<[u8]>>,
        tx: &Sender<PipeOutcome>,
    ) -> Result<Vec<(StreamKind, JoinHandle<()>)>, (StreamKind, io::Error)> {
        let missing = |kind: StreamKind| (kind, io::Error::other(format!("{kind} was not captured")));

        let stdout = self.child.stdout.take().ok_or_else(|| missing(StreamKind::Stdout))?;
        let stderr = self.child.stderr.take().ok_or_else(|| missing(StreamKind::Stderr))?;
        let stdin = self.child.stdin.take().ok_or_else(|| missing(StreamKind::Stdin))?;

        let mut workers = Vec::with_capacity(3);
        workers.push(spawn_drain(StreamKind::Stdout, stdout, tx.clone())?);
        workers.push(spawn_drain(StreamKind::Stderr, stderr, tx.clone())?);
        match data {
            Some(data) => workers.push(spawn_writer(stdin, data, tx.clone())?),
            None => drop(stdin),
        }
        Ok(workers)
    }

    fn wait(&mut self) -> io::Result<ExitStatus> {
        let status = self.child.wait()?;
        self.reaped = true;
        Ok(status)
    }

    /// Poll for exit until `deadline`; `Ok(None)` means it is still running.
    fn wait_until(&mut self, deadline: Instant) -> io::Result<Option<ExitStatus>> {
        let mut poll = Duration::from_millis(1);
        loop {
            if let Some(status) = self.child.try_wait()? {
                self.reaped = true;
                return Ok(Some(status));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            thread::sleep(poll.min(remaining));
            poll = (poll * 2).min(MAX_WAIT_POLL);
        }
    }

    fn kill_and_reap(&mut self) -> io::Result<ExitStatus> {
        platform::kill_group(self.child.id());
        self.wait()
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            platform::kill_group(self.child.id());
            let _ = self.child.wait();
        }
    }
}

fn spawn_worker(
    kind: StreamKind,
    tx: Sender<PipeOutcome>,
    work: impl FnOnce() -> (Vec<u8>, Option<io::Error>) + Send + 'static,
) -> Result<(StreamKind, JoinHandle<()>), (StreamKind, io::Error)> {
    thread::Builder::new()
        .name(format!("cmdrun-{kind}"))
        .spawn(move || {
            let (bytes, error) = work();
            // The receiver is gone only if the caller already gave up.
            let _ = tx.send(PipeOutcome { kind, bytes, error });
        })
        .map(|handle| (kind, handle))
        .map_err(|e| (kind, e))
}

fn spawn_drain(
    kind: StreamKind,
    mut pipe: impl Read + Send + 'static,
    tx: Sender<PipeOutcome>,
) -> Result<(StreamKind, JoinHandle<()>), (StreamKind, io::Error)> {
    spawn_worker(kind, tx, move || {
        let mut bytes = Vec::new();
        // On error `read_to_end` leaves what was read so far in `bytes`.
        let error = pipe.read_to_end(&mut bytes).err();
        (bytes, error)
    })
}

fn spawn_writer(
    mut stdin: ChildStdin,
    data: Arc<[u8]>,
    tx: Sender<PipeOutcome>,
) -> Result<(StreamKind, JoinHandle<()>), (StreamKind, io::Error)> {
    spawn_worker(StreamKind::Stdin, tx, move || {
        let error = stdin.write_all(&data).and_then(|()| stdin.flush()).err();
        drop(stdin);
        (Vec::new(), error)
    })
}
