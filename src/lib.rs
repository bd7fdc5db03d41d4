//! cmdrun - run external commands without pipe deadlocks
//!
//! A call spawns one child with an argv (never a shell string), optionally
//! lowers its CPU and IO priority, moves it into a new session or runs it
//! through `sudo`, feeds it an input payload and returns its exit code
//! with the complete stdout and stderr. Input writing and output draining
//! progress independently, so any combination of payload and output size
//! completes.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cmdrun::{ExecOptions, IoClass, exec_cmd};
//!
//! let out = exec_cmd(
//!     ["dd", "of=/dev/null", "bs=4096", "count=16"],
//!     &ExecOptions::new()
//!         .nice(10)
//!         .ioclass(IoClass::Idle, None)
//!         .data(vec![b'x'; 4096 * 16]),
//! )?;
//! assert_eq!(out.exit_code, 0);
//! # Ok::<(), cmdrun::ExecError>(())
//! ```
//!
//! A non-zero exit is reported in [`ExecOutput::exit_code`], not as an
//! error; use [`ExecOutput::check`] when it should be one.
//!
//! # Crates
//!
//! - [`cmdrun_runner`]: [`ProcessRunner`], [`NativeRunner`] and [`TokioRunner`]
//! - [`cmdrun_taskset`]: CPU affinity through `taskset`
//! - [`cmdrun_utils`]: tracing setup and the [`WorkerGroup`] harness

use tracing::trace;

pub use cmdrun_runner::{
    Captured, CommandFailed, CommandSpec, ExecError, ExecOptions, ExecOutput, ExtTools, IoClass,
    NativeRunner, PartialOutput, ProcessRunner, StreamKind, TimeoutPolicy, TokioRunner,
};
pub use cmdrun_taskset::{Taskset, TasksetError, cpulist_parse, online_cpus, pick_cpu};
pub use cmdrun_utils::{WorkerError, WorkerFailures, WorkerGroup, init_tracing};

#[doc(hidden)]
pub use cmdrun_runner as runner;
#[doc(hidden)]
pub use cmdrun_taskset as taskset;
#[doc(hidden)]
pub use cmdrun_utils as utils;

/// Run `argv` to completion with the native runner.
///
/// `argv[0]` is the program, looked up through `PATH` when it has no
/// slash. Any sequence of string-like items works: arrays, `Vec`s,
/// slices or lazy iterators.
///
/// # Errors
///
/// - [`ExecError::EmptyCommand`] when `argv` is empty
/// - [`ExecError::InvalidOptions`] when `opts` do not validate
/// - [`ExecError::Spawn`] when the program cannot be launched
/// - [`ExecError::Timeout`] when [`ExecOptions::timeout`] expires
/// - [`ExecError::Io`] when a pipe fails; partial output is attached
pub fn exec_cmd<I, S>(argv: I, opts: &ExecOptions) -> Result<ExecOutput, ExecError>
where
    I: IntoIterator<Item = S>,
    S: Into<std::ffi::OsString>,
{
    let cmd = CommandSpec::from_argv(argv)?;
    trace!(command = %cmd.display(), "exec_cmd");
    NativeRunner::new().run(&cmd, opts)
}
