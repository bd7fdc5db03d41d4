//! External process execution without pipe deadlocks.
//!
//! A runner spawns one child per call, writes an optional payload to its
//! stdin while draining stdout and stderr concurrently, waits for it to
//! exit and returns the exit status with the complete captured output.
//! Priority (`nice`, `ionice`), session (`setsid`), privilege (`sudo`) and
//! CPU affinity adjustments are applied per call through [`ExecOptions`].
//!
//! # Security Model
//!
//! All process execution goes through [`CommandSpec`] to ensure argv-style invocation.
//! Arguments are passed as discrete elements rather than shell strings.

#[cfg(not(unix))]
compile_error!("cmdrun-runner supports Unix platforms only");

pub mod affinity;
pub mod command_spec;
pub mod error;
mod invocation;
pub mod native;
pub mod options;
mod platform;
pub mod process;
pub mod tokio_runner;

pub use command_spec::CommandSpec;
pub use error::{CommandFailed, ExecError, PartialOutput, StreamKind};
pub use native::NativeRunner;
pub use options::{ExecOptions, ExtTools, IoClass, TimeoutPolicy};
pub use process::{Captured, ExecOutput, ProcessRunner};
pub use tokio_runner::TokioRunner;
