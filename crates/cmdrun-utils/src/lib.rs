//! Shared helpers for cmdrun: tracing setup and a concurrent worker
//! harness used to stress the runners.

pub mod logging;
pub mod worker;

pub use logging::{init_test_tracing, init_tracing};
pub use worker::{WorkerError, WorkerFailures, WorkerGroup};
