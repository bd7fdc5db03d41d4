//! Run the same job from many threads at once and surface every failure
//! to the orchestrating thread.
//!
//! Each worker runs its job a fixed number of times with a pause between
//! calls. All workers are held at a start gate until every thread is
//! up, so the calls really overlap. A worker stops at its first error or
//! panic; the failure is kept and reported once all workers are joined.

use std::any::Any;
use std::fmt;
use std::io;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a single worker stopped early.
#[derive(Error, Debug)]
pub enum WorkerError<E> {
    #[error("call {call} failed: {error}")]
    Failed { call: usize, error: E },

    #[error("worker panicked: {message}")]
    Panicked { message: String },

    #[error("worker thread could not be started: {source}")]
    Spawn {
        #[source]
        source: io::Error,
    },
}

/// Every worker that failed, in worker order.
#[derive(Debug)]
pub struct WorkerFailures<E> {
    failures: Vec<(usize, WorkerError<E>)>,
    workers: usize,
}

impl<E> WorkerFailures<E> {
    /// The failure of the lowest-numbered failing worker.
    #[must_use]
    pub fn first(&self) -> &(usize, WorkerError<E>) {
        &self.failures[0]
    }

    #[must_use]
    pub fn failures(&self) -> &[(usize, WorkerError<E>)] {
        &self.failures
    }

    #[must_use]
    pub fn into_failures(self) -> Vec<(usize, WorkerError<E>)> {
        self.failures
    }
}

impl<E: fmt::Display> fmt::Display for WorkerFailures<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (worker, error) = self.first();
        write!(
            f,
            "{} of {} workers failed; worker {worker}: {error}",
            self.failures.len(),
            self.workers
        )
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for WorkerFailures<E> {}

/// A fixed-size group of workers repeatedly calling one job.
#[derive(Debug, Clone, Copy)]
pub struct WorkerGroup {
    workers: usize,
    calls: usize,
    delay: Duration,
    stack_size: Option<usize>,
}

impl WorkerGroup {
    /// `workers` threads, each calling the job `calls` times back to back.
    #[must_use]
    pub const fn new(workers: usize, calls: usize) -> Self {
        Self {
            workers,
            calls,
            delay: Duration::ZERO,
            stack_size: None,
        }
    }

    /// Pause after every call.
    #[must_use]
    pub const fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Stack size of each worker thread, in bytes.
    #[must_use]
    pub const fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Run `job(worker_index)` on every worker and wait for all of them.
    ///
    /// # Errors
    ///
    /// Returns every failed or panicked worker; successful workers are
    /// never cut short by another worker's failure. If a worker thread
    /// cannot be created, no job runs and the spawn error is returned.
    pub fn run<F, E>(&self, job: F) -> Result<(), WorkerFailures<E>>
    where
        F: Fn(usize) -> Result<(), E> + Sync,
        E: Send,
    {
        // Held for writing while threads are spawned; workers block on a
        // read until it is released, so they all start together. If a spawn
        // fails the group is aborted and released workers return at once.
        let gate = RwLock::new(());
        let aborted = AtomicBool::new(false);
        let job = &job;
        let (gate, aborted_ref) = (&gate, &aborted);

        let mut failures = Vec::new();
        thread::scope(|scope| {
            let held = gate.write();
            let mut handles = Vec::with_capacity(self.workers);
            for worker in 0..self.workers {
                let mut builder = thread::Builder::new().name(format!("worker-{worker}"));
                if let Some(bytes) = self.stack_size {
                    builder = builder.stack_size(bytes);
                }
                let spawned = builder.spawn_scoped(scope, move || {
                    drop(gate.read());
                    if aborted_ref.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                    self.work(worker, job)
                });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(source) => {
                        warn!(worker, error = %source, "Failed to spawn worker thread");
                        aborted_ref.store(true, Ordering::SeqCst);
                        failures.push((worker, WorkerError::Spawn { source }));
                        break;
                    }
                }
            }
            drop(held);

            for (worker, handle) in handles.into_iter().enumerate() {
                let outcome = match handle.join() {
                    Ok(outcome) => outcome,
                    Err(payload) => Err(WorkerError::Panicked {
                        message: panic_message(payload.as_ref()),
                    }),
                };
                if let Err(error) = outcome {
                    failures.push((worker, error));
                }
            }
        });
        failures.sort_by_key(|(worker, _)| *worker);

        if failures.is_empty() {
            debug!(workers = self.workers, calls = self.calls, "All workers completed");
            return Ok(());
        }
        warn!(failed = failures.len(), workers = self.workers, "Workers failed");
        Err(WorkerFailures {
            failures,
            workers: self.workers,
        })
    }

    fn work<F, E>(&self, worker: usize, job: &F) -> Result<(), WorkerError<E>>
    where
        F: Fn(usize) -> Result<(), E>,
    {
        for call in 0..self.calls {
            job(worker).map_err(|error| WorkerError::Failed { call, error })?;
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
