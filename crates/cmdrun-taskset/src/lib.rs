//! Query and change the CPU affinity of running processes with `taskset`.
//!
//! All threads of a process are assumed to share one affinity; [`Taskset::get`]
//! reports the affinity of the main thread.

use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

use cmdrun_runner::affinity::{AffinityError, cpulist_format};
use cmdrun_runner::{CommandFailed, CommandSpec, ExecError, ExecOptions, NativeRunner, ProcessRunner};

pub use cmdrun_runner::affinity::{cpulist_parse, online_cpus};

#[derive(Error, Debug)]
pub enum TasksetError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Failed(#[from] CommandFailed),

    #[error(transparent)]
    Affinity(#[from] AffinityError),

    #[error("Unexpected taskset output: '{output}'")]
    UnexpectedOutput { output: String },

    #[error("Refusing to set an empty CPU set")]
    EmptyCpuSet,
}

/// `taskset` front-end bound to a [`ProcessRunner`].
#[derive(Debug, Clone)]
pub struct Taskset<R> {
    runner: R,
    program: PathBuf,
}

impl Taskset<NativeRunner> {
    /// Use the `taskset` path configured on the runner.
    #[must_use]
    pub fn native(runner: NativeRunner) -> Self {
        let program = runner.tools().taskset.clone();
        Self { runner, program }
    }
}

impl<R: ProcessRunner> Taskset<R> {
    #[must_use]
    pub fn new(runner: R) -> Self {
        Self::with_program(runner, "taskset")
    }

    #[must_use]
    pub fn with_program(runner: R, program: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    /// CPUs the process `pid` may run on.
    pub fn get(&self, pid: u32) -> Result<BTreeSet<usize>, TasksetError> {
        let cmd = CommandSpec::new(&self.program).args(["--pid".to_string(), pid.to_string()]);
        let output = self.execute(&cmd)?;
        let lines = output.stdout.lines();
        let last = lines.last().ok_or_else(|| TasksetError::UnexpectedOutput {
            output: String::new(),
        })?;
        parse_affinity_line(&String::from_utf8_lossy(last))
    }

    /// Restrict `pid` to `cpus`; with `all_tasks` every thread of the
    /// process is updated, not only the main one.
    pub fn set(&self, pid: u32, cpus: &BTreeSet<usize>, all_tasks: bool) -> Result<(), TasksetError> {
        if cpus.is_empty() {
            return Err(TasksetError::EmptyCpuSet);
        }
        let mut cmd = CommandSpec::new(&self.program);
        if all_tasks {
            cmd = cmd.arg("--all-tasks");
        }
        let cmd = cmd.args([
            "--pid".to_string(),
            "--cpu-list".to_string(),
            cpulist_format(cpus),
            pid.to_string(),
        ]);
        self.execute(&cmd)?;
        debug!(pid, cpus = %cpulist_format(cpus), all_tasks, "CPU affinity updated");
        Ok(())
    }

    fn execute(&self, cmd: &CommandSpec) -> Result<cmdrun_runner::ExecOutput, TasksetError> {
        // taskset must see the caller's real affinity, never a reset one.
        let opts = ExecOptions::new().reset_cpu_affinity(false);
        Ok(self.runner.run(cmd, &opts)?.check(cmd)?)
    }
}

/// Parse `pid 42's current affinity mask: f` into the set of CPUs whose
/// bit is set in the hexadecimal mask.
pub fn parse_affinity_line(line: &str) -> Result<BTreeSet<usize>, TasksetError> {
    let unexpected = || TasksetError::UnexpectedOutput {
        output: line.to_string(),
    };
    let (_, mask) = line.rsplit_once(':').ok_or_else(unexpected)?;
    let digits: Vec<u32> = mask
        .trim()
        .chars()
        .filter(|&c| c != ',')
        .map(|c| c.to_digit(16))
        .collect::<Option<_>>()
        .ok_or_else(unexpected)?;
    if digits.is_empty() {
        return Err(unexpected());
    }

    let mut cpus = BTreeSet::new();
    for (nibble_index, digit) in digits.iter().rev().enumerate() {
        for bit in 0..4 {
            if digit & (1 << bit) != 0 {
                cpus.insert(nibble_index * 4 + bit);
            }
        }
    }
    Ok(cpus)
}

/// Choose the CPU to pin to: the second lowest when there are at least
/// two, leaving CPU 0 to the rest of the system, else the only one.
#[must_use]
pub fn pick_cpu(cpus: &BTreeSet<usize>) -> Option<usize> {
    cpus.iter().take(2).last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdrun_runner::{Captured, ExecOutput};
    use std::sync::Mutex;
    use std::time::Duration;

    fn set(items: &[usize]) -> BTreeSet<usize> {
        items.iter().copied().collect()
    }

    /// Records the commands it is asked to run and replays a canned result.
    struct RecordingRunner {
        exit_code: i32,
        stdout: &'static [u8],
        stderr: &'static [u8],
        seen: Mutex<Vec<String>>,
    }

    impl RecordingRunner {
        fn new(exit_code: i32, stdout: &'static [u8], stderr: &'static [u8]) -> Self {
            Self {
                exit_code,
                stdout,
                stderr,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl ProcessRunner for RecordingRunner {
        fn run(&self, cmd: &CommandSpec, opts: &ExecOptions) -> Result<ExecOutput, ExecError> {
            assert!(!opts.reset_cpu_affinity);
            self.seen.lock().unwrap().push(cmd.display());
            Ok(ExecOutput {
                exit_code: self.exit_code,
                signal: None,
                stdout: Captured::from_bytes(self.stdout.to_vec(), opts.raw),
                stderr: Captured::from_bytes(self.stderr.to_vec(), opts.raw),
                elapsed: Duration::ZERO,
            })
        }
    }

    #[test]
    fn test_parse_affinity_line() {
        assert_eq!(
            parse_affinity_line("pid 1234's current affinity mask: f").unwrap(),
            set(&[0, 1, 2, 3])
        );
        assert_eq!(
            parse_affinity_line("pid 1's current affinity mask: 5").unwrap(),
            set(&[0, 2])
        );
        assert_eq!(
            parse_affinity_line("pid 1's current affinity mask: 100000000000000000").unwrap(),
            set(&[68])
        );
    }

    #[test]
    fn test_parse_affinity_line_rejects_garbage() {
        assert!(parse_affinity_line("no mask here").is_err());
        assert!(parse_affinity_line("pid 1's current affinity mask: xyz").is_err());
        assert!(parse_affinity_line("pid 1's current affinity mask: ").is_err());
    }

    #[test]
    fn test_get_uses_last_output_line() {
        let runner = RecordingRunner::new(
            0,
            b"warning: something\npid 77's current affinity mask: 3\n",
            b"",
        );
        let taskset = Taskset::new(&runner);
        assert_eq!(taskset.get(77).unwrap(), set(&[0, 1]));
        assert_eq!(runner.seen.lock().unwrap().as_slice(), ["taskset --pid 77"]);
    }

    #[test]
    fn test_get_failure_carries_command_and_stderr() {
        let runner = RecordingRunner::new(1, b"", b"taskset: failed to get pid 99999's affinity\n");
        let err = Taskset::with_program(&runner, "/usr/bin/taskset").get(99999).unwrap_err();
        match err {
            TasksetError::Failed(failed) => {
                assert_eq!(failed.exit_code, 1);
                assert_eq!(failed.command, "/usr/bin/taskset --pid 99999");
                assert!(failed.stderr.contains("failed to get pid"));
            }
            other => panic!("Expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn test_set_builds_cpu_list() {
        let runner = RecordingRunner::new(0, b"", b"");
        let taskset = Taskset::new(&runner);
        taskset.set(42, &set(&[0, 2, 3]), false).unwrap();
        taskset.set(42, &set(&[1]), true).unwrap();
        assert_eq!(
            runner.seen.lock().unwrap().as_slice(),
            [
                "taskset --pid --cpu-list 0,2,3 42",
                "taskset --all-tasks --pid --cpu-list 1 42",
            ]
        );
    }

    #[test]
    fn test_set_rejects_empty() {
        let runner = RecordingRunner::new(0, b"", b"");
        assert!(matches!(
            Taskset::new(&runner).set(1, &BTreeSet::new(), false),
            Err(TasksetError::EmptyCpuSet)
        ));
        assert!(runner.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_pick_cpu() {
        assert_eq!(pick_cpu(&set(&[])), None);
        assert_eq!(pick_cpu(&set(&[3])), Some(3));
        assert_eq!(pick_cpu(&set(&[0, 1, 2, 3])), Some(1));
        assert_eq!(pick_cpu(&set(&[5, 2, 9])), Some(5));
    }

    #[test]
    fn test_native_taskset_uses_configured_path() {
        let tools = cmdrun_runner::ExtTools {
            taskset: PathBuf::from("/sbin/taskset"),
            ..cmdrun_runner::ExtTools::default()
        };
        let taskset = Taskset::native(NativeRunner::with_tools(tools));
        assert_eq!(taskset.program, PathBuf::from("/sbin/taskset"));
    }
}
