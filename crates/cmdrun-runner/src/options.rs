//! Per-invocation execution options and the external helper tools they rely on.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::command_spec::CommandSpec;
use crate::error::ExecError;

/// Highest priority level accepted by `ionice -n`.
pub const MAX_IOCLASS_DATA: u8 = 7;

/// IO scheduling class, as understood by `ionice -c`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IoClass {
    None,
    Realtime,
    BestEffort,
    Idle,
}

impl IoClass {
    /// Numeric class passed to `ionice -c`.
    #[must_use]
    pub const fn as_number(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Realtime => 1,
            Self::BestEffort => 2,
            Self::Idle => 3,
        }
    }

    #[must_use]
    pub const fn from_number(class: u8) -> Option<Self> {
        match class {
            0 => Some(Self::None),
            1 => Some(Self::Realtime),
            2 => Some(Self::BestEffort),
            3 => Some(Self::Idle),
            _ => None,
        }
    }
}

/// What to do with output captured before a deadline expired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeoutPolicy {
    /// Drop everything and report only the timeout.
    #[default]
    Discard,
    /// Attach the bytes read so far to [`ExecError::Timeout`].
    KeepPartial,
}

/// Paths of the external helpers used to apply priority and privilege
/// adjustments.
///
/// The defaults are bare program names resolved through `PATH` when the
/// child is spawned. Embedding applications can deserialize this from
/// their own configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtTools {
    pub nice: PathBuf,
    pub ionice: PathBuf,
    pub sudo: PathBuf,
    pub taskset: PathBuf,
}

impl Default for ExtTools {
    fn default() -> Self {
        Self {
            nice: PathBuf::from("nice"),
            ionice: PathBuf::from("ionice"),
            sudo: PathBuf::from("sudo"),
            taskset: PathBuf::from("taskset"),
        }
    }
}

impl ExtTools {
    /// Resolve every helper to an absolute path with `which`, keeping the
    /// bare name for helpers that cannot be found.
    #[must_use]
    pub fn discover() -> Self {
        let resolve = |name: PathBuf| which::which(&name).unwrap_or(name);
        let defaults = Self::default();
        Self {
            nice: resolve(defaults.nice),
            ionice: resolve(defaults.ionice),
            sudo: resolve(defaults.sudo),
            taskset: resolve(defaults.taskset),
        }
    }
}

/// Options applied to a single invocation.
///
/// # Example
///
/// ```rust
/// use cmdrun_runner::{ExecOptions, IoClass};
/// use std::time::Duration;
///
/// let opts = ExecOptions::new()
///     .nice(7)
///     .ioclass(IoClass::BestEffort, Some(3))
///     .data(b"payload".to_vec())
///     .raw(true)
///     .timeout(Duration::from_secs(30));
///
/// assert_eq!(opts.nice, Some(7));
/// assert!(opts.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Niceness increment, applied like `nice -n`.
    pub nice: Option<i32>,
    pub ioclass: Option<IoClass>,
    /// Priority within `ioclass`, 0 (highest) to 7 (lowest).
    pub ioclassdata: Option<u8>,
    /// Start the child in a new session.
    pub setsid: bool,
    /// Run the child through `sudo -n`.
    pub sudo: bool,
    /// Allow the child on every online CPU even if the caller is pinned.
    pub reset_cpu_affinity: bool,
    /// Bytes written to the child's stdin before it is closed.
    pub data: Option<Arc<[u8]>>,
    /// Return raw buffers instead of line-split output.
    pub raw: bool,
    pub timeout: Option<Duration>,
    pub on_timeout: TimeoutPolicy,
}

impl ExecOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn nice(mut self, nice: i32) -> Self {
        self.nice = Some(nice);
        self
    }

    #[must_use]
    pub fn ioclass(mut self, class: IoClass, data: Option<u8>) -> Self {
        self.ioclass = Some(class);
        self.ioclassdata = data;
        self
    }

    #[must_use]
    pub fn setsid(mut self, setsid: bool) -> Self {
        self.setsid = setsid;
        self
    }

    #[must_use]
    pub fn sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    #[must_use]
    pub fn reset_cpu_affinity(mut self, reset: bool) -> Self {
        self.reset_cpu_affinity = reset;
        self
    }

    /// Set the stdin payload. Cloning the options shares the payload.
    #[must_use]
    pub fn data(mut self, data: impl Into<Arc<[u8]>>) -> Self {
        self.data = Some(data.into());
        self
    }

    #[must_use]
    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn on_timeout(mut self, policy: TimeoutPolicy) -> Self {
        self.on_timeout = policy;
        self
    }

    /// Check option combinations that would otherwise only fail inside the
    /// child.
    pub fn validate(&self) -> Result<(), ExecError> {
        if let Some(data) = self.ioclassdata {
            if self.ioclass.is_none() {
                return Err(ExecError::InvalidOptions {
                    reason: "ioclassdata requires ioclass".to_string(),
                });
            }
            if data > MAX_IOCLASS_DATA {
                return Err(ExecError::InvalidOptions {
                    reason: format!("ioclassdata {data} out of range 0-{MAX_IOCLASS_DATA}"),
                });
            }
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(ExecError::InvalidOptions {
                reason: "timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Wrap `cmd` with the helper programs these options call for.
    ///
    /// The resulting argv is, outermost first: `sudo -n`, `ionice`, `nice`,
    /// then the original command. Session and affinity changes are applied
    /// in the child before exec and do not appear here.
    #[must_use]
    pub fn wrap(&self, cmd: &CommandSpec, tools: &ExtTools) -> CommandSpec {
        let mut argv: Vec<OsString> = cmd.argv().map(ToOwned::to_owned).collect();

        if let Some(nice) = self.nice {
            let prefix: [OsString; 3] = [
                tools.nice.clone().into(),
                "-n".into(),
                nice.to_string().into(),
            ];
            prepend(&mut argv, prefix);
        }

        if let Some(class) = self.ioclass {
            let mut prefix: Vec<OsString> = vec![
                tools.ionice.clone().into(),
                "-c".into(),
                class.as_number().to_string().into(),
            ];
            if let Some(data) = self.ioclassdata {
                prefix.push("-n".into());
                prefix.push(data.to_string().into());
            }
            prepend(&mut argv, prefix);
        }

        if self.sudo {
            let prefix: [OsString; 2] = [tools.sudo.clone().into(), "-n".into()];
            prepend(&mut argv, prefix);
        }

        let mut argv = argv.into_iter();
        let program = argv.next().unwrap_or_default();
        CommandSpec {
            program,
            args: argv.collect(),
            cwd: cmd.cwd.clone(),
            env: cmd.env.clone(),
        }
    }
}

fn prepend(argv: &mut Vec<OsString>, prefix: impl IntoIterator<Item = OsString>) {
    argv.splice(0..0, prefix);
}
