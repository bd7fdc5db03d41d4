use std::collections::BTreeSet;
use std::io;
use std::process::ExitStatus;

use nix::sched::CpuSet;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;

/// Child-side setup that runs between fork and exec.
///
/// Every child leads its own process group (or session, with `setsid`)
/// so that a timeout can signal the whole tree, including processes
/// forked by `sudo`.
#[derive(Clone, Copy)]
pub(crate) struct ChildSetup {
    setsid: bool,
    affinity: Option<CpuSet>,
}

impl ChildSetup {
    pub(crate) fn new(setsid: bool, cpus: Option<&BTreeSet<usize>>) -> io::Result<Self> {
        let affinity = match cpus {
            Some(cpus) => {
                let mut set = CpuSet::new();
                for &cpu in cpus {
                    set.set(cpu).map_err(io::Error::from)?;
                }
                Some(set)
            }
            None => None,
        };
        Ok(Self { setsid, affinity })
    }

    /// Only async-signal-safe calls: this runs in the forked child.
    fn apply(&self) -> io::Result<()> {
        if self.setsid {
            nix::unistd::setsid()?;
        } else {
            nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))?;
        }
        if let Some(ref set) = self.affinity {
            nix::sched::sched_setaffinity(Pid::from_raw(0), set)?;
        }
        Ok(())
    }

    pub(crate) fn install(self, cmd: &mut std::process::Command) {
        use std::os::unix::process::CommandExt;
        // SAFETY: `apply` only issues raw syscalls and does not allocate.
        unsafe {
            cmd.pre_exec(move || self.apply());
        }
    }

    pub(crate) fn install_tokio(self, cmd: &mut tokio::process::Command) {
        // SAFETY: see `install`.
        unsafe {
            cmd.pre_exec(move || self.apply());
        }
    }
}

/// Send SIGKILL to the process group led by `pid`.
pub(crate) fn kill_group(pid: u32) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    // ESRCH means the whole group already exited.
    let _ = killpg(Pid::from_raw(raw), Signal::SIGKILL);
}

/// Exit code and terminating signal of a reaped child.
pub(crate) fn decode_status(status: ExitStatus) -> (i32, Option<i32>) {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => (code, None),
        (None, Some(signal)) => (-signal, Some(signal)),
        (None, None) => (-1, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_decode_status_exit_code() {
        let status = Command::new("sh").args(["-c", "exit 42"]).status().unwrap();
        assert_eq!(decode_status(status), (42, None));
    }

    #[test]
    fn test_decode_status_signal() {
        let status = Command::new("sh").args(["-c", "kill -9 $$"]).status().unwrap();
        assert_eq!(decode_status(status), (-9, Some(9)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_child_setup_new_process_group() {
        let mut cmd = Command::new("cut");
        cmd.args(["-d", " ", "-f5", "/proc/self/stat"]);
        ChildSetup::new(false, None).unwrap().install(&mut cmd);
        let mut child = cmd.stdout(std::process::Stdio::piped()).spawn().unwrap();
        let pid = child.id();
        let mut out = String::new();
        std::io::Read::read_to_string(child.stdout.as_mut().unwrap(), &mut out).unwrap();
        child.wait().unwrap();
        assert_eq!(out.trim(), pid.to_string());
    }

    #[test]
    fn test_child_setup_rejects_out_of_range_cpu() {
        let cpus: BTreeSet<usize> = [CpuSet::count() + 1].into_iter().collect();
        assert!(ChildSetup::new(false, Some(&cpus)).is_err());
    }
}
