//! CPU list helpers shared by the affinity reset and the `taskset` wrapper.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Kernel file listing the online CPUs in cpulist syntax.
pub const SYS_ONLINE_CPUS: &str = "/sys/devices/system/cpu/online";

#[derive(Error, Debug)]
pub enum AffinityError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid CPU list '{input}': {reason}")]
    Parse { input: String, reason: String },
}

/// Expand the kernel cpulist syntax (`0-2,5`) into a set of CPU indices.
///
/// Accepts the format of `/sys/devices/system/cpu/online` as well as the
/// output of `taskset --cpu-list` and `lscpu`. Surrounding whitespace is
/// ignored.
///
/// ```rust
/// use cmdrun_runner::affinity::cpulist_parse;
///
/// let cpus = cpulist_parse("0-2,5\n").unwrap();
/// assert_eq!(cpus.into_iter().collect::<Vec<_>>(), vec![0, 1, 2, 5]);
/// ```
pub fn cpulist_parse(cpu_range: &str) -> Result<BTreeSet<usize>, AffinityError> {
    let invalid = |reason: String| AffinityError::Parse {
        input: cpu_range.to_string(),
        reason,
    };
    let parse_index = |item: &str| {
        item.trim()
            .parse::<usize>()
            .map_err(|e| invalid(format!("'{item}': {e}")))
    };

    let mut cpus = BTreeSet::new();
    for item in cpu_range.trim().split(',') {
        match item.split_once('-') {
            Some((begin, end)) => {
                let (begin, end) = (parse_index(begin)?, parse_index(end)?);
                if begin > end {
                    return Err(invalid(format!("descending range {begin}-{end}")));
                }
                cpus.extend(begin..=end);
            }
            None => {
                cpus.insert(parse_index(item)?);
            }
        }
    }
    Ok(cpus)
}

/// Render a CPU set in the comma separated form accepted by `taskset --cpu-list`.
#[must_use]
pub fn cpulist_format(cpus: &BTreeSet<usize>) -> String {
    cpus.iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Read the set of online CPUs from sysfs.
pub fn online_cpus() -> Result<BTreeSet<usize>, AffinityError> {
    read_cpulist(Path::new(SYS_ONLINE_CPUS))
}

pub(crate) fn read_cpulist(path: &Path) -> Result<BTreeSet<usize>, AffinityError> {
    let content = fs::read_to_string(path).map_err(|source| AffinityError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let first_line = content.lines().next().unwrap_or_default();
    cpulist_parse(first_line)
}
