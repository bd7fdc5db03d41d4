//! Tracing subscriber setup.
//!
//! Runner crates only emit `tracing` events; applications and test suites
//! call [`init_tracing`] once to see them.

use std::io::IsTerminal;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Filter used when `RUST_LOG` is unset and `verbose` is off.
pub const DEFAULT_FILTER: &str = "cmdrun=info,cmdrun_runner=info,cmdrun_taskset=info,warn";

/// Filter used when `RUST_LOG` is unset and `verbose` is on.
pub const VERBOSE_FILTER: &str = "cmdrun=debug,cmdrun_runner=debug,cmdrun_taskset=debug,info";

/// Check if colored output should be used.
///
/// Returns true only if stderr is a terminal and `NO_COLOR` is not set.
fn use_color() -> bool {
    std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER }))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global tracing subscriber, writing to stderr.
///
/// `RUST_LOG` takes precedence over the built-in filters. Verbose mode
/// adds targets and span close events with their durations.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(use_color())
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false);

    if verbose {
        tracing_subscriber::registry()
            .with(env_filter(true))
            .with(
                layer
                    .with_target(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter(false))
            .with(layer.with_target(false).with_thread_names(false).compact())
            .try_init()?;
    }

    Ok(())
}

/// Install a test-friendly subscriber that writes through the libtest
/// capture. Safe to call from every test; only the first call wins.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::registry()
        .with(env_filter(true))
        .with(fmt::layer().with_test_writer().compact())
        .try_init();
}
