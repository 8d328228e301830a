//! Tracing setup for the relay and the CLI.
//!
//! Logs go to stderr so command output on stdout (`get`, `status --json`)
//! stays machine-readable.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crates whose logs stay at `warn` unless `RUST_LOG` says otherwise.
const QUIET_DEPENDENCIES: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls", "axum"];

/// How much the relay logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Writes, dispatch results and lifecycle events.
    #[default]
    Normal,
    /// Adds queueing and per-guardian detail.
    Verbose,
    /// Everything.
    Trace,
}

impl Verbosity {
    /// The tracing level for the relay's own events.
    #[must_use]
    pub fn to_level_filter(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// The filter used when `RUST_LOG` is unset.
    ///
    /// At [`Verbosity::Trace`] dependencies are not held back.
    #[must_use]
    pub fn directive(&self) -> String {
        let mut directive = format!("guardrelay={}", self.to_level_filter());
        if *self != Self::Trace {
            for name in QUIET_DEPENDENCIES {
                directive.push_str(&format!(",{name}=warn"));
            }
        }
        directive
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `verbosity`. Later calls are no-ops.
///
/// ```no_run
/// use guardrelay::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::Verbose);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(verbosity >= Verbosity::Verbose),
    );

    let _ = subscriber.try_init();
}
