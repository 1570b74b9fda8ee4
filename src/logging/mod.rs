//! Logging and output control
//!
//! This module provides the [`Logger`] used by providers and the CLI for
//! diagnostics. Every message is emitted as a `tracing` event on stderr, so
//! stdout stays reserved for listing results. [`init`] installs the
//! subscriber once per process.

use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable overriding the computed log filter
pub const LOG_ENV: &str = "REGISTRY_EXPLORER_LOG";

/// Install the global tracing subscriber.
///
/// `quiet` wins over `verbose`. An explicit filter in [`LOG_ENV`] or
/// `RUST_LOG` wins over both.
pub fn init(verbose: bool, quiet: bool) {
    let default_level = if quiet {
        "error"
    } else if verbose {
        "registry_explorer=debug,info"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    // A second init (tests, embedding) keeps the first subscriber
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}

/// Logger scoped to one component (a provider, the resolver, the CLI)
#[derive(Debug, Clone)]
pub struct Logger {
    pub verbose: bool,
    pub quiet: bool,
    pub component: &'static str,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Logger {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            quiet: false,
            component: "registry-explorer",
        }
    }

    pub fn new_quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
            component: "registry-explorer",
        }
    }

    /// Same settings, different component label
    pub fn scoped(&self, component: &'static str) -> Self {
        Self {
            component,
            ..self.clone()
        }
    }

    pub fn trace(&self, message: &str) {
        tracing::trace!(component = self.component, "{}", message);
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(component = self.component, "{}", message);
    }

    /// Shown with `--verbose`
    pub fn verbose(&self, message: &str) {
        if self.verbose && !self.quiet {
            tracing::info!(component = self.component, "{}", message);
        } else {
            tracing::debug!(component = self.component, "{}", message);
        }
    }

    /// Detailed information (page fetches, request URLs)
    pub fn detail(&self, message: &str) {
        tracing::debug!(component = self.component, "{}", message);
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            tracing::info!(component = self.component, "{}", message);
        }
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            tracing::info!(component = self.component, "✅ {}", message);
        }
    }

    pub fn warning(&self, message: &str) {
        if !self.quiet {
            tracing::warn!(component = self.component, "{}", message);
        }
    }

    pub fn error(&self, message: &str) {
        tracing::error!(component = self.component, "{}", message);
    }

    /// Format duration in human-readable format
    pub fn format_duration(&self, duration: Duration) -> String {
        let millis = duration.as_millis();
        if millis < 1000 {
            return format!("{}ms", millis);
        }
        let secs = duration.as_secs();
        if secs < 60 {
            format!("{}.{}s", secs, duration.subsec_millis() / 100)
        } else if secs < 3600 {
            format!("{}m{}s", secs / 60, secs % 60)
        } else {
            format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
    }
}
