//! Logging setup
//!
//! Diagnostics go to stderr so command output on stdout stays clean.
//! The filter comes from `ZEN_LOG`, then `RUST_LOG`, otherwise from the
//! verbosity requested on the command line.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Result, ZenError};

/// Environment variable holding an `EnvFilter` directive
pub const LOG_ENV: &str = "ZEN_LOG";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable, compact
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Number of `-v` flags given
    pub verbosity: u8,

    /// Suppress everything below errors
    pub quiet: bool,

    /// Output format
    pub format: LogFormat,

    /// Emit ANSI colors
    pub ansi: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            quiet: false,
            format: LogFormat::Pretty,
            ansi: true,
        }
    }
}

impl ObservabilityConfig {
    /// Set the verbosity level
    #[must_use]
    pub const fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Only log errors
    #[must_use]
    pub const fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Emit JSON lines
    #[must_use]
    pub const fn with_json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    /// Disable ANSI colors
    #[must_use]
    pub const fn without_color(mut self) -> Self {
        self.ansi = false;
        self
    }

    /// Filter directive implied by the flags
    #[must_use]
    pub const fn default_directive(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbosity {
            0 => "warn",
            1 => "info,zen=debug",
            2 => "debug,zen=trace",
            _ => "trace",
        }
    }
}

/// Install the global subscriber
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
///
/// # Example
///
/// ```rust,no_run
/// use zen::observability::{self, ObservabilityConfig};
///
/// # fn main() -> zen::Result<()> {
/// observability::init(&ObservabilityConfig::default().with_verbosity(1))?;
/// tracing::info!("zen started");
/// # Ok(())
/// # }
/// ```
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    let result = match config.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_ansi(config.ansi)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    result.map_err(|e| ZenError::InvalidArgument(format!("logging already initialized: {e}")))
}
