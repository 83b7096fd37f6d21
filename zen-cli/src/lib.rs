//! zen CLI library
//!
//! The binary is a thin shell over [`commands::Cli`]; everything it needs
//! lives here so it can be exercised from tests.

#![forbid(unsafe_code)]
#![allow(clippy::cognitive_complexity)]
#![allow(clippy::multiple_crate_versions)]

pub mod commands;
pub mod context;
pub mod output;
pub mod prompt;

pub use commands::{Cli, Commands};
pub use context::AppContext;

use zen::ZenError;

/// Exit code for a failed command
///
/// Library errors map through [`ZenError::exit_code`]; anything else is a
/// generic failure.
#[must_use]
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ZenError>())
        .map_or(1, ZenError::exit_code)
}

/// One-line message for a failed command, without a backtrace
#[must_use]
pub fn error_message(err: &anyhow::Error) -> String {
    let zen_error = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<ZenError>())
        .map(ZenError::root);
    match zen_error {
        Some(ZenError::AssetUnknown {
            command,
            suggestions,
        }) if !suggestions.is_empty() => format!(
            "unknown command '{command}'; did you mean: {}?",
            suggestions.join(", ")
        ),
        _ => format!("{err:#}"),
    }
}
