//! Terminal output
//!
//! Every user-facing line starts with one of four symbols: `✓` success,
//! `✗` failure, `!` warning, `→` information. Styling goes through
//! `console`, which honours `NO_COLOR` and non-TTY streams on its own;
//! [`init`] additionally applies the configured `ui.no_color`.

use console::{style, Emoji, StyledObject};
use serde::Serialize;

static SUCCESS: Emoji = Emoji("✓", "+");
static FAILURE: Emoji = Emoji("✗", "x");
static WARNING: Emoji = Emoji("!", "!");
static INFO: Emoji = Emoji("→", ">");

/// Disable styling when `no_color` is set or `NO_COLOR` is present
pub fn init(no_color: bool) {
    if no_color || std::env::var_os("NO_COLOR").is_some() {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }
}

/// Print a success line
pub fn success(message: impl std::fmt::Display) {
    println!("{} {message}", style(SUCCESS).green().bold());
}

/// Print an informational line
pub fn info(message: impl std::fmt::Display) {
    println!("{} {message}", style(INFO).cyan());
}

/// Print a warning to stderr
pub fn warning(message: impl std::fmt::Display) {
    eprintln!("{} {message}", style(WARNING).yellow().bold());
}

/// Print a failure to stderr
pub fn failure(message: impl std::fmt::Display) {
    eprintln!("{} {message}", style(FAILURE).red().bold());
}

/// Section heading
pub fn heading(text: &str) {
    println!("{}", style(text).bold().underlined());
}

/// Highlighted value
pub fn value<D>(value: D) -> StyledObject<D> {
    style(value).cyan()
}

/// De-emphasised text
pub fn dim<D>(value: D) -> StyledObject<D> {
    style(value).dim()
}

/// Print `value` as pretty JSON
///
/// # Errors
///
/// Serialisation failures.
pub fn json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Human-readable byte count
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn bytes(size: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut amount = size as f64;
    let mut unit = 0;
    while amount >= 1024.0 && unit < UNITS.len() - 1 {
        amount /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{size} B")
    } else {
        format!("{amount:.1} {}", UNITS[unit])
    }
}
