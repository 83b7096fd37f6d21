//! zen CLI tool

#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use std::process::ExitCode;

use clap::Parser;
use zen::observability::{self, ObservabilityConfig};
use zen_cli::{output, AppContext, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    output::init(cli.no_color);

    let mut logging = ObservabilityConfig::default()
        .with_verbosity(cli.verbose)
        .with_quiet(cli.quiet);
    if cli.log_json {
        logging = logging.with_json();
    }
    if cli.no_color || std::env::var_os("NO_COLOR").is_some() {
        logging = logging.without_color();
    }
    if let Err(e) = observability::init(&logging) {
        output::warning(format!("logging disabled: {e}"));
    }

    let result = match AppContext::load(cli.config.as_deref()) {
        Ok(ctx) => {
            output::init(ctx.config.ui.no_color);
            cli.command.execute(&ctx).await
        }
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            output::failure(zen_cli::error_message(&err));
            let code = u8::try_from(zen_cli::exit_code(&err)).unwrap_or(1);
            ExitCode::from(code)
        }
    }
}
