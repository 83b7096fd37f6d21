//! CLI command implementations

pub mod assets;
pub mod auth;
pub mod task;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

pub use assets::AssetsCommand;
pub use auth::AuthCommand;
pub use task::TaskCommand;

use crate::context::AppContext;

/// zen command line
#[derive(Debug, Parser)]
#[command(name = "zen")]
#[command(version)]
#[command(about = "Fetch, cache and render workflow assets", long_about = None)]
pub struct Cli {
    /// Configuration file to use instead of the standard locations
    #[arg(long, global = true, env = "ZEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// More diagnostics on stderr (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only report errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit diagnostics as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Browse, fetch and synchronise library assets
    Assets {
        #[command(subcommand)]
        command: AssetsCommand,
    },
    /// Manage provider credentials
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
    /// Work with task directories
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
}

impl Commands {
    /// Run the command against `ctx`
    ///
    /// # Errors
    ///
    /// Library errors, wrapped in `anyhow` with the `ZenError` preserved
    /// for exit-code mapping.
    pub async fn execute(self, ctx: &AppContext) -> Result<()> {
        match self {
            Self::Assets { command } => command.execute(ctx).await,
            Self::Auth { command } => command.execute(ctx).await,
            Self::Task { command } => command.execute(ctx).await,
        }
    }
}
