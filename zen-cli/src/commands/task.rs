//! Task directory commands

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;
use zen::task::RenderRequest;
use zen::template::Variables;

use crate::context::AppContext;
use crate::output;

/// Task directory commands
#[derive(Debug, Subcommand)]
pub enum TaskCommand {
    /// Render a template asset into a task directory
    Render {
        /// Asset command to render (for example `feature-spec`)
        command: String,

        /// Task directory holding `manifest.yaml`
        #[arg(short = 'd', long, default_value = ".")]
        task_dir: PathBuf,

        /// Output file, relative to the task directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,

        /// Print the rendered text instead of writing it
        #[arg(long)]
        preview: bool,

        /// Extra variable, `KEY=VALUE`; values parse as JSON when they can
        #[arg(long = "var", value_parser = parse_variable)]
        variables: Vec<(String, serde_json::Value)>,
    },
}

impl TaskCommand {
    /// Execute the task command
    ///
    /// # Errors
    ///
    /// Returns an error if the task has no manifest, the command names no
    /// asset, the target exists, or the template fails to render.
    pub async fn execute(self, ctx: &AppContext) -> Result<()> {
        match self {
            Self::Render {
                command,
                task_dir,
                output: target,
                force,
                preview,
                variables,
            } => {
                let client = ctx.assets().await?;
                let renderer = ctx.renderer(&client);
                let request = RenderRequest {
                    command,
                    task_dir,
                    output: target,
                    force,
                    preview,
                    variables: variables.into_iter().collect::<Variables>(),
                };
                let outcome = renderer.render(&request).await;
                client.close().await?;
                let outcome = outcome?;

                if outcome.written {
                    output::success(format!(
                        "Rendered {} to {}",
                        output::value(&outcome.asset),
                        outcome.output_path.display()
                    ));
                } else {
                    output::info(format!(
                        "Preview of {} (would write {})",
                        outcome.asset,
                        outcome.output_path.display()
                    ));
                    println!("{}", outcome.content);
                }
                if !outcome.sources.is_empty() {
                    output::info(format!("Enriched from {}", outcome.sources.join(", ")));
                }
                Ok(())
            }
        }
    }
}

/// Parse `KEY=VALUE`, reading the value as JSON when possible
///
/// # Errors
///
/// Returns a message when the argument has no `=` or an empty key.
pub fn parse_variable(raw: &str) -> std::result::Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::from(value));
    Ok((key.to_string(), value))
}
