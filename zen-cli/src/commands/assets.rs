//! Asset library commands

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Subcommand;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use zen::assets::{
    AssetClient, AssetFilter, AssetType, GetOptions, ListPage, SyncRequest, SyncResult, SyncStatus,
};
use zen::fsutil;

use crate::context::AppContext;
use crate::output;

/// Asset library commands
#[derive(Debug, Subcommand)]
pub enum AssetsCommand {
    /// List assets in the library
    List {
        /// Only this asset type (template, prompt, mcp, schema)
        #[arg(short = 't', long = "type")]
        asset_type: Option<AssetType>,

        /// Only this category
        #[arg(short, long)]
        category: Option<String>,

        /// Only assets carrying these tags (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Only assets used in this workflow stage
        #[arg(long)]
        stage: Option<String>,

        /// Results to skip
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Maximum results
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print or save an asset body
    Get {
        /// Asset name
        name: String,

        /// Write the body to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip checksum verification
        #[arg(long)]
        no_verify: bool,

        /// Download even when a fresh copy is cached
        #[arg(long)]
        refresh: bool,
    },

    /// Refresh the manifest and prefetch changed assets
    Sync {
        /// Refresh even when the cached manifest is fresh
        #[arg(short, long)]
        force: bool,

        /// Refresh the manifest only
        #[arg(long)]
        shallow: bool,

        /// Switch to this branch
        #[arg(short, long)]
        branch: Option<String>,

        /// Print the sync report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect or clear the local cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

/// Cache maintenance
#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Show cache statistics
    Info {
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove every cached entry
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

impl AssetsCommand {
    /// Execute the assets command
    ///
    /// # Errors
    ///
    /// Returns an error if the library cannot be reached, an asset is
    /// unknown or fails verification, or the cache cannot be written.
    pub async fn execute(self, ctx: &AppContext) -> Result<()> {
        let client = ctx.assets().await?;
        let result = self.run(&client, ctx).await;
        client.close().await?;
        result
    }

    async fn run(self, client: &AssetClient, ctx: &AppContext) -> Result<()> {
        match self {
            Self::List {
                asset_type,
                category,
                tags,
                stage,
                offset,
                limit,
                json,
            } => {
                let filter = AssetFilter {
                    asset_type,
                    category,
                    tags,
                    workflow_stage: stage,
                    offset,
                    limit: Some(limit),
                };
                let page = client.list(&filter).await?;
                if json {
                    output::json(&page)
                } else {
                    print_page(&page, offset);
                    Ok(())
                }
            }
            Self::Get {
                name,
                output: target,
                no_verify,
                refresh,
            } => {
                let mut options = GetOptions::default();
                if no_verify {
                    options = options.verify(false);
                }
                if refresh {
                    options = options.bypass_cache();
                }
                let content = client.get(&name, options).await?;
                if let Some(target) = target {
                    fsutil::write_atomic(&target, &content.body, 0o644, 0o755)?;
                    output::success(format!(
                        "Saved {} to {}",
                        output::value(&name),
                        target.display()
                    ));
                } else {
                    print!("{}", content.text()?);
                }
                if content.cached {
                    tracing::debug!(asset = %name, age = content.cache_age_seconds, "served from cache");
                }
                Ok(())
            }
            Self::Sync {
                force,
                shallow,
                branch,
                json,
            } => {
                let spinner = spinner("Synchronising asset library...")?;
                let report = client
                    .sync(SyncRequest {
                        force,
                        shallow,
                        branch,
                    })
                    .await;
                spinner.finish_and_clear();
                let report = report?;
                if json {
                    output::json(&report)
                } else {
                    print_sync(&report);
                    Ok(())
                }
            }
            Self::Cache { command } => match command {
                CacheCommand::Info { json } => {
                    let info = client.get_cache_info().await;
                    if json {
                        output::json(&info)
                    } else {
                        output::heading("Asset cache");
                        println!("  Location:   {}", info.root.display());
                        println!(
                            "  Size:       {} of {}",
                            output::value(output::bytes(info.total_size_bytes)),
                            output::bytes(info.max_size_bytes)
                        );
                        println!("  Entries:    {}", output::value(info.entry_count));
                        println!(
                            "  Hit ratio:  {}",
                            output::value(format!("{:.1}%", info.hit_ratio * 100.0))
                        );
                        let last_sync = info
                            .last_sync
                            .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
                        println!("  Last sync:  {}", output::value(last_sync));
                        Ok(())
                    }
                }
                CacheCommand::Clear { yes } => {
                    if !yes && !confirm_clear(ctx)? {
                        output::info("Cancelled");
                        return Ok(());
                    }
                    client.clear_cache().await?;
                    output::success("Cache cleared");
                    Ok(())
                }
            },
        }
    }
}

fn spinner(message: &'static str) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .context("Failed to set progress style")?,
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(message);
    Ok(spinner)
}

fn confirm_clear(ctx: &AppContext) -> Result<bool> {
    if ctx.config.auth.prompt_disabled {
        anyhow::bail!(zen::ZenError::InvalidArgument(
            "prompting is disabled; pass --yes to clear the cache".into()
        ));
    }
    Confirm::new()
        .with_prompt("Remove every cached asset?")
        .default(false)
        .interact()
        .context("Failed to read confirmation")
}

fn print_page(page: &ListPage, offset: usize) {
    if page.results.is_empty() {
        output::info("No assets match");
        return;
    }
    println!(
        "{:<32} {:<10} {:<16} {}",
        "NAME", "TYPE", "CATEGORY", "DESCRIPTION"
    );
    println!("{}", "─".repeat(80));
    for asset in &page.results {
        println!(
            "{:<32} {:<10} {:<16} {}",
            asset.name,
            asset.asset_type.to_string(),
            asset.category,
            output::dim(&asset.description)
        );
    }
    println!();
    let shown_to = offset + page.results.len();
    output::info(format!(
        "Showing {}-{} of {}{}",
        offset + 1,
        shown_to,
        page.total,
        if page.has_more { " (use --offset for more)" } else { "" }
    ));
}

fn print_sync(report: &SyncResult) {
    let summary = format!(
        "{} added, {} updated, {} removed on {}",
        report.added, report.updated, report.removed, report.branch
    );
    match report.status {
        SyncStatus::Success => output::success(format!("Synchronised: {summary}")),
        SyncStatus::Partial => output::warning(format!("Partially synchronised: {summary}")),
        SyncStatus::Error => output::failure(format!("Sync failed: {summary}")),
    }
    if !report.refreshed {
        output::info("Manifest was already fresh");
    }
    if report.prefetched > 0 {
        output::info(format!("Prefetched {} assets", report.prefetched));
    }
    if report.prefetch_deferred {
        output::warning("Prefetch deferred: rate-limit budget is low");
    }
    output::info(format!(
        "Cache size {:.2} MB, took {} ms",
        report.cache_size_mb,
        report.duration.as_millis()
    ));
}
