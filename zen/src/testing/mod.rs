//! Testing utilities for zen consumers
//!
//! Helpers for exercising the asset and auth layers without a network:
//! - [`MockTransport`] - scripted [`HttpTransport`](crate::http::HttpTransport)
//! - [`StaticPrompter`] - canned answers for interactive prompts
//! - [`StaticTemplates`] - an in-memory [`TemplateSource`](crate::template::TemplateSource)
//! - [`fixtures`] - an in-memory asset repository and matching settings
//! - [`ManualClock`] - re-exported so tests can drive time
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zen::assets::{AssetClient, AssetFilter};
//! use zen::testing::{fixtures, ManualClock, MockTransport};
//!
//! # async fn example(dir: &std::path::Path) -> zen::Result<()> {
//! let repo = fixtures::FixtureRepo::new().template("readme", "docs", &[], "# Hello\n");
//! let transport = Arc::new(MockTransport::new());
//! repo.serve(&transport);
//!
//! let clock = ManualClock::new(chrono::Utc::now());
//! let client = AssetClient::open(&fixtures::asset_settings(dir), transport, None, clock.shared()).await?;
//! assert_eq!(client.list(&AssetFilter::all()).await?.total, 1);
//! # Ok(())
//! # }
//! ```

pub mod fixtures;
pub mod prompt;
pub mod templates;
pub mod transport;

pub use crate::clock::ManualClock;
pub use prompt::StaticPrompter;
pub use templates::StaticTemplates;
pub use transport::MockTransport;
