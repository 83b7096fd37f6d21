//! Template engine
//!
//! - [`engine`] - compiles template assets, caches compiled bindings and renders them
//! - [`functions`] - the function library every template can call
//!
//! Templates reach the engine through a [`TemplateSource`]; the asset client
//! is the production source.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::assets::manifest::AssetMetadata;
use crate::error::Result;

pub mod engine;
pub mod functions;

pub use engine::{declared_defaults, TemplateBinding, TemplateEngine, TypeMismatch, VariableReport};
pub use functions::{FunctionCategory, FunctionContext, FunctionInfo, FUNCTIONS, STAGES};

/// Variables a template renders over, keyed by name
pub type Variables = BTreeMap<String, serde_json::Value>;

/// A template body plus the metadata it was published with
#[derive(Debug, Clone)]
pub struct TemplateAsset {
    /// Template name
    pub name: String,
    /// Catalogue entry, when the source has one
    pub metadata: Option<AssetMetadata>,
    /// Template text
    pub source: String,
}

/// Where the engine gets template text from
#[async_trait]
pub trait TemplateSource: Send + Sync {
    /// Fetch the template called `name`
    async fn fetch_template(&self, name: &str) -> Result<TemplateAsset>;

    /// Advances whenever templates fetched earlier may be out of date
    fn generation(&self) -> u64 {
        0
    }
}
