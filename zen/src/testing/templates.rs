//! In-memory template source

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::assets::manifest::AssetMetadata;
use crate::error::{Result, ZenError};
use crate::template::{TemplateAsset, TemplateSource};

/// [`TemplateSource`] backed by a map of names to bodies
#[derive(Debug, Default)]
pub struct StaticTemplates {
    templates: HashMap<String, (Option<AssetMetadata>, String)>,
    fetches: Arc<AtomicUsize>,
}

impl StaticTemplates {
    /// Source with no templates
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template without metadata
    #[must_use]
    pub fn with(mut self, name: &str, body: &str) -> Self {
        self.templates
            .insert(name.to_string(), (None, body.to_string()));
        self
    }

    /// Add a template with its catalogue entry
    #[must_use]
    pub fn with_asset(mut self, metadata: AssetMetadata, body: &str) -> Self {
        self.templates
            .insert(metadata.name.clone(), (Some(metadata), body.to_string()));
        self
    }

    /// Counter of fetches served so far
    #[must_use]
    pub fn fetch_counter(&self) -> impl Fn() -> usize + Send + Sync + 'static {
        let fetches = Arc::clone(&self.fetches);
        move || fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TemplateSource for StaticTemplates {
    async fn fetch_template(&self, name: &str) -> Result<TemplateAsset> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let (metadata, source) = self
            .templates
            .get(name)
            .cloned()
            .ok_or_else(|| ZenError::NotFound(format!("template {name}")))?;
        Ok(TemplateAsset {
            name: name.to_string(),
            metadata,
            source,
        })
    }
}
