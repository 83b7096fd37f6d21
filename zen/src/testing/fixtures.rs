//! In-memory asset repository fixtures

use std::collections::BTreeMap;
use std::path::Path;

use crate::assets::cache::sha256_hex;
use crate::assets::fetcher::file_url;
use crate::assets::manifest::{AssetMetadata, AssetType, Manifest, VariableSpec};
use crate::auth::ProviderId;
use crate::config::AssetSettings;
use crate::http::HttpResponse;

use super::MockTransport;

/// Repository URL used by [`asset_settings`]
pub const REPOSITORY_URL: &str = "https://api.github.com/repos/zen-dev/zen-library";

/// Branch used by [`asset_settings`]
pub const BRANCH: &str = "main";

/// A manifest plus the bodies it points at, servable through a [`MockTransport`]
///
/// # Example
///
/// ```rust
/// use zen::testing::{fixtures::FixtureRepo, MockTransport};
///
/// let repo = FixtureRepo::new().template("readme", "docs", &["intro"], "# {{TITLE}}\n");
/// let transport = MockTransport::new();
/// repo.serve(&transport);
/// assert_eq!(repo.manifest().assets.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct FixtureRepo {
    assets: Vec<AssetMetadata>,
    bodies: BTreeMap<String, String>,
    branch: String,
}

impl Default for FixtureRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureRepo {
    /// Empty repository on the default branch
    #[must_use]
    pub fn new() -> Self {
        Self {
            assets: Vec::new(),
            bodies: BTreeMap::new(),
            branch: BRANCH.to_string(),
        }
    }

    /// Serve from `branch` instead of the default one
    #[must_use]
    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Add or replace a markdown template asset
    #[must_use]
    pub fn template(self, name: &str, category: &str, tags: &[&str], body: &str) -> Self {
        let metadata = AssetMetadata {
            name: name.to_string(),
            command: Some(name.to_string()),
            asset_type: AssetType::Template,
            category: category.to_string(),
            description: format!("{name} template"),
            tags: tags.iter().map(ToString::to_string).collect(),
            path: format!("templates/{name}.md.tmpl"),
            format: Some("md".to_string()),
            output_file: None,
            workflow_stages: Vec::new(),
            variables: Vec::new(),
            checksum: None,
            updated_at: None,
        };
        self.asset(metadata, body)
    }

    /// Add or replace a template that declares `variables`
    #[must_use]
    pub fn template_with(
        self,
        name: &str,
        body: &str,
        variables: Vec<VariableSpec>,
        configure: impl FnOnce(&mut AssetMetadata),
    ) -> Self {
        let mut repo = self.template(name, "general", &[], body);
        if let Some(asset) = repo.assets.iter_mut().find(|a| a.name == name) {
            asset.variables = variables;
            configure(asset);
        }
        repo
    }

    /// Add or replace an arbitrary asset; the checksum is derived from `body`
    #[must_use]
    pub fn asset(mut self, mut metadata: AssetMetadata, body: &str) -> Self {
        metadata.checksum = Some(format!("sha256:{}", sha256_hex(body.as_bytes())));
        self.bodies.insert(metadata.name.clone(), body.to_string());
        match self.assets.iter_mut().find(|a| a.name == metadata.name) {
            Some(existing) => *existing = metadata,
            None => self.assets.push(metadata),
        }
        self
    }

    /// Drop an asset
    #[must_use]
    pub fn without(mut self, name: &str) -> Self {
        self.assets.retain(|a| a.name != name);
        self.bodies.remove(name);
        self
    }

    /// The manifest this repository publishes
    #[must_use]
    pub fn manifest(&self) -> Manifest {
        Manifest {
            schema_version: "1.0".to_string(),
            version: Some("fixture".to_string()),
            generated_at: None,
            assets: self.assets.clone(),
        }
    }

    /// The manifest as YAML
    #[must_use]
    pub fn manifest_yaml(&self) -> String {
        self.manifest().to_yaml().unwrap_or_default()
    }

    /// URL the fetcher requests for the manifest
    #[must_use]
    pub fn manifest_url(&self) -> String {
        self.url_for("manifest.yaml")
    }

    /// URL the fetcher requests for the body of `name`
    #[must_use]
    pub fn asset_url(&self, name: &str) -> String {
        let path = self
            .assets
            .iter()
            .find(|a| a.name == name)
            .map_or_else(|| format!("templates/{name}.md.tmpl"), |a| a.path.clone());
        self.url_for(&path)
    }

    /// Script the manifest and every body on `transport`, replacing earlier scripts
    pub fn serve(&self, transport: &MockTransport) {
        let manifest_url = self.manifest_url();
        transport.clear_route(&manifest_url);
        transport.respond(manifest_url, HttpResponse::new(200, self.manifest_yaml()));
        for asset in &self.assets {
            let url = self.asset_url(&asset.name);
            let body = self.bodies.get(&asset.name).cloned().unwrap_or_default();
            transport.clear_route(&url);
            transport.respond(url, HttpResponse::new(200, body));
        }
    }

    fn url_for(&self, path: &str) -> String {
        file_url(ProviderId::Github, REPOSITORY_URL, path, &self.branch)
            .unwrap_or_else(|_| format!("{REPOSITORY_URL}/contents/{path}"))
    }
}

/// Asset settings pointing at the fixture repository with the cache under `dir`
///
/// Retries are disabled so scripted failures surface immediately.
#[must_use]
pub fn asset_settings(dir: &Path) -> AssetSettings {
    AssetSettings {
        repository_url: REPOSITORY_URL.to_string(),
        branch: BRANCH.to_string(),
        auth_provider: ProviderId::Github,
        cache_path: dir.join("cache"),
        max_retries: 0,
        ..AssetSettings::default()
    }
}
