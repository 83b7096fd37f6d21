//! Manifest parsing and the in-memory asset catalogue
//!
//! The registry holds an immutable [`Catalog`] behind a pointer that is
//! swapped whole on every load, so readers always see a fully parsed
//! manifest.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ZenError};

/// Kinds of asset the library serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    /// Renderable template
    Template,
    /// AI prompt
    Prompt,
    /// MCP server definition
    Mcp,
    /// JSON or YAML schema
    Schema,
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Template => "template",
            Self::Prompt => "prompt",
            Self::Mcp => "mcp",
            Self::Schema => "schema",
        })
    }
}

impl std::str::FromStr for AssetType {
    type Err = ZenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "template" => Ok(Self::Template),
            "prompt" => Ok(Self::Prompt),
            "mcp" => Ok(Self::Mcp),
            "schema" => Ok(Self::Schema),
            other => Err(ZenError::InvalidArgument(format!(
                "unknown asset type '{other}' (expected template, prompt, mcp or schema)"
            ))),
        }
    }
}

/// Declared type of a template variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    /// Text
    #[default]
    String,
    /// Any number
    Number,
    /// Whole number
    Integer,
    /// true / false
    Boolean,
    /// List
    Array,
    /// Mapping
    Object,
    /// RFC 3339 or `YYYY-MM-DD` text
    Date,
}

/// Variable declared by a template asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    /// Variable name as referenced by the template
    pub name: String,
    /// Expected type
    #[serde(rename = "type", default)]
    pub var_type: VariableType,
    /// Render fails validation when absent
    #[serde(default)]
    pub required: bool,
    /// Value used when the caller supplies none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Human readable description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Catalogue entry for one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    /// Unique asset name
    pub name: String,
    /// Human-friendly command used by the task renderer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Asset kind
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    /// Free-form category
    #[serde(default)]
    pub category: String,
    /// Human readable description
    #[serde(default)]
    pub description: String,
    /// Search tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Content path relative to the repository root
    pub path: String,
    /// Output file extension
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Output file name when rendered into a task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    /// Workflow stages the asset belongs to
    #[serde(default)]
    pub workflow_stages: Vec<String>,
    /// Declared template variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<VariableSpec>,
    /// Content digest, `sha256:<hex>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Last content change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl AssetMetadata {
    /// Command name, falling back to the asset name
    #[must_use]
    pub fn command_name(&self) -> &str {
        self.command.as_deref().unwrap_or(&self.name)
    }

    /// Hex digest without the algorithm prefix, lowercased
    #[must_use]
    pub fn checksum_hex(&self) -> Option<String> {
        self.checksum.as_deref().map(|c| {
            c.strip_prefix("sha256:")
                .unwrap_or(c)
                .trim()
                .to_ascii_lowercase()
        })
    }

    /// Cache key of this asset's body
    #[must_use]
    pub fn cache_key(&self) -> String {
        asset_cache_key(&self.name)
    }

    fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Cache key for the body of asset `name`
#[must_use]
pub fn asset_cache_key(name: &str) -> String {
    format!("asset:{name}")
}

/// Parsed asset manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Manifest schema version
    pub schema_version: String,
    /// Library version tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// When the manifest was generated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    /// Assets, in document order
    #[serde(default)]
    pub assets: Vec<AssetMetadata>,
}

impl Manifest {
    /// Parse and validate a YAML manifest
    ///
    /// # Errors
    ///
    /// `SchemaError` for unknown top-level keys, missing fields, duplicate
    /// names, absolute or escaping paths, and malformed checksums.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let manifest: Self = serde_yaml::from_slice(raw)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Serialise back to YAML
    ///
    /// # Errors
    ///
    /// `SchemaError` if serialisation fails.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    fn validate(&self) -> Result<()> {
        if self.schema_version.trim().is_empty() {
            return Err(ZenError::SchemaError("schema_version must not be empty".into()));
        }

        let mut names = HashSet::new();
        let mut commands = HashSet::new();
        for asset in &self.assets {
            if asset.name.trim().is_empty() {
                return Err(ZenError::SchemaError("asset with an empty name".into()));
            }
            if !names.insert(asset.name.as_str()) {
                return Err(ZenError::SchemaError(format!(
                    "duplicate asset name '{}'",
                    asset.name
                )));
            }
            if !commands.insert(asset.command_name()) {
                return Err(ZenError::SchemaError(format!(
                    "asset '{}' reuses command '{}'",
                    asset.name,
                    asset.command_name()
                )));
            }
            if asset.path.starts_with('/') || asset.path.split('/').any(|seg| seg == "..") {
                return Err(ZenError::SchemaError(format!(
                    "asset '{}' has a path outside the repository: {}",
                    asset.name, asset.path
                )));
            }
            if let Some(checksum) = &asset.checksum {
                let hex = checksum.strip_prefix("sha256:").unwrap_or(checksum);
                if checksum.contains(':') && !checksum.starts_with("sha256:") {
                    return Err(ZenError::SchemaError(format!(
                        "asset '{}' uses an unsupported checksum algorithm: {checksum}",
                        asset.name
                    )));
                }
                if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(ZenError::SchemaError(format!(
                        "asset '{}' has a malformed checksum",
                        asset.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// How a tag list filters assets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagMatch {
    /// Asset has at least one of the tags
    #[default]
    Any,
    /// Asset has every tag
    All,
}

/// Filter and page for list queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetFilter {
    /// Only assets of this type
    pub asset_type: Option<AssetType>,
    /// Only assets in this category (exact match)
    pub category: Option<String>,
    /// Tag filter; empty matches everything
    pub tags: Vec<String>,
    /// Only assets tagged with this workflow stage
    pub workflow_stage: Option<String>,
    /// Results to skip
    pub offset: usize,
    /// Maximum results; `None` returns everything after `offset`
    pub limit: Option<usize>,
}

impl AssetFilter {
    /// Match-everything filter
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to `asset_type`
    #[must_use]
    pub const fn with_type(mut self, asset_type: AssetType) -> Self {
        self.asset_type = Some(asset_type);
        self
    }

    /// Restrict to `category`
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Restrict by tags
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to a workflow stage
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.workflow_stage = Some(stage.into());
        self
    }

    /// Set offset and limit
    #[must_use]
    pub const fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    fn matches(&self, asset: &AssetMetadata, tag_match: TagMatch) -> bool {
        if self.asset_type.is_some_and(|t| t != asset.asset_type) {
            return false;
        }
        if self.category.as_ref().is_some_and(|c| *c != asset.category) {
            return false;
        }
        if self
            .workflow_stage
            .as_ref()
            .is_some_and(|stage| !asset.workflow_stages.iter().any(|s| s == stage))
        {
            return false;
        }
        if self.tags.is_empty() {
            return true;
        }
        match tag_match {
            TagMatch::Any => self.tags.iter().any(|t| asset.has_tag(t)),
            TagMatch::All => self.tags.iter().all(|t| asset.has_tag(t)),
        }
    }
}

/// One page of list results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListPage {
    /// Matching assets on this page, ordered by name
    pub results: Vec<AssetMetadata>,
    /// Matching assets across all pages
    pub total: usize,
    /// More results exist after this page
    pub has_more: bool,
}

/// Difference between two manifest versions, by asset name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManifestDiff {
    /// Names only in the new manifest
    pub added: Vec<String>,
    /// Names in both whose content changed
    pub updated: Vec<String>,
    /// Names only in the old manifest
    pub removed: Vec<String>,
}

/// Immutable, indexed view of one manifest
#[derive(Debug)]
pub struct Catalog {
    manifest: Manifest,
    by_name: HashMap<String, usize>,
    by_command: BTreeMap<String, usize>,
}

impl Catalog {
    /// Index `manifest`, sorting assets by name
    #[must_use]
    pub fn new(mut manifest: Manifest) -> Self {
        manifest.assets.sort_by(|a, b| a.name.cmp(&b.name));
        let by_name = manifest
            .assets
            .iter()
            .enumerate()
            .map(|(i, a)| (a.name.clone(), i))
            .collect();

        let by_command = manifest
            .assets
            .iter()
            .enumerate()
            .map(|(i, a)| (a.command_name().to_string(), i))
            .collect();

        Self {
            manifest,
            by_name,
            by_command,
        }
    }

    /// The underlying manifest, assets sorted by name
    #[must_use]
    pub const fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Number of assets
    #[must_use]
    pub fn len(&self) -> usize {
        self.manifest.assets.len()
    }

    /// True when the manifest lists no assets
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.manifest.assets.is_empty()
    }

    /// Asset named `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AssetMetadata> {
        self.by_name.get(name).map(|&i| &self.manifest.assets[i])
    }

    /// Asset whose command is `command`
    #[must_use]
    pub fn by_command(&self, command: &str) -> Option<&AssetMetadata> {
        self.by_command
            .get(command)
            .map(|&i| &self.manifest.assets[i])
    }

    /// All command names, sorted
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.by_command.keys().cloned().collect()
    }

    /// Filter and paginate
    #[must_use]
    pub fn list(&self, filter: &AssetFilter, tag_match: TagMatch) -> ListPage {
        let matching: Vec<&AssetMetadata> = self
            .manifest
            .assets
            .iter()
            .filter(|a| filter.matches(a, tag_match))
            .collect();
        let total = matching.len();

        let results: Vec<AssetMetadata> = matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        let has_more = filter.offset.saturating_add(results.len()) < total;

        ListPage {
            results,
            total,
            has_more,
        }
    }

    /// Changes from `previous` to this catalogue
    #[must_use]
    pub fn diff_from(&self, previous: Option<&Self>) -> ManifestDiff {
        let Some(previous) = previous else {
            return ManifestDiff {
                added: self.manifest.assets.iter().map(|a| a.name.clone()).collect(),
                ..ManifestDiff::default()
            };
        };

        let mut diff = ManifestDiff::default();
        for asset in &self.manifest.assets {
            match previous.get(&asset.name) {
                None => diff.added.push(asset.name.clone()),
                Some(old) if content_changed(old, asset) => diff.updated.push(asset.name.clone()),
                Some(_) => {}
            }
        }
        diff.removed = previous
            .manifest
            .assets
            .iter()
            .filter(|a| self.get(&a.name).is_none())
            .map(|a| a.name.clone())
            .collect();
        diff
    }
}

fn content_changed(old: &AssetMetadata, new: &AssetMetadata) -> bool {
    old.checksum_hex() != new.checksum_hex()
        || old.updated_at != new.updated_at
        || old.path != new.path
}

/// Thread-safe holder of the current catalogue
#[derive(Debug, Default)]
pub struct ManifestRegistry {
    current: RwLock<Option<Arc<Catalog>>>,
    tag_match: TagMatch,
}

impl ManifestRegistry {
    /// Empty registry using `tag_match` for tag filters
    #[must_use]
    pub fn new(tag_match: TagMatch) -> Self {
        Self {
            current: RwLock::new(None),
            tag_match,
        }
    }

    /// Tag semantics fixed at construction
    #[must_use]
    pub const fn tag_match(&self) -> TagMatch {
        self.tag_match
    }

    /// Parse `raw` and replace the current catalogue
    ///
    /// On error the previous catalogue stays in place.
    ///
    /// # Errors
    ///
    /// `SchemaError` from [`Manifest::parse`].
    pub fn load(&self, raw: &[u8]) -> Result<Arc<Catalog>> {
        let manifest = Manifest::parse(raw)?;
        Ok(self.install(manifest))
    }

    /// Replace the current catalogue with `manifest`
    pub fn install(&self, manifest: Manifest) -> Arc<Catalog> {
        let catalog = Arc::new(Catalog::new(manifest));
        *self.current.write() = Some(Arc::clone(&catalog));
        catalog
    }

    /// Current catalogue, if one is loaded
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<Catalog>> {
        self.current.read().clone()
    }

    /// True once a manifest has been loaded
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }

    /// Forget the loaded catalogue
    pub fn reset(&self) {
        *self.current.write() = None;
    }

    /// Metadata for `name`
    ///
    /// # Errors
    ///
    /// `NotFound` when no manifest is loaded or it has no such asset.
    pub fn lookup(&self, name: &str) -> Result<AssetMetadata> {
        self.loaded()?
            .get(name)
            .cloned()
            .ok_or_else(|| ZenError::NotFound(format!("asset '{name}'")))
    }

    /// Filtered, paginated listing
    ///
    /// # Errors
    ///
    /// `NotFound` when no manifest is loaded.
    pub fn list(&self, filter: &AssetFilter) -> Result<ListPage> {
        Ok(self.loaded()?.list(filter, self.tag_match))
    }

    fn loaded(&self) -> Result<Arc<Catalog>> {
        self.snapshot()
            .ok_or_else(|| ZenError::NotFound("asset manifest has not been loaded".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const MANIFEST: &str = r#"
schema_version: "1.0"
version: "2024.05.1"
assets:
  - name: user-story
    command: story
    type: template
    category: planning
    description: User story
    tags: [agile, planning]
    path: templates/user-story.md.tmpl
    format: md
    output_file: story.md
    workflow_stages: [01-align]
    checksum: "sha256:2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae"
  - name: feature-spec
    type: template
    category: documentation
    tags: [ai, technical]
    path: templates/feature-spec.md.tmpl
    workflow_stages: [04-design]
    variables:
      - name: TASK_TITLE
        required: true
  - name: review-prompt
    type: prompt
    category: documentation
    tags: [ai]
    path: prompts/review.md
"#;

    fn registry(tag_match: TagMatch) -> ManifestRegistry {
        let registry = ManifestRegistry::new(tag_match);
        registry.load(MANIFEST.as_bytes()).unwrap();
        registry
    }

    #[test]
    fn test_list_is_sorted_by_name() {
        let page = registry(TagMatch::Any).list(&AssetFilter::all()).unwrap();
        let names: Vec<_> = page.results.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["feature-spec", "review-prompt", "user-story"]);
        assert_eq!(page.total, 3);
        assert!(!page.has_more);
    }

    #[test]
    fn test_filters() {
        let registry = registry(TagMatch::Any);
        let page = registry
            .list(&AssetFilter::all().with_type(AssetType::Template).with_category("documentation"))
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.results[0].name, "feature-spec");

        let page = registry
            .list(&AssetFilter::all().with_stage("01-align"))
            .unwrap();
        assert_eq!(page.results[0].name, "user-story");
    }

    #[test]
    fn test_tag_match_modes() {
        let filter = AssetFilter::all().with_tags(["ai", "technical"]);
        assert_eq!(registry(TagMatch::Any).list(&filter).unwrap().total, 2);
        assert_eq!(registry(TagMatch::All).list(&filter).unwrap().total, 1);
    }

    #[test]
    fn test_pagination_has_more() {
        let registry = registry(TagMatch::Any);
        let first = registry.list(&AssetFilter::all().page(0, 2)).unwrap();
        assert_eq!(first.results.len(), 2);
        assert!(first.has_more);
        let second = registry.list(&AssetFilter::all().page(2, 2)).unwrap();
        assert_eq!(second.results.len(), 1);
        assert!(!second.has_more);
        let beyond = registry.list(&AssetFilter::all().page(10, 2)).unwrap();
        assert!(beyond.results.is_empty());
        assert_eq!(beyond.total, 3);
    }

    #[test]
    fn test_lookup_and_commands() {
        let registry = registry(TagMatch::Any);
        assert_eq!(registry.lookup("user-story").unwrap().command_name(), "story");
        assert_eq!(
            registry.lookup("missing").unwrap_err().kind(),
            ErrorKind::NotFound
        );

        let catalog = registry.snapshot().unwrap();
        assert_eq!(catalog.by_command("story").unwrap().name, "user-story");
        assert_eq!(catalog.by_command("feature-spec").unwrap().name, "feature-spec");
        assert_eq!(catalog.commands(), ["feature-spec", "review-prompt", "story"]);
    }

    #[test]
    fn test_unknown_top_level_key_is_schema_error() {
        let raw = "schema_version: '1'\nassets: []\nsurprise: true\n";
        let err = ManifestRegistry::new(TagMatch::Any)
            .load(raw.as_bytes())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaError);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let raw = r"
schema_version: '1'
assets:
  - { name: a, type: template, path: a.md }
  - { name: a, type: prompt, path: b.md }
";
        assert!(Manifest::parse(raw.as_bytes()).is_err());
    }

    #[test]
    fn test_duplicate_commands_rejected() {
        let raw = r"
schema_version: '1'
assets:
  - { name: user-story, command: story, type: template, path: a.md }
  - { name: story-v2, command: story, type: template, path: b.md }
";
        let err = Manifest::parse(raw.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaError);

        // A command may not shadow another asset's name either
        let raw = r"
schema_version: '1'
assets:
  - { name: story, type: template, path: a.md }
  - { name: user-story, command: story, type: template, path: b.md }
";
        assert!(Manifest::parse(raw.as_bytes()).is_err());
    }

    #[test]
    fn test_escaping_path_rejected() {
        let raw = "schema_version: '1'\nassets:\n  - { name: a, type: template, path: ../etc/passwd }\n";
        assert!(Manifest::parse(raw.as_bytes()).is_err());
    }

    #[test]
    fn test_failed_load_keeps_previous_catalog() {
        let registry = registry(TagMatch::Any);
        assert!(registry.load(b"not: [valid").is_err());
        assert_eq!(registry.list(&AssetFilter::all()).unwrap().total, 3);
    }

    #[test]
    fn test_checksum_hex_strips_prefix() {
        let asset = registry(TagMatch::Any).lookup("user-story").unwrap();
        assert_eq!(
            asset.checksum_hex().unwrap(),
            "2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae"
        );
    }

    #[test]
    fn test_diff() {
        let old = Catalog::new(Manifest::parse(MANIFEST.as_bytes()).unwrap());
        let mut manifest = Manifest::parse(MANIFEST.as_bytes()).unwrap();
        manifest.assets.retain(|a| a.name != "review-prompt");
        manifest.assets[0].path = "templates/story-v2.md".into();
        manifest.assets.push(AssetMetadata {
            name: "bug-report".into(),
            command: None,
            asset_type: AssetType::Template,
            category: "quality".into(),
            description: String::new(),
            tags: vec![],
            path: "templates/bug.md".into(),
            format: None,
            output_file: None,
            workflow_stages: vec![],
            variables: vec![],
            checksum: None,
            updated_at: None,
        });
        let new = Catalog::new(manifest);

        let diff = new.diff_from(Some(&old));
        assert_eq!(diff.added, ["bug-report"]);
        assert_eq!(diff.updated, ["user-story"]);
        assert_eq!(diff.removed, ["review-prompt"]);

        assert_eq!(new.diff_from(None).added.len(), 3);
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let manifest = Manifest::parse(MANIFEST.as_bytes()).unwrap();
        let again = Manifest::parse(manifest.to_yaml().unwrap().as_bytes()).unwrap();
        assert_eq!(manifest, again);
    }
}
