//! Rendering template assets into task directories

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use super::external::ExternalSnapshot;
use super::manifest::TaskManifest;
use super::suggest::suggest;
use crate::assets::manifest::AssetMetadata;
use crate::assets::AssetClient;
use crate::clock::SharedClock;
use crate::error::{Result, ZenError};
use crate::fsutil;
use crate::template::{declared_defaults, TemplateEngine, Variables};

/// Mode of rendered files
pub const FILE_MODE: u32 = 0o644;

/// Mode of directories created for rendered files
pub const DIR_MODE: u32 = 0o755;

/// Resolves asset commands to catalogue entries
#[async_trait]
pub trait CommandCatalog: Send + Sync + std::fmt::Debug {
    /// Asset whose command is `command`
    async fn find_by_command(&self, command: &str) -> Result<Option<AssetMetadata>>;

    /// Every known command
    async fn commands(&self) -> Result<Vec<String>>;
}

#[async_trait]
impl CommandCatalog for AssetClient {
    async fn find_by_command(&self, command: &str) -> Result<Option<AssetMetadata>> {
        Self::find_by_command(self, command).await
    }

    async fn commands(&self) -> Result<Vec<String>> {
        Self::commands(self).await
    }
}

/// Directory a workflow stage's artifacts live in, relative to the task root
#[must_use]
pub fn stage_directory(stage: &str) -> Option<&'static str> {
    match stage {
        "02-discover" => Some("research"),
        "04-design" => Some("design"),
        "05-build" | "06-ship" => Some("execution"),
        "07-learn" => Some("outcomes"),
        _ => None,
    }
}

/// File extension rendered artifacts of `asset` get
#[must_use]
pub fn output_extension(asset: &AssetMetadata) -> String {
    if let Some(format) = asset.format.as_deref().filter(|f| !f.trim().is_empty()) {
        return format.trim_start_matches('.').to_string();
    }
    let file = asset.path.rsplit('/').next().unwrap_or(&asset.path);
    let file = file.strip_suffix(".tmpl").unwrap_or(file);
    Path::new(file)
        .extension()
        .map_or_else(|| "md".to_string(), |e| e.to_string_lossy().into_owned())
}

/// Where rendering `asset` into `task_dir` writes, given an optional override
///
/// # Errors
///
/// `InvalidArgument` when the declared output file escapes the task directory.
pub fn output_path(task_dir: &Path, asset: &AssetMetadata, explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(explicit) = explicit {
        return Ok(task_dir.join(explicit));
    }

    let dir = asset
        .workflow_stages
        .first()
        .and_then(|stage| stage_directory(stage))
        .map_or_else(|| task_dir.to_path_buf(), |sub| task_dir.join(sub));

    let file = match asset.output_file.as_deref().filter(|f| !f.trim().is_empty()) {
        Some(declared) => {
            let declared_path = Path::new(declared);
            if declared_path
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
            {
                return Err(ZenError::InvalidArgument(format!(
                    "asset {} declares an output file outside the task: {declared}",
                    asset.name
                )));
            }
            declared.to_string()
        }
        None => format!("{}.{}", asset.command_name(), output_extension(asset)),
    };
    Ok(dir.join(file))
}

/// A request to render one asset into a task
#[derive(Debug, Clone, Default)]
pub struct RenderRequest {
    /// Asset command to render
    pub command: String,
    /// Task directory
    pub task_dir: PathBuf,
    /// Output path override, relative to the task directory
    pub output: Option<PathBuf>,
    /// Overwrite an existing file
    pub force: bool,
    /// Render without writing
    pub preview: bool,
    /// Caller-supplied variables; these win over every other source
    pub variables: Variables,
}

/// What a render produced
#[derive(Debug, Clone, Serialize)]
pub struct RenderOutcome {
    /// Command that was rendered
    pub command: String,
    /// Asset the command resolved to
    pub asset: String,
    /// Target file
    pub output_path: PathBuf,
    /// Rendered text
    pub content: String,
    /// Whether the file was written
    pub written: bool,
    /// External sources that contributed variables
    pub sources: Vec<String>,
}

/// Renders template assets into task directories
#[derive(Debug)]
pub struct TaskRenderer {
    catalog: Arc<dyn CommandCatalog>,
    engine: Arc<TemplateEngine>,
    clock: SharedClock,
}

impl TaskRenderer {
    /// Renderer resolving commands through `catalog` and rendering with `engine`
    #[must_use]
    pub fn new(
        catalog: Arc<dyn CommandCatalog>,
        engine: Arc<TemplateEngine>,
        clock: SharedClock,
    ) -> Self {
        Self {
            catalog,
            engine,
            clock,
        }
    }

    /// Render `request.command` into `request.task_dir`
    ///
    /// # Errors
    ///
    /// - `TaskManifestMissing` when the task has no manifest
    /// - `AssetUnknown` with suggestions when the command matches no asset
    /// - `AlreadyExists` when the target exists and neither `force` nor
    ///   `preview` is set
    /// - template and asset errors from the engine
    pub async fn render(&self, request: &RenderRequest) -> Result<RenderOutcome> {
        let manifest = TaskManifest::load(&request.task_dir).await?;
        let asset = self.resolve(&request.command).await?;

        let output_path = output_path(&request.task_dir, &asset, request.output.as_deref())?;
        let exists = tokio::fs::try_exists(&output_path)
            .await
            .map_err(|e| ZenError::io(&output_path, e))?;
        if exists && !request.force && !request.preview {
            return Err(ZenError::AlreadyExists(format!(
                "{} (use --force to overwrite)",
                output_path.display()
            )));
        }

        let snapshots = ExternalSnapshot::load_all(&request.task_dir).await?;
        let variables = self.variables(&request.task_dir, &asset, &manifest, &snapshots, &request.variables);

        let binding = self.engine.load_template(&asset.name).await?;
        self.engine
            .validate_variables(&binding, &variables)
            .into_result()?;
        let content = self.engine.render_template(&binding, &variables)?;

        let written = if request.preview {
            debug!(asset = %asset.name, path = %output_path.display(), "preview render");
            false
        } else {
            let (path, body) = (output_path.clone(), content.clone().into_bytes());
            tokio::task::spawn_blocking(move || fsutil::write_atomic(&path, &body, FILE_MODE, DIR_MODE))
                .await
                .map_err(|e| ZenError::StorageUnavailable(format!("render write task failed: {e}")))??;
            info!(asset = %asset.name, path = %output_path.display(), "rendered template");
            true
        };

        Ok(RenderOutcome {
            command: request.command.clone(),
            asset: asset.name,
            output_path,
            content,
            written,
            sources: snapshots.iter().map(|s| s.source.to_string()).collect(),
        })
    }

    async fn resolve(&self, command: &str) -> Result<AssetMetadata> {
        if let Some(asset) = self.catalog.find_by_command(command).await? {
            return Ok(asset);
        }
        let commands = self.catalog.commands().await?;
        Err(ZenError::AssetUnknown {
            command: command.to_string(),
            suggestions: suggest(command, &commands),
        })
    }

    /// Variables for one render: defaults, then the task manifest, then
    /// external snapshots, then caller overrides
    fn variables(
        &self,
        task_dir: &Path,
        asset: &AssetMetadata,
        manifest: &TaskManifest,
        snapshots: &[ExternalSnapshot],
        overrides: &Variables,
    ) -> Variables {
        let now = self.clock.now();
        let dir_name = task_dir
            .file_name()
            .map_or_else(|| manifest.id.clone(), |n| n.to_string_lossy().into_owned());

        let mut vars = Variables::new();
        let defaults = [
            ("TASK_ID", dir_name.clone()),
            ("TASK_TITLE", dir_name),
            ("TASK_TYPE", "task".to_string()),
            ("TASK_STATUS", "proposed".to_string()),
            ("TASK_PRIORITY", "P2".to_string()),
            ("OWNER_NAME", String::new()),
            ("TEAM_NAME", String::new()),
            ("CURRENT_STAGE", "01-align".to_string()),
            ("CURRENT_DATE", now.format("%Y-%m-%d").to_string()),
            ("CURRENT_TIME", now.to_rfc3339()),
            ("TASK_DIR", task_dir.display().to_string()),
            ("ASSET_NAME", asset.name.clone()),
            ("COMMAND", asset.command_name().to_string()),
        ];
        for (key, value) in defaults {
            vars.insert(key.to_string(), value.into());
        }
        vars.extend(declared_defaults(asset));
        vars.extend(manifest.variables());
        for snapshot in snapshots {
            vars.extend(snapshot.variables());
        }
        vars.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::manifest::AssetType;

    fn asset(stages: &[&str], output_file: Option<&str>) -> AssetMetadata {
        AssetMetadata {
            name: "feature-spec".into(),
            command: Some("feature-spec".into()),
            asset_type: AssetType::Template,
            category: "design".into(),
            description: String::new(),
            tags: Vec::new(),
            path: "templates/feature-spec.md.tmpl".into(),
            format: None,
            output_file: output_file.map(String::from),
            workflow_stages: stages.iter().map(ToString::to_string).collect(),
            variables: Vec::new(),
            checksum: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_stage_directories() {
        let root = Path::new("/tasks/T-1");
        let cases = [
            ("02-discover", "/tasks/T-1/research/feature-spec.md"),
            ("04-design", "/tasks/T-1/design/feature-spec.md"),
            ("05-build", "/tasks/T-1/execution/feature-spec.md"),
            ("06-ship", "/tasks/T-1/execution/feature-spec.md"),
            ("07-learn", "/tasks/T-1/outcomes/feature-spec.md"),
            ("01-align", "/tasks/T-1/feature-spec.md"),
        ];
        for (stage, expected) in cases {
            let path = output_path(root, &asset(&[stage], None), None).unwrap();
            assert_eq!(path, PathBuf::from(expected), "{stage}");
        }
    }

    #[test]
    fn test_output_path_precedence() {
        let root = Path::new("/tasks/T-1");
        let declared = asset(&["04-design"], Some("spec.md"));
        assert_eq!(
            output_path(root, &declared, Some(Path::new("notes/x.md"))).unwrap(),
            PathBuf::from("/tasks/T-1/notes/x.md")
        );
        assert_eq!(
            output_path(root, &declared, None).unwrap(),
            PathBuf::from("/tasks/T-1/design/spec.md")
        );
        assert!(output_path(root, &asset(&[], Some("../escape.md")), None).is_err());
    }

    #[test]
    fn test_extension_falls_back_to_the_template_path() {
        let mut a = asset(&[], None);
        assert_eq!(output_extension(&a), "md");
        a.path = "schemas/openapi.yaml.tmpl".into();
        assert_eq!(output_extension(&a), "yaml");
        a.format = Some(".json".into());
        assert_eq!(output_extension(&a), "json");
    }
}
