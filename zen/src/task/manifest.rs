//! The local task manifest

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ZenError};
use crate::template::Variables;

/// File name of the task manifest inside a task directory
pub const TASK_MANIFEST_FILE: &str = "manifest.yaml";

/// Canonical task types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// User-facing feature work
    Story,
    /// Defect
    Bug,
    /// Group of stories
    Epic,
    /// Time-boxed investigation
    Spike,
    /// Anything else
    #[default]
    Task,
}

impl TaskType {
    /// Lowercase identifier
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Story => "story",
            Self::Bug => "bug",
            Self::Epic => "epic",
            Self::Spike => "spike",
            Self::Task => "task",
        }
    }

    /// Map an external tracker's issue type; unknown types become [`TaskType::Task`]
    #[must_use]
    pub fn from_external(raw: &str) -> Self {
        match normalize(raw).as_str() {
            "story" | "user story" => Self::Story,
            "bug" | "defect" => Self::Bug,
            "epic" => Self::Epic,
            "spike" => Self::Spike,
            _ => Self::Task,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical task statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started
    #[default]
    Proposed,
    /// Being worked on
    InProgress,
    /// Waiting on something else
    Blocked,
    /// Finished
    Completed,
}

impl TaskStatus {
    /// Lowercase identifier
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
        }
    }

    /// Map an external tracker's status onto the canonical set
    #[must_use]
    pub fn from_external(raw: &str) -> Option<Self> {
        match normalize(raw).as_str() {
            "open" | "new" | "proposed" => Some(Self::Proposed),
            "in progress" | "doing" => Some(Self::InProgress),
            "done" | "closed" | "resolved" | "completed" => Some(Self::Completed),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical priorities, P0 highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Priority {
    /// Critical
    P0,
    /// High
    P1,
    /// Medium
    #[default]
    P2,
    /// Low
    P3,
}

impl Priority {
    /// `P0` to `P3`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        }
    }

    /// Map an external tracker's priority onto the canonical set
    #[must_use]
    pub fn from_external(raw: &str) -> Option<Self> {
        match normalize(raw).as_str() {
            "highest" | "critical" | "p0" => Some(Self::P0),
            "high" | "p1" => Some(Self::P1),
            "medium" | "p2" => Some(Self::P2),
            "low" | "lowest" | "p3" => Some(Self::P3),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ZenError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_external(s)
            .ok_or_else(|| ZenError::InvalidArgument(format!("unknown priority '{s}'")))
    }
}

fn normalize(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Workflow position of a task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowState {
    /// Stage the task is in
    pub current_stage: Option<String>,
    /// Stages already finished
    pub completed_stages: Vec<String>,
}

/// Task state stored in `<task>/manifest.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskManifest {
    /// Task id; equal to the task directory name
    pub id: String,
    /// Title
    #[serde(default)]
    pub title: String,
    /// Task type
    #[serde(rename = "type", default)]
    pub task_type: TaskType,
    /// Status
    #[serde(default)]
    pub status: TaskStatus,
    /// Priority
    #[serde(default)]
    pub priority: Priority,
    /// Owner handle
    #[serde(default)]
    pub owner: String,
    /// Owning team
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    /// Free-form labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    /// Creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Workflow position
    #[serde(default)]
    pub workflow: WorkflowState,
    /// Extra fields exposed to templates under their own names
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_fields: BTreeMap<String, serde_json::Value>,
}

impl TaskManifest {
    /// Path of the manifest inside `task_dir`
    #[must_use]
    pub fn path_in(task_dir: &Path) -> PathBuf {
        task_dir.join(TASK_MANIFEST_FILE)
    }

    /// Read the manifest of `task_dir`
    ///
    /// # Errors
    ///
    /// `TaskManifestMissing` when there is no manifest, `SchemaError` when it
    /// does not parse or its id differs from the directory name.
    pub async fn load(task_dir: &Path) -> Result<Self> {
        let path = Self::path_in(task_dir);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ZenError::TaskManifestMissing(path));
            }
            Err(e) => return Err(ZenError::io(&path, e)),
        };
        let manifest = Self::parse(&raw)?;

        let dir_name = tokio::fs::canonicalize(task_dir)
            .await
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()));
        if let Some(dir_name) = dir_name {
            if dir_name != manifest.id {
                return Err(ZenError::SchemaError(format!(
                    "task id '{}' does not match its directory '{dir_name}'",
                    manifest.id
                )));
            }
        }
        Ok(manifest)
    }

    /// Parse manifest YAML
    ///
    /// # Errors
    ///
    /// `SchemaError` for malformed YAML or an empty id.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let manifest: Self = serde_yaml::from_slice(raw)?;
        if manifest.id.trim().is_empty() {
            return Err(ZenError::SchemaError("task id must not be empty".into()));
        }
        Ok(manifest)
    }

    /// Template variables describing this task
    #[must_use]
    pub fn variables(&self) -> Variables {
        let mut vars = Variables::new();
        let mut set = |key: &str, value: serde_json::Value| {
            vars.insert(key.to_string(), value);
        };
        set("TASK_ID", self.id.clone().into());
        if !self.title.is_empty() {
            set("TASK_TITLE", self.title.clone().into());
        }
        set("TASK_TYPE", self.task_type.as_str().into());
        set("TASK_STATUS", self.status.as_str().into());
        set("TASK_PRIORITY", self.priority.as_str().into());
        if !self.owner.is_empty() {
            set("OWNER_NAME", self.owner.clone().into());
        }
        if let Some(team) = &self.team {
            set("TEAM_NAME", team.clone().into());
        }
        set("LABELS", self.labels.clone().into());
        if let Some(created) = self.created_at {
            set("CREATED_DATE", created.format("%Y-%m-%d").to_string().into());
            set("CREATED_AT", created.to_rfc3339().into());
        }
        if let Some(updated) = self.updated_at {
            set("UPDATED_DATE", updated.format("%Y-%m-%d").to_string().into());
        }
        if let Some(stage) = &self.workflow.current_stage {
            set("CURRENT_STAGE", stage.clone().into());
        }
        set(
            "COMPLETED_STAGES",
            self.workflow.completed_stages.clone().into(),
        );
        for (key, value) in &self.custom_fields {
            set(key, value.clone());
        }
        vars
    }
}
