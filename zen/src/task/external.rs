//! External-source snapshots
//!
//! Issue-tracker integrations persist what they fetched under
//! `<task>/metadata/<source>.json` (or `.yaml`). The renderer reads those
//! snapshots back to enrich template variables.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::manifest::{Priority, TaskStatus, TaskType};
use crate::auth::ProviderId;
use crate::error::{Result, ZenError};
use crate::fsutil;
use crate::template::Variables;

/// Directory under a task that holds snapshots
pub const METADATA_DIR: &str = "metadata";

/// The task fields an integration extracted from its response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalTask {
    /// Title
    pub title: Option<String>,
    /// Description body
    pub description: Option<String>,
    /// Status as the tracker names it
    pub status: Option<String>,
    /// Priority as the tracker names it
    pub priority: Option<String>,
    /// Issue type as the tracker names it
    #[serde(rename = "type")]
    pub issue_type: Option<String>,
    /// Assignee handle
    pub assignee: Option<String>,
    /// Labels
    pub labels: Vec<String>,
    /// Web URL of the issue
    pub url: Option<String>,
    /// Creation time
    pub created_at: Option<DateTime<Utc>>,
    /// Last change
    pub updated_at: Option<DateTime<Utc>>,
}

/// A stored issue-tracker response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalSnapshot {
    /// Tracker the data came from
    pub source: ProviderId,
    /// Issue key in the tracker (`PROJ-123`, `#42`)
    pub external_id: String,
    /// When the data was fetched
    pub fetched_at: DateTime<Utc>,
    /// Extracted task fields
    #[serde(default)]
    pub task: ExternalTask,
    /// The tracker's response, verbatim
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl ExternalSnapshot {
    /// File a snapshot for `source` is written to
    #[must_use]
    pub fn path_for(task_dir: &Path, source: ProviderId) -> PathBuf {
        task_dir
            .join(METADATA_DIR)
            .join(format!("{}.json", source.as_str()))
    }

    /// Read the snapshot for `source`, if one is stored
    ///
    /// # Errors
    ///
    /// `SchemaError` when the stored file does not parse.
    pub async fn load(task_dir: &Path, source: ProviderId) -> Result<Option<Self>> {
        let dir = task_dir.join(METADATA_DIR);
        for ext in ["json", "yaml", "yml"] {
            let path = dir.join(format!("{}.{ext}", source.as_str()));
            let raw = match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(ZenError::io(&path, e)),
            };
            let snapshot: Self = if ext == "json" {
                serde_json::from_slice(&raw)?
            } else {
                serde_yaml::from_slice(&raw)?
            };
            if snapshot.source != source {
                return Err(ZenError::SchemaError(format!(
                    "{} holds a {} snapshot",
                    path.display(),
                    snapshot.source
                )));
            }
            debug!(source = %source, path = %path.display(), "loaded external snapshot");
            return Ok(Some(snapshot));
        }
        Ok(None)
    }

    /// Every stored snapshot, in provider order
    ///
    /// # Errors
    ///
    /// As for [`ExternalSnapshot::load`].
    pub async fn load_all(task_dir: &Path) -> Result<Vec<Self>> {
        let mut snapshots = Vec::new();
        for source in ProviderId::ALL {
            if let Some(snapshot) = Self::load(task_dir, source).await? {
                snapshots.push(snapshot);
            }
        }
        Ok(snapshots)
    }

    /// Persist this snapshot as pretty JSON
    ///
    /// # Errors
    ///
    /// I/O errors from the atomic write.
    pub fn save(&self, task_dir: &Path) -> Result<PathBuf> {
        let path = Self::path_for(task_dir, self.source);
        let body = serde_json::to_vec_pretty(self)?;
        fsutil::write_atomic(&path, &body, 0o644, 0o755)?;
        Ok(path)
    }

    /// Canonical status, when the tracker's status is one we know
    #[must_use]
    pub fn status(&self) -> Option<TaskStatus> {
        self.task.status.as_deref().and_then(TaskStatus::from_external)
    }

    /// Canonical priority, when the tracker's priority is one we know
    #[must_use]
    pub fn priority(&self) -> Option<Priority> {
        self.task
            .priority
            .as_deref()
            .and_then(Priority::from_external)
    }

    /// Canonical task type; unknown types map to `task`
    #[must_use]
    pub fn task_type(&self) -> Option<TaskType> {
        self.task.issue_type.as_deref().map(TaskType::from_external)
    }

    /// Template variables from this snapshot
    ///
    /// Every field appears prefixed with the source (`JIRA_STATUS`); the
    /// title, type and mapped status and priority also override the
    /// canonical `TASK_*` variables.
    #[must_use]
    pub fn variables(&self) -> Variables {
        let prefix = self.source.as_str().to_ascii_uppercase();
        let mut vars = Variables::new();
        let mut set = |field: &str, value: serde_json::Value| {
            vars.insert(format!("{prefix}_{field}"), value);
        };

        set("ID", self.external_id.clone().into());
        set("FETCHED_AT", self.fetched_at.to_rfc3339().into());
        let task = &self.task;
        let optional = [
            ("TITLE", &task.title),
            ("DESCRIPTION", &task.description),
            ("STATUS", &task.status),
            ("PRIORITY", &task.priority),
            ("TYPE", &task.issue_type),
            ("ASSIGNEE", &task.assignee),
            ("URL", &task.url),
        ];
        for (field, value) in optional {
            if let Some(value) = value {
                set(field, value.clone().into());
            }
        }
        set("LABELS", task.labels.clone().into());
        if let Some(created) = task.created_at {
            set("CREATED_AT", created.to_rfc3339().into());
        }
        if let Some(updated) = task.updated_at {
            set("UPDATED_AT", updated.to_rfc3339().into());
        }

        if let Some(title) = task.title.as_ref().filter(|t| !t.trim().is_empty()) {
            vars.insert("TASK_TITLE".into(), title.clone().into());
        }
        if let Some(task_type) = self.task_type() {
            vars.insert("TASK_TYPE".into(), task_type.as_str().into());
        }
        if let Some(status) = self.status() {
            vars.insert("TASK_STATUS".into(), status.as_str().into());
        }
        if let Some(priority) = self.priority() {
            vars.insert("TASK_PRIORITY".into(), priority.as_str().into());
        }
        vars
    }
}
