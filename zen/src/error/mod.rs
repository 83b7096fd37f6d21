//! Error types and error handling
//!
//! Every failure surfaced by the library is a [`ZenError`]. Variants map
//! one-to-one onto the error kinds commands care about, so callers can
//! match on [`ZenError::kind`] without parsing messages.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

/// Result type used across the crate
pub type Result<T, E = ZenError> = std::result::Result<T, E>;

/// Library error type
///
/// The type is `Clone` so that a single in-flight fetch can hand the same
/// terminal error to every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum ZenError {
    /// Caller supplied an invalid value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Entity exists and overwriting was not requested
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// No usable credential, or the provider rejected it
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    /// Provider accepted the credential but denied access
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Interactive prompting was required but is disabled
    #[error("Prompting is disabled and no credential was found for {0}")]
    PromptDisabled(String),

    /// Remote endpoint unreachable or misbehaving
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Deadline elapsed before the operation completed
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Provider rate limit exhausted
    #[error("Rate limited{}", retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited {
        /// Seconds the provider asked us to wait, when advertised
        retry_after_secs: Option<u64>,
    },

    /// Content digest differs from the declared one
    #[error("Checksum mismatch for {key}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Cache key or asset name
        key: String,
        /// Declared digest
        expected: String,
        /// Digest of the bytes actually seen
        actual: String,
    },

    /// Document does not follow the expected schema
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Storage backend cannot be used
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A single cache entry would exceed the cache size limit
    #[error("Entry {key} of {size} bytes exceeds the cache limit of {limit} bytes")]
    EntryTooLarge {
        /// Cache key
        key: String,
        /// Size of the rejected entry
        size: u64,
        /// Configured cache limit
        limit: u64,
    },

    /// Secret could not be encrypted or decrypted
    #[error("Encryption error: {0}")]
    EncryptionError(String),

    /// Template source is structurally invalid
    #[error("Template compile error in {name}{}: {message}", line.map(|l| format!(" (line {l})")).unwrap_or_default())]
    CompileError {
        /// Template name
        name: String,
        /// Line of the offending construct, when known
        line: Option<usize>,
        /// Parser message
        message: String,
    },

    /// Strict render referenced variables that were not supplied
    #[error("Missing template variables: {}", names.join(", "))]
    VariableMissing {
        /// Missing variable names, sorted
        names: Vec<String>,
    },

    /// Template failed while evaluating
    #[error("Template render error in {name}{}: {message}", line.map(|l| format!(" (line {l})")).unwrap_or_default())]
    RenderError {
        /// Template name
        name: String,
        /// Line of the failing expression, when known
        line: Option<usize>,
        /// Evaluation message
        message: String,
    },

    /// No task manifest in the task directory
    #[error("Task manifest not found: {}", .0.display())]
    TaskManifestMissing(PathBuf),

    /// Command does not name any known asset
    #[error("Unknown asset command '{command}'{}", format_suggestions(suggestions))]
    AssetUnknown {
        /// The command the caller asked for
        command: String,
        /// Close matches, best first
        suggestions: Vec<String>,
    },

    /// Operation was cancelled before it finished
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Local filesystem failure
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        source: Arc<std::io::Error>,
    },

    /// Error annotated with the operation and key that produced it
    #[error("{operation} {key}: {source}")]
    Context {
        /// Operation name (for example `get`)
        operation: &'static str,
        /// Key or name the operation was acting on
        key: String,
        /// Original error
        source: Box<ZenError>,
    },
}

fn format_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}

/// Fieldless discriminant of [`ZenError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    NotAuthenticated,
    Forbidden,
    PromptDisabled,
    NetworkError,
    Timeout,
    RateLimited,
    ChecksumMismatch,
    SchemaError,
    StorageUnavailable,
    EntryTooLarge,
    EncryptionError,
    CompileError,
    VariableMissing,
    RenderError,
    TaskManifestMissing,
    AssetUnknown,
    Cancelled,
    Io,
}

impl ZenError {
    /// Build an I/O error for `path`
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source: Arc::new(source),
        }
    }

    /// Attach operation and key context without changing the kind
    #[must_use]
    pub fn with_context(self, operation: &'static str, key: impl Into<String>) -> Self {
        match self {
            already @ Self::Context { .. } => already,
            other => Self::Context {
                operation,
                key: key.into(),
                source: Box::new(other),
            },
        }
    }

    /// Strip any context wrappers
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// The kind of this error, looking through context wrappers
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::NotAuthenticated(_) => ErrorKind::NotAuthenticated,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::PromptDisabled(_) => ErrorKind::PromptDisabled,
            Self::NetworkError(_) => ErrorKind::NetworkError,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Self::SchemaError(_) => ErrorKind::SchemaError,
            Self::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            Self::EntryTooLarge { .. } => ErrorKind::EntryTooLarge,
            Self::EncryptionError(_) => ErrorKind::EncryptionError,
            Self::CompileError { .. } => ErrorKind::CompileError,
            Self::VariableMissing { .. } => ErrorKind::VariableMissing,
            Self::RenderError { .. } => ErrorKind::RenderError,
            Self::TaskManifestMissing(_) => ErrorKind::TaskManifestMissing,
            Self::AssetUnknown { .. } => ErrorKind::AssetUnknown,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Io { .. } | Self::Context { .. } => ErrorKind::Io,
        }
    }

    /// True for failures a later retry might not hit
    #[must_use]
    pub fn is_network_class(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NetworkError | ErrorKind::Timeout | ErrorKind::RateLimited
        )
    }

    /// True for authentication and authorization failures
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotAuthenticated | ErrorKind::Forbidden | ErrorKind::PromptDisabled
        )
    }

    /// Process exit code for this error
    ///
    /// `1` generic failure, `2` user cancellation, `4` authentication failure.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.is_auth() {
            4
        } else if self.kind() == ErrorKind::Cancelled {
            2
        } else {
            1
        }
    }
}

impl From<serde_yaml::Error> for ZenError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::SchemaError(err.to_string())
    }
}

impl From<serde_json::Error> for ZenError {
    fn from(err: serde_json::Error) -> Self {
        Self::SchemaError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_preserves_kind() {
        let err = ZenError::NotFound("asset:demo".into()).with_context("get", "demo");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().starts_with("get demo:"));
    }

    #[test]
    fn test_context_is_not_nested_twice() {
        let err = ZenError::Timeout("x".into())
            .with_context("get", "a")
            .with_context("sync", "b");
        assert!(err.to_string().starts_with("get a:"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ZenError::NotAuthenticated("github".into()).exit_code(), 4);
        assert_eq!(ZenError::Forbidden("github".into()).exit_code(), 4);
        assert_eq!(ZenError::PromptDisabled("github".into()).exit_code(), 4);
        assert_eq!(ZenError::Cancelled("ctrl-c".into()).exit_code(), 2);
        assert_eq!(ZenError::NetworkError("reset".into()).exit_code(), 1);
    }

    #[test]
    fn test_rate_limited_message() {
        let err = ZenError::RateLimited {
            retry_after_secs: Some(30),
        };
        assert_eq!(err.to_string(), "Rate limited (retry after 30s)");
        let err = ZenError::RateLimited {
            retry_after_secs: None,
        };
        assert_eq!(err.to_string(), "Rate limited");
    }

    #[test]
    fn test_asset_unknown_lists_suggestions() {
        let err = ZenError::AssetUnknown {
            command: "feature".into(),
            suggestions: vec!["feature-spec".into(), "feature-brief".into()],
        };
        assert!(err.to_string().contains("did you mean: feature-spec, feature-brief?"));
    }

    #[test]
    fn test_errors_are_clone() {
        let err = ZenError::io("/tmp/x", std::io::Error::other("boom"));
        let copy = err.clone();
        assert_eq!(copy.kind(), ErrorKind::Io);
    }
}
