//! Credential records

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::provider::ProviderId;

/// Where a credential was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    /// Passed in by the caller
    Explicit,
    /// Read from a configured secret file
    File,
    /// Read from an environment variable
    Environment,
    /// Typed in at an interactive prompt
    Prompt,
}

/// A provider secret with its metadata
///
/// `Debug` output redacts the secret.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Provider the secret belongs to
    pub provider: ProviderId,
    /// The secret itself
    pub secret: SecretString,
    /// Account email, required by basic-auth providers
    pub email: Option<String>,
    /// When the credential was stored
    pub issued_at: DateTime<Utc>,
    /// When the credential stops being usable
    pub expires_at: Option<DateTime<Utc>>,
    /// How the credential was obtained
    pub source: Option<CredentialSource>,
}

impl Credential {
    /// A credential issued at `issued_at` that never expires
    #[must_use]
    pub fn new(provider: ProviderId, secret: SecretString, issued_at: DateTime<Utc>) -> Self {
        Self {
            provider,
            secret,
            email: None,
            issued_at,
            expires_at: None,
            source: None,
        }
    }

    /// Set the account email
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the expiry
    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Record where the secret came from
    #[must_use]
    pub fn with_source(mut self, source: CredentialSource) -> Self {
        self.source = Some(source);
        self
    }

    /// True once `now` has reached the expiry
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// True when the credential expires within `window` of `now`
    #[must_use]
    pub fn expires_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.expires_at.is_some_and(|at| at - now <= window)
    }

    pub(crate) fn to_record(&self) -> CredentialRecord {
        CredentialRecord {
            provider: self.provider,
            secret: self.secret.expose_secret().to_string(),
            email: self.email.clone(),
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            source: self.source,
        }
    }
}

/// Serialised form used by the persistent backends
///
/// Only ever written encrypted or into the OS vault.
#[derive(Serialize, Deserialize)]
pub(crate) struct CredentialRecord {
    pub provider: ProviderId,
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub issued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<CredentialSource>,
}

impl From<CredentialRecord> for Credential {
    fn from(record: CredentialRecord) -> Self {
        Self {
            provider: record.provider,
            secret: SecretString::from(record.secret),
            email: record.email,
            issued_at: record.issued_at,
            expires_at: record.expires_at,
            source: record.source,
        }
    }
}
