//! Auth manager
//!
//! Resolves, validates, refreshes and revokes provider credentials. It is
//! the only component that touches the credential store, and the asset
//! fetcher asks it for the credential to attach to each request.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::credential::{Credential, CredentialSource};
use super::prompt::Prompter;
use super::provider::{Identity, ProviderDescriptor, ProviderId};
use super::store::{open_store, CredentialStore, StorageType};
use crate::clock::{self, SharedClock};
use crate::config::{AuthSettings, ZenConfig};
use crate::error::{ErrorKind, Result, ZenError};
use crate::http::HttpTransport;

/// Environment lookup used when probing for secrets
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Credentials expiring within this window are re-resolved by `refresh`
const REFRESH_WINDOW_MINUTES: i64 = 5;

/// Caller-supplied inputs to [`AuthManager::authenticate`]
#[derive(Debug, Default, Clone)]
pub struct AuthenticateOptions {
    /// Secret given directly (for example `--token`)
    pub secret: Option<SecretString>,
    /// Account email for basic-auth providers
    pub email: Option<String>,
    /// Expiry to record with the credential
    pub expires_at: Option<DateTime<Utc>>,
}

/// Summary of a provider and its stored credential
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    /// Provider id
    pub provider: ProviderId,
    /// Human readable name
    pub display_name: &'static str,
    /// Environment variables consulted, highest priority first
    pub env_vars: Vec<&'static str>,
    /// A usable credential is stored
    pub authenticated: bool,
    /// Where the stored credential came from
    pub source: Option<CredentialSource>,
    /// Account email
    pub email: Option<String>,
    /// When the credential was stored
    pub issued_at: Option<DateTime<Utc>>,
    /// When the credential expires
    pub expires_at: Option<DateTime<Utc>>,
}

/// Resolves and manages provider credentials
pub struct AuthManager {
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn HttpTransport>,
    prompter: Option<Arc<dyn Prompter>>,
    clock: SharedClock,
    env: EnvLookup,
    token_files: HashMap<String, PathBuf>,
    prompt_disabled: bool,
    jira_base_url: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager")
            .field("store", &self.store)
            .field("prompt_disabled", &self.prompt_disabled)
            .finish_non_exhaustive()
    }
}

impl AuthManager {
    /// Manager over `store`, probing the process environment
    pub fn new(store: Arc<dyn CredentialStore>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            store,
            transport,
            prompter: None,
            clock: clock::system(),
            env: Arc::new(|name| std::env::var(name).ok()),
            token_files: HashMap::new(),
            prompt_disabled: false,
            jira_base_url: None,
            timeout: Duration::from_secs(15),
        }
    }

    /// Manager configured from `config`, opening the configured backend
    ///
    /// # Errors
    ///
    /// `StorageUnavailable` when the configured backend cannot be used.
    pub fn from_config(config: &ZenConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        let store = open_store(&config.auth)?;
        Ok(Self::new(store, transport)
            .with_settings(&config.auth)
            .with_timeout(config.assets.request_timeout()))
    }

    /// Apply prompt, token-file and Jira settings
    #[must_use]
    pub fn with_settings(mut self, settings: &AuthSettings) -> Self {
        self.token_files.clone_from(&settings.token_files);
        self.prompt_disabled = settings.prompt_disabled;
        self.jira_base_url.clone_from(&settings.jira_base_url);
        self
    }

    /// Use `prompter` as the last-resort secret source
    #[must_use]
    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    /// Never prompt
    #[must_use]
    pub const fn with_prompt_disabled(mut self, disabled: bool) -> Self {
        self.prompt_disabled = disabled;
        self
    }

    /// Use `clock` for issue and expiry times
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Read environment variables from `vars` instead of the process
    #[must_use]
    pub fn with_env(mut self, vars: HashMap<String, String>) -> Self {
        self.env = Arc::new(move |name| vars.get(name).cloned());
        self
    }

    /// Read a secret for `provider` from `path`
    #[must_use]
    pub fn with_token_file(mut self, provider: ProviderId, path: impl Into<PathBuf>) -> Self {
        self.token_files
            .insert(provider.as_str().to_string(), path.into());
        self
    }

    /// Timeout for identity probes
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Backend in use
    #[must_use]
    pub fn storage_type(&self) -> StorageType {
        self.store.storage_type()
    }

    /// Acquire a secret and persist it
    ///
    /// Sources are tried in order: the explicit value in `options`, the
    /// configured secret file, the provider's environment variables, and
    /// finally the interactive prompt.
    ///
    /// # Errors
    ///
    /// `PromptDisabled` when no non-interactive source yielded a secret and
    /// prompting is off, `Cancelled` when the user dismissed the prompt,
    /// plus any store error.
    pub async fn authenticate(
        &self,
        provider: ProviderId,
        options: AuthenticateOptions,
    ) -> Result<Credential> {
        let descriptor = provider.descriptor();

        let (secret, source) = match options.secret.filter(|s| !s.expose_secret().trim().is_empty()) {
            Some(secret) => (secret, CredentialSource::Explicit),
            None => match self.resolve_non_interactive(descriptor).await? {
                Some(found) => found,
                None => (self.prompt_secret(descriptor).await?, CredentialSource::Prompt),
            },
        };

        let mut email = options.email.or_else(|| self.env_email(descriptor));
        if email.is_none() && source == CredentialSource::Prompt {
            email = self.prompt_email(descriptor).await?;
        }

        let mut credential = Credential::new(provider, secret, self.clock.now()).with_source(source);
        credential.email = email;
        credential.expires_at = options.expires_at;

        self.store.put(&credential).await?;
        info!(provider = %provider, source = ?source, "stored credential");
        Ok(credential)
    }

    /// Stored credential for `provider`
    ///
    /// Expired credentials are deleted and reported as missing.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` when nothing usable is stored.
    pub async fn get_credentials(&self, provider: ProviderId) -> Result<Credential> {
        let credential = match self.store.get(provider).await {
            Ok(credential) => credential,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ZenError::NotAuthenticated(format!(
                    "no credential stored for {provider}; run `zen auth login {provider}`"
                )))
            }
            Err(e) => return Err(e),
        };

        if credential.is_expired(self.clock.now()) {
            warn!(provider = %provider, "stored credential has expired");
            self.store.delete(provider).await?;
            return Err(ZenError::NotAuthenticated(format!(
                "credential for {provider} has expired"
            )));
        }
        Ok(credential)
    }

    /// Credential to attach to a request for `provider`
    ///
    /// Prefers the stored credential and otherwise falls back to the
    /// non-interactive sources without persisting anything. `None` means
    /// the request goes out anonymously.
    ///
    /// # Errors
    ///
    /// Store failures other than "nothing stored".
    pub async fn credential_for_request(&self, provider: ProviderId) -> Result<Option<Credential>> {
        match self.get_credentials(provider).await {
            Ok(credential) => return Ok(Some(credential)),
            Err(e) if e.kind() == ErrorKind::NotAuthenticated => {}
            Err(e) => return Err(e),
        }
        let descriptor = provider.descriptor();
        Ok(self.resolve_non_interactive(descriptor).await?.map(|(secret, source)| {
            let mut credential =
                Credential::new(provider, secret, self.clock.now()).with_source(source);
            credential.email = self.env_email(descriptor);
            credential
        }))
    }

    /// True when a usable credential is stored; no network I/O
    pub async fn is_authenticated(&self, provider: ProviderId) -> bool {
        match self.store.get(provider).await {
            Ok(credential) => !credential.is_expired(self.clock.now()),
            Err(_) => false,
        }
    }

    /// Ask the provider who the stored credential belongs to
    ///
    /// A discovered email is saved onto the credential.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` when the provider rejects the secret, `Forbidden`
    /// when it denies the identity endpoint, `NetworkError`/`Timeout` when
    /// it cannot be reached, `SchemaError` for a malformed identity payload.
    pub async fn validate(&self, provider: ProviderId) -> Result<Identity> {
        let credential = self.get_credentials(provider).await?;
        let descriptor = provider.descriptor();

        let base = match provider {
            ProviderId::Jira => self.jira_base_url.as_deref(),
            _ => None,
        };
        let request = descriptor.authorize(descriptor.identity_request(base)?, &credential)?;
        let response = self.transport.send(request, self.timeout).await?;

        let status = response.status.as_u16();
        debug!(provider = %provider, status, "identity probe finished");
        match status {
            200..=299 => {}
            401 => {
                return Err(ZenError::NotAuthenticated(format!(
                    "{} rejected the stored credential",
                    descriptor.display_name
                )))
            }
            403 => {
                return Err(ZenError::Forbidden(format!(
                    "{} denied access to the identity endpoint",
                    descriptor.display_name
                )))
            }
            429 => {
                return Err(ZenError::RateLimited {
                    retry_after_secs: response
                        .header_str("retry-after")
                        .and_then(|v| v.trim().parse().ok()),
                })
            }
            other => {
                return Err(ZenError::NetworkError(format!(
                    "{} identity endpoint returned HTTP {other}",
                    descriptor.display_name
                )))
            }
        }

        let identity = descriptor.parse_identity(&response.body).ok_or_else(|| {
            ZenError::SchemaError(format!(
                "{} returned a malformed identity payload",
                descriptor.display_name
            ))
        })?;

        if credential.email.is_none() {
            if let Some(email) = identity.email.clone() {
                self.store.put(&credential.with_email(email)).await?;
            }
        }
        Ok(identity)
    }

    /// Re-resolve a credential that is expired or about to expire
    ///
    /// Only non-interactive sources are consulted. A credential that is
    /// still comfortably valid is returned unchanged.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` when no fresh secret can be found.
    pub async fn refresh(&self, provider: ProviderId) -> Result<Credential> {
        let now = self.clock.now();
        let existing = match self.store.get(provider).await {
            Ok(credential) => Some(credential),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        if let Some(credential) = &existing {
            if !credential.expires_within(now, chrono::Duration::minutes(REFRESH_WINDOW_MINUTES)) {
                return Ok(credential.clone());
            }
        }

        let descriptor = provider.descriptor();
        let (secret, source) = self.resolve_non_interactive(descriptor).await?.ok_or_else(|| {
            ZenError::NotAuthenticated(format!(
                "no fresh credential available for {provider}; run `zen auth login {provider}`"
            ))
        })?;

        let mut credential = Credential::new(provider, secret, now).with_source(source);
        credential.email = existing
            .and_then(|c| c.email)
            .or_else(|| self.env_email(descriptor));
        self.store.put(&credential).await?;
        info!(provider = %provider, "refreshed credential");
        Ok(credential)
    }

    /// Providers holding a credential
    ///
    /// # Errors
    ///
    /// Store read failures.
    pub async fn list_providers(&self) -> Result<Vec<ProviderId>> {
        self.store.list().await
    }

    /// Remove the credential for `provider`; idempotent
    ///
    /// # Errors
    ///
    /// Store write failures.
    pub async fn delete(&self, provider: ProviderId) -> Result<()> {
        self.store.delete(provider).await?;
        info!(provider = %provider, "removed credential");
        Ok(())
    }

    /// Descriptor and credential status for `provider`; no network I/O
    ///
    /// # Errors
    ///
    /// Store read failures other than "nothing stored".
    pub async fn provider_info(&self, provider: ProviderId) -> Result<ProviderInfo> {
        let descriptor = provider.descriptor();
        let stored = match self.store.get(provider).await {
            Ok(credential) => Some(credential),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        let now = self.clock.now();

        Ok(ProviderInfo {
            provider,
            display_name: descriptor.display_name,
            env_vars: descriptor.env_vars.to_vec(),
            authenticated: stored.as_ref().is_some_and(|c| !c.is_expired(now)),
            source: stored.as_ref().and_then(|c| c.source),
            email: stored.as_ref().and_then(|c| c.email.clone()),
            issued_at: stored.as_ref().map(|c| c.issued_at),
            expires_at: stored.and_then(|c| c.expires_at),
        })
    }

    async fn resolve_non_interactive(
        &self,
        descriptor: &ProviderDescriptor,
    ) -> Result<Option<(SecretString, CredentialSource)>> {
        if let Some(path) = self.token_files.get(descriptor.id.as_str()) {
            match tokio::fs::read_to_string(path).await {
                Ok(contents) if !contents.trim().is_empty() => {
                    debug!(provider = %descriptor.id, path = %path.display(), "using secret file");
                    return Ok(Some((
                        SecretString::from(contents.trim().to_string()),
                        CredentialSource::File,
                    )));
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ZenError::io(path, e)),
            }
        }

        for name in descriptor.env_vars {
            if let Some(value) = (self.env)(name).filter(|v| !v.trim().is_empty()) {
                debug!(provider = %descriptor.id, var = name, "using environment secret");
                return Ok(Some((
                    SecretString::from(value.trim().to_string()),
                    CredentialSource::Environment,
                )));
            }
        }
        Ok(None)
    }

    fn env_email(&self, descriptor: &ProviderDescriptor) -> Option<String> {
        descriptor
            .email_env_vars
            .iter()
            .find_map(|name| (self.env)(name).filter(|v| !v.trim().is_empty()))
    }

    async fn prompt_secret(&self, descriptor: &'static ProviderDescriptor) -> Result<SecretString> {
        let prompter = match (&self.prompter, self.prompt_disabled) {
            (Some(prompter), false) => Arc::clone(prompter),
            _ => return Err(ZenError::PromptDisabled(descriptor.id.to_string())),
        };
        let answer = tokio::task::spawn_blocking(move || prompter.secret(descriptor))
            .await
            .map_err(|e| ZenError::Cancelled(format!("prompt aborted: {e}")))??;

        answer
            .filter(|s| !s.expose_secret().trim().is_empty())
            .ok_or_else(|| ZenError::Cancelled(format!("no secret entered for {}", descriptor.id)))
    }

    async fn prompt_email(&self, descriptor: &'static ProviderDescriptor) -> Result<Option<String>> {
        if descriptor.email_env_vars.is_empty() || self.prompt_disabled {
            return Ok(None);
        }
        let Some(prompter) = self.prompter.clone() else {
            return Ok(None);
        };
        tokio::task::spawn_blocking(move || prompter.email(descriptor))
            .await
            .map_err(|e| ZenError::Cancelled(format!("prompt aborted: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::MemoryStore;
    use crate::clock::ManualClock;
    use crate::http::HttpResponse;
    use crate::testing::{MockTransport, StaticPrompter};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn manager(transport: Arc<MockTransport>) -> AuthManager {
        AuthManager::new(Arc::new(MemoryStore::new()), transport).with_env(HashMap::new())
    }

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_explicit_secret_wins() {
        let auth = manager(Arc::new(MockTransport::new()))
            .with_env(env(&[("GITHUB_TOKEN", "from-env")]));
        let credential = auth
            .authenticate(
                ProviderId::Github,
                AuthenticateOptions {
                    secret: Some(SecretString::from("explicit")),
                    ..AuthenticateOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(credential.secret.expose_secret(), "explicit");
        assert_eq!(credential.source, Some(CredentialSource::Explicit));
    }

    #[tokio::test]
    async fn test_file_beats_environment() {
        let dir = TempDir::new().unwrap();
        let token_file = dir.path().join("gh-token");
        std::fs::write(&token_file, "from-file\n").unwrap();

        let auth = manager(Arc::new(MockTransport::new()))
            .with_env(env(&[("GITHUB_TOKEN", "from-env")]))
            .with_token_file(ProviderId::Github, &token_file);
        let credential = auth
            .authenticate(ProviderId::Github, AuthenticateOptions::default())
            .await
            .unwrap();
        assert_eq!(credential.secret.expose_secret(), "from-file");
    }

    #[tokio::test]
    async fn test_env_vars_follow_declared_order() {
        let auth = manager(Arc::new(MockTransport::new()))
            .with_env(env(&[("GH_TOKEN", "third"), ("GITHUB_TOKEN", "second")]));
        let credential = auth
            .authenticate(ProviderId::Github, AuthenticateOptions::default())
            .await
            .unwrap();
        assert_eq!(credential.secret.expose_secret(), "second");
        assert_eq!(credential.source, Some(CredentialSource::Environment));
    }

    #[tokio::test]
    async fn test_prompt_is_last_resort() {
        let auth = manager(Arc::new(MockTransport::new()))
            .with_prompter(Arc::new(StaticPrompter::new("typed")));
        let credential = auth
            .authenticate(ProviderId::Gitlab, AuthenticateOptions::default())
            .await
            .unwrap();
        assert_eq!(credential.secret.expose_secret(), "typed");
        assert_eq!(credential.source, Some(CredentialSource::Prompt));
    }

    #[tokio::test]
    async fn test_prompt_disabled() {
        let auth = manager(Arc::new(MockTransport::new()))
            .with_prompter(Arc::new(StaticPrompter::new("typed")))
            .with_prompt_disabled(true);
        let err = auth
            .authenticate(ProviderId::Github, AuthenticateOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PromptDisabled);
        assert_eq!(err.exit_code(), 4);
    }

    #[tokio::test]
    async fn test_dismissed_prompt_is_cancelled() {
        let auth = manager(Arc::new(MockTransport::new()))
            .with_prompter(Arc::new(StaticPrompter::dismissed()));
        let err = auth
            .authenticate(ProviderId::Github, AuthenticateOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_get_credentials_and_expiry() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let auth = manager(Arc::new(MockTransport::new())).with_clock(clock.shared());

        assert_eq!(
            auth.get_credentials(ProviderId::Github).await.unwrap_err().kind(),
            ErrorKind::NotAuthenticated
        );

        auth.authenticate(
            ProviderId::Github,
            AuthenticateOptions {
                secret: Some(SecretString::from("t")),
                expires_at: Some(start + chrono::Duration::hours(1)),
                ..AuthenticateOptions::default()
            },
        )
        .await
        .unwrap();
        assert!(auth.is_authenticated(ProviderId::Github).await);

        clock.advance(chrono::Duration::hours(2));
        assert!(!auth.is_authenticated(ProviderId::Github).await);
        assert_eq!(
            auth.get_credentials(ProviderId::Github).await.unwrap_err().kind(),
            ErrorKind::NotAuthenticated
        );
        assert!(auth.list_providers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_replaces_expiring_credential() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let auth = manager(Arc::new(MockTransport::new()))
            .with_clock(clock.shared())
            .with_env(env(&[("GITLAB_TOKEN", "rotated")]));

        auth.authenticate(
            ProviderId::Gitlab,
            AuthenticateOptions {
                secret: Some(SecretString::from("old")),
                expires_at: Some(start + chrono::Duration::minutes(3)),
                ..AuthenticateOptions::default()
            },
        )
        .await
        .unwrap();

        let refreshed = auth.refresh(ProviderId::Gitlab).await.unwrap();
        assert_eq!(refreshed.secret.expose_secret(), "rotated");
        assert_eq!(refreshed.expires_at, None);
    }

    #[tokio::test]
    async fn test_validate_success_records_email() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(
            "https://api.github.com/user",
            HttpResponse::new(200, r#"{"id": 7, "login": "dev", "email": "dev@example.com"}"#),
        );
        let auth = manager(Arc::clone(&transport));
        auth.authenticate(
            ProviderId::Github,
            AuthenticateOptions {
                secret: Some(SecretString::from("t")),
                ..AuthenticateOptions::default()
            },
        )
        .await
        .unwrap();

        let identity = auth.validate(ProviderId::Github).await.unwrap();
        assert_eq!(identity.login.as_deref(), Some("dev"));

        let stored = auth.get_credentials(ProviderId::Github).await.unwrap();
        assert_eq!(stored.email.as_deref(), Some("dev@example.com"));

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].headers["authorization"], "Bearer t");
    }

    #[tokio::test]
    async fn test_validate_distinguishes_rejection_from_outage() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("https://api.github.com/user", HttpResponse::new(401, "{}"));
        let auth = manager(Arc::clone(&transport));
        auth.authenticate(
            ProviderId::Github,
            AuthenticateOptions {
                secret: Some(SecretString::from("bad")),
                ..AuthenticateOptions::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(
            auth.validate(ProviderId::Github).await.unwrap_err().kind(),
            ErrorKind::NotAuthenticated
        );

        transport.fail("https://api.github.com/user", ZenError::NetworkError("reset".into()));
        assert_eq!(
            auth.validate(ProviderId::Github).await.unwrap_err().kind(),
            ErrorKind::NetworkError
        );
    }

    #[tokio::test]
    async fn test_credential_for_request_falls_back_to_env_without_storing() {
        let auth = manager(Arc::new(MockTransport::new()))
            .with_env(env(&[("GH_TOKEN", "ci-token")]));
        let credential = auth
            .credential_for_request(ProviderId::Github)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(credential.secret.expose_secret(), "ci-token");
        assert!(!auth.is_authenticated(ProviderId::Github).await);

        assert!(auth
            .credential_for_request(ProviderId::Linear)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_provider_info_and_delete() {
        let auth = manager(Arc::new(MockTransport::new()))
            .with_env(env(&[("JIRA_API_TOKEN", "j"), ("JIRA_EMAIL", "me@acme.io")]));
        auth.authenticate(ProviderId::Jira, AuthenticateOptions::default())
            .await
            .unwrap();

        let info = auth.provider_info(ProviderId::Jira).await.unwrap();
        assert!(info.authenticated);
        assert_eq!(info.email.as_deref(), Some("me@acme.io"));
        assert_eq!(info.display_name, "Jira");

        auth.delete(ProviderId::Jira).await.unwrap();
        auth.delete(ProviderId::Jira).await.unwrap();
        assert!(!auth.provider_info(ProviderId::Jira).await.unwrap().authenticated);
    }
}
