//! Provider descriptors
//!
//! The set of providers zen can authenticate against is closed. Each
//! descriptor declares how a secret is attached to requests, where the
//! secret may be found in the environment, and how to ask the provider who
//! the secret belongs to.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use super::credential::Credential;
use crate::error::{Result, ZenError};
use crate::http::HttpRequest;

/// Supported providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// GitHub
    Github,
    /// GitLab
    Gitlab,
    /// Jira Cloud
    Jira,
    /// Linear
    Linear,
}

impl ProviderId {
    /// Every provider, in display order
    pub const ALL: [Self; 4] = [Self::Github, Self::Gitlab, Self::Jira, Self::Linear];

    /// Lowercase identifier
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Gitlab => "gitlab",
            Self::Jira => "jira",
            Self::Linear => "linear",
        }
    }

    /// Static descriptor for this provider
    #[must_use]
    pub fn descriptor(self) -> &'static ProviderDescriptor {
        match self {
            Self::Github => &GITHUB,
            Self::Gitlab => &GITLAB,
            Self::Jira => &JIRA,
            Self::Linear => &LINEAR,
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ZenError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                ZenError::InvalidArgument(format!(
                    "unknown provider '{s}' (expected one of: github, gitlab, jira, linear)"
                ))
            })
    }
}

/// How a secret is presented to the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    /// `Authorization: Bearer <secret>`
    Bearer,
    /// `Authorization: Basic base64(email:secret)`
    Basic,
    /// `<header>: <secret>`
    Header(&'static str),
}

/// How the identity endpoint is queried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityProbe {
    /// GET a path relative to the base URL
    Get(&'static str),
    /// POST a GraphQL query to a path relative to the base URL
    GraphQl(&'static str),
}

/// Static facts about a provider
#[derive(Debug)]
pub struct ProviderDescriptor {
    /// Provider identifier
    pub id: ProviderId,
    /// Human readable name
    pub display_name: &'static str,
    /// Credential presentation
    pub auth_kind: AuthKind,
    /// Environment variables probed for a secret, highest priority first
    pub env_vars: &'static [&'static str],
    /// Environment variables probed for the account email
    pub email_env_vars: &'static [&'static str],
    /// API base URL; empty when it is site specific
    pub base_url: &'static str,
    /// Identity endpoint
    pub identity: IdentityProbe,
}

static GITHUB: ProviderDescriptor = ProviderDescriptor {
    id: ProviderId::Github,
    display_name: "GitHub",
    auth_kind: AuthKind::Bearer,
    env_vars: &["ZEN_GITHUB_TOKEN", "GITHUB_TOKEN", "GH_TOKEN"],
    email_env_vars: &[],
    base_url: "https://api.github.com",
    identity: IdentityProbe::Get("/user"),
};

static GITLAB: ProviderDescriptor = ProviderDescriptor {
    id: ProviderId::Gitlab,
    display_name: "GitLab",
    auth_kind: AuthKind::Header("PRIVATE-TOKEN"),
    env_vars: &["ZEN_GITLAB_TOKEN", "GITLAB_TOKEN", "GL_TOKEN"],
    email_env_vars: &[],
    base_url: "https://gitlab.com/api/v4",
    identity: IdentityProbe::Get("/user"),
};

static JIRA: ProviderDescriptor = ProviderDescriptor {
    id: ProviderId::Jira,
    display_name: "Jira",
    auth_kind: AuthKind::Basic,
    env_vars: &["ZEN_JIRA_TOKEN", "JIRA_API_TOKEN", "JIRA_TOKEN"],
    email_env_vars: &["ZEN_JIRA_EMAIL", "JIRA_EMAIL"],
    base_url: "",
    identity: IdentityProbe::Get("/rest/api/3/myself"),
};

static LINEAR: ProviderDescriptor = ProviderDescriptor {
    id: ProviderId::Linear,
    display_name: "Linear",
    auth_kind: AuthKind::Header("Authorization"),
    env_vars: &["ZEN_LINEAR_TOKEN", "LINEAR_API_KEY", "LINEAR_TOKEN"],
    email_env_vars: &[],
    base_url: "https://api.linear.app",
    identity: IdentityProbe::GraphQl("/graphql"),
};

const LINEAR_VIEWER_QUERY: &str = "{ viewer { id name email } }";

impl ProviderDescriptor {
    /// Header name and value that present `credential` to this provider
    ///
    /// # Errors
    ///
    /// Returns `NotAuthenticated` when a basic-auth provider has no email.
    pub fn authorization(&self, credential: &Credential) -> Result<(&'static str, String)> {
        let secret = credential.secret.expose_secret();
        match self.auth_kind {
            AuthKind::Bearer => Ok(("Authorization", format!("Bearer {secret}"))),
            AuthKind::Basic => {
                let email = credential.email.as_deref().ok_or_else(|| {
                    ZenError::NotAuthenticated(format!(
                        "{} requires an account email alongside the API token",
                        self.display_name
                    ))
                })?;
                let encoded =
                    base64::engine::general_purpose::STANDARD.encode(format!("{email}:{secret}"));
                Ok(("Authorization", format!("Basic {encoded}")))
            }
            AuthKind::Header(name) => Ok((name, secret.to_string())),
        }
    }

    /// Attach `credential` to `request`
    ///
    /// # Errors
    ///
    /// Propagates [`ProviderDescriptor::authorization`] failures.
    pub fn authorize(&self, request: HttpRequest, credential: &Credential) -> Result<HttpRequest> {
        let (name, value) = self.authorization(credential)?;
        request.header(name, &value)
    }

    /// Request that asks the provider who owns the credential
    ///
    /// `base_override` replaces the descriptor's base URL; Jira has none of
    /// its own and always needs one.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when no base URL is known.
    pub fn identity_request(&self, base_override: Option<&str>) -> Result<HttpRequest> {
        let base = base_override
            .filter(|b| !b.trim().is_empty())
            .unwrap_or(self.base_url)
            .trim_end_matches('/');
        if base.is_empty() {
            return Err(ZenError::InvalidArgument(format!(
                "{} has no default API URL; set auth.jira_base_url",
                self.display_name
            )));
        }
        let request = match self.identity {
            IdentityProbe::Get(path) => HttpRequest::get(format!("{base}{path}")),
            IdentityProbe::GraphQl(path) => HttpRequest::post_json(
                format!("{base}{path}"),
                &serde_json::json!({ "query": LINEAR_VIEWER_QUERY }),
            ),
        };
        request.header("Accept", "application/json")
    }

    /// Extract an identity from the provider's response body
    ///
    /// Returns `None` when the payload does not look like an identity.
    #[must_use]
    pub fn parse_identity(&self, body: &[u8]) -> Option<Identity> {
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        let node = match self.identity {
            IdentityProbe::GraphQl(_) => value.get("data")?.get("viewer")?,
            IdentityProbe::Get(_) => &value,
        };

        let id = ["id", "accountId"]
            .iter()
            .find_map(|k| node.get(*k))
            .and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })?;
        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| node.get(*k).and_then(serde_json::Value::as_str))
                .map(ToString::to_string)
        };

        Some(Identity {
            provider: self.id,
            id,
            login: text(&["login", "username", "displayName", "name"]),
            email: text(&["email", "emailAddress"]),
        })
    }
}

/// Who a credential belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Provider that answered
    pub provider: ProviderId,
    /// Provider account id
    pub id: String,
    /// Login or display name
    pub login: Option<String>,
    /// Account email, when the provider discloses it
    pub email: Option<String>,
}
