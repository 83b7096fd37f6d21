//! Credential commands

use anyhow::Result;
use clap::Subcommand;
use secrecy::SecretString;
use zen::auth::{AuthenticateOptions, ProviderId, ProviderInfo};

use crate::context::AppContext;
use crate::output;

/// Credential commands
#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Store a credential for a provider
    Login {
        /// Provider (github, gitlab, jira, linear)
        provider: ProviderId,

        /// Token to store; read from the environment or a prompt when omitted
        #[arg(long, env = "ZEN_AUTH_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Account email for providers using basic auth
        #[arg(long)]
        email: Option<String>,

        /// Check the credential with the provider after storing it
        #[arg(long)]
        validate: bool,
    },

    /// Show stored credentials
    Status {
        /// Only this provider
        provider: Option<ProviderId>,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Ask the provider who the stored credential belongs to
    Validate {
        /// Provider to check
        provider: ProviderId,
    },

    /// Remove a stored credential
    Logout {
        /// Provider to forget
        provider: ProviderId,
    },
}

impl AuthCommand {
    /// Execute the auth command
    ///
    /// # Errors
    ///
    /// Returns an error if the credential store is unavailable, no secret
    /// could be obtained, or the provider rejects the credential.
    pub async fn execute(self, ctx: &AppContext) -> Result<()> {
        let auth = ctx.auth()?;
        match self {
            Self::Login {
                provider,
                token,
                email,
                validate,
            } => {
                let credential = auth
                    .authenticate(
                        provider,
                        AuthenticateOptions {
                            secret: token.map(SecretString::from),
                            email,
                            expires_at: None,
                        },
                    )
                    .await?;
                output::success(format!(
                    "Stored {} credential in {}",
                    output::value(provider),
                    auth.storage_type()
                ));
                if let Some(source) = credential.source {
                    tracing::debug!(provider = %provider, source = ?source, "credential source");
                }
                if validate {
                    let identity = auth.validate(provider).await?;
                    output::success(format!(
                        "Authenticated as {}",
                        output::value(identity.login.unwrap_or(identity.id))
                    ));
                }
                Ok(())
            }
            Self::Status { provider, json } => {
                let providers = provider.map_or_else(|| ProviderId::ALL.to_vec(), |p| vec![p]);
                let mut infos = Vec::with_capacity(providers.len());
                for provider in providers {
                    infos.push(auth.provider_info(provider).await?);
                }
                if json {
                    return output::json(&infos);
                }
                output::info(format!("Credential storage: {}", auth.storage_type()));
                for info in &infos {
                    print_status(info);
                }
                Ok(())
            }
            Self::Validate { provider } => {
                let identity = auth.validate(provider).await?;
                let who = identity.login.clone().unwrap_or_else(|| identity.id.clone());
                output::success(format!(
                    "{} credential is valid for {}",
                    provider,
                    output::value(who)
                ));
                if let Some(email) = identity.email {
                    output::info(format!("Email: {email}"));
                }
                Ok(())
            }
            Self::Logout { provider } => {
                auth.delete(provider).await?;
                output::success(format!("Removed {} credential", output::value(provider)));
                Ok(())
            }
        }
    }
}

fn print_status(info: &ProviderInfo) {
    if info.authenticated {
        let mut line = format!("{}: authenticated", info.display_name);
        if let Some(email) = &info.email {
            line.push_str(&format!(" as {email}"));
        }
        if let Some(expires) = info.expires_at {
            line.push_str(&format!(", expires {}", expires.to_rfc3339()));
        }
        output::success(line);
    } else {
        output::warning(format!(
            "{}: not authenticated (set {} or run `zen auth login {}`)",
            info.display_name,
            info.env_vars.join(" or "),
            info.provider
        ));
    }
}
