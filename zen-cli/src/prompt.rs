//! Terminal prompts for credentials

use dialoguer::{theme::ColorfulTheme, Input, Password};
use secrecy::SecretString;
use zen::auth::{ProviderDescriptor, Prompter};
use zen::{Result, ZenError};

/// Asks for secrets on the controlling terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct DialoguerPrompter;

fn interrupted(err: dialoguer::Error) -> ZenError {
    ZenError::Cancelled(format!("prompt aborted: {err}"))
}

impl Prompter for DialoguerPrompter {
    fn secret(&self, provider: &ProviderDescriptor) -> Result<Option<SecretString>> {
        let secret = Password::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("{} token", provider.display_name))
            .allow_empty_password(true)
            .interact()
            .map_err(interrupted)?;
        if secret.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(SecretString::from(secret)))
    }

    fn email(&self, provider: &ProviderDescriptor) -> Result<Option<String>> {
        let email: String = Input::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("{} account email", provider.display_name))
            .allow_empty(true)
            .interact_text()
            .map_err(interrupted)?;
        Ok(Some(email.trim().to_string()).filter(|e| !e.is_empty()))
    }
}
