//! Interactive secret entry
//!
//! The library never talks to a terminal itself; the CLI supplies a
//! [`Prompter`] and the auth manager calls it as the last resort.

use secrecy::SecretString;

use super::provider::ProviderDescriptor;
use crate::error::Result;

/// Asks the user for credentials
pub trait Prompter: Send + Sync + std::fmt::Debug {
    /// Ask for the secret of `provider`; `None` means the user gave up
    ///
    /// # Errors
    ///
    /// Implementations report terminal failures as `Cancelled` or `Io`.
    fn secret(&self, provider: &ProviderDescriptor) -> Result<Option<SecretString>>;

    /// Ask for the account email of a basic-auth provider
    ///
    /// # Errors
    ///
    /// As for [`Prompter::secret`].
    fn email(&self, _provider: &ProviderDescriptor) -> Result<Option<String>> {
        Ok(None)
    }
}
