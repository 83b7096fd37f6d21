//! Canned prompt answers

use std::sync::atomic::{AtomicUsize, Ordering};

use secrecy::SecretString;

use crate::auth::{Prompter, ProviderDescriptor};
use crate::error::Result;

/// [`Prompter`] that gives the same answer every time
#[derive(Debug)]
pub struct StaticPrompter {
    secret: Option<String>,
    email: Option<String>,
    asked: AtomicUsize,
}

impl StaticPrompter {
    /// Answers every secret prompt with `secret`
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
            email: None,
            asked: AtomicUsize::new(0),
        }
    }

    /// Behaves like a user who dismisses every prompt
    #[must_use]
    pub const fn dismissed() -> Self {
        Self {
            secret: None,
            email: None,
            asked: AtomicUsize::new(0),
        }
    }

    /// Also answer email prompts
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Number of secret prompts shown
    #[must_use]
    pub fn times_asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

impl Prompter for StaticPrompter {
    fn secret(&self, _provider: &ProviderDescriptor) -> Result<Option<SecretString>> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        Ok(self.secret.clone().map(SecretString::from))
    }

    fn email(&self, _provider: &ProviderDescriptor) -> Result<Option<String>> {
        Ok(self.email.clone())
    }
}
