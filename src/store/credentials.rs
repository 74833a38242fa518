//! Connection credentials for REST counter stores.

use std::fmt;

use crate::error::{LimiterError, Result};

use super::Provider;

/// URL and bearer token for a REST counter store.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub url: String,
    pub token: String,
}

impl Credentials {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
        }
    }

    /// Read the credentials for `provider` from the process environment.
    pub fn from_env(provider: Provider) -> Result<Self> {
        Self::from_lookup(provider, |name| std::env::var(name).ok())
    }

    /// Read the credentials for `provider` through `lookup`.
    ///
    /// Both values must be present and non-empty.
    pub fn from_lookup<F>(provider: Provider, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = required(&lookup, provider.url_var(), provider)?;
        let token = required(&lookup, provider.token_var(), provider)?;
        Ok(Self { url, token })
    }
}

fn required<F>(lookup: &F, name: &str, provider: Provider) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(LimiterError::Config(format!(
            "{} is required for the {} provider",
            name, provider
        ))),
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .finish()
    }
}
