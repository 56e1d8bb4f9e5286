//! Credentials
//!
//! The engine never signs requests itself. It receives a pre-issued IAM token
//! (from the environment or the caller) and attaches it to every call.

use anyhow::{anyhow, Result};
use std::fmt;
use std::sync::Arc;

/// Environment variable holding the IAM token
pub const TOKEN_ENV: &str = "HUAWEI_AUTH_TOKEN";
/// Environment variable holding the default project id
pub const PROJECT_ENV: &str = "HUAWEI_PROJECT_ID";
/// Environment variable holding the default region
pub const REGION_ENV: &str = "HUAWEI_DEFAULT_REGION";

/// Token credentials shared by all clients of a run
#[derive(Clone)]
pub struct Credentials {
    token: Arc<str>,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Arc::from(token.into()),
        }
    }

    /// Credentials without a token, for endpoints that need none
    pub fn anonymous() -> Self {
        Self::new("")
    }

    /// Read the token from `HUAWEI_AUTH_TOKEN`
    pub fn from_env() -> Result<Self> {
        match std::env::var(TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => Ok(Self::new(token.trim())),
            _ => Err(anyhow!(
                "No auth token set. Export {} with a valid IAM token",
                TOKEN_ENV
            )),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

// Keep the token out of debug logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &if self.token.is_empty() { "<none>" } else { "<redacted>" })
            .finish()
    }
}

/// Default project from the environment
pub fn get_default_project() -> Option<String> {
    std::env::var(PROJECT_ENV).ok().filter(|s| !s.is_empty())
}

/// Default region from the environment
pub fn get_default_region() -> Option<String> {
    std::env::var(REGION_ENV).ok().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let creds = Credentials::new("secret-token");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("<redacted>"));
        assert_eq!(creds.token(), "secret-token");
    }

    #[test]
    fn test_anonymous_has_empty_token() {
        assert_eq!(Credentials::anonymous().token(), "");
    }
}
