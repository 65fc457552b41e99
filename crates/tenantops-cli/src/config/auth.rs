//! Credential configuration.

use std::fmt;

use clap::Args;
use serde::{Deserialize, Serialize};
use tenantops_reqwest::AccessToken;

/// Bearer credentials for the API.
///
/// The token is never serialized and `Debug` only reports whether it is set.
#[derive(Clone, Default, Args, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token sent in the Authorization header
    #[arg(long = "access-token", env = "TENANTOPS_ACCESS_TOKEN", hide_env_values = true)]
    #[serde(skip_serializing, default)]
    pub access_token: Option<String>,
}

impl AuthConfig {
    /// Returns the configured token, ignoring blank values.
    pub fn access_token(&self) -> Option<AccessToken> {
        self.access_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(AccessToken::new)
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
