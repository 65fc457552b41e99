//! Reqwest client configuration.

use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};
use url::Url;

/// Default timeout for HTTP requests: 30 seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default API root: Microsoft Graph v1.0.
pub const DEFAULT_API_BASE_URL: &str = "https://graph.microsoft.com/v1.0/";

/// Largest `$top` Graph accepts on most collections.
pub const MAX_PAGE_SIZE: u32 = 999;

/// Configuration for the reqwest HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct ReqwestConfig {
    /// Root URL that relative request paths are resolved against
    #[cfg_attr(
        feature = "config",
        arg(
            long = "api-base-url",
            env = "TENANTOPS_API_BASE_URL",
            default_value = DEFAULT_API_BASE_URL
        )
    )]
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// HTTP request timeout in seconds
    #[cfg_attr(
        feature = "config",
        arg(long = "http-timeout", env = "HTTP_TIMEOUT", default_value = "30")
    )]
    #[serde(default = "default_timeout_secs")]
    pub http_timeout: u64,

    /// User-Agent header to send with requests
    #[cfg_attr(
        feature = "config",
        arg(long = "http-user-agent", env = "HTTP_USER_AGENT")
    )]
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Page size requested from collection endpoints (`$top`)
    #[cfg_attr(
        feature = "config",
        arg(long = "page-size", env = "TENANTOPS_PAGE_SIZE")
    )]
    #[serde(default)]
    pub page_size: Option<u32>,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_owned()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for ReqwestConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            http_timeout: default_timeout_secs(),
            user_agent: None,
            page_size: None,
        }
    }
}

impl ReqwestConfig {
    /// Create a new configuration rooted at `api_base_url`.
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ..Self::default()
        }
    }

    /// Returns the effective timeout, using default if zero.
    pub fn effective_timeout(&self) -> Duration {
        if self.http_timeout == 0 {
            Duration::from_secs(DEFAULT_TIMEOUT_SECS)
        } else {
            Duration::from_secs(self.http_timeout)
        }
    }

    /// Returns the effective user agent, using default if not set.
    pub fn effective_user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(Self::default_user_agent)
    }

    /// Returns the default user agent string.
    fn default_user_agent() -> String {
        format!("tenantops/{}", env!("CARGO_PKG_VERSION"))
    }

    /// Parses the base URL, making sure relative paths join beneath it.
    pub fn base_url(&self) -> Result<Url, url::ParseError> {
        let mut base = self.api_base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        Url::parse(&base)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> tenantops_core::Result<()> {
        let base = self.base_url().map_err(|e| {
            tenantops_core::Error::configuration()
                .with_message(format!("invalid API base URL '{}'", self.api_base_url))
                .with_source(e)
        })?;

        if !matches!(base.scheme(), "http" | "https") {
            return Err(tenantops_core::Error::configuration().with_message(format!(
                "API base URL '{base}' must use http or https"
            )));
        }

        if let Some(size) = self.page_size
            && !(1..=MAX_PAGE_SIZE).contains(&size)
        {
            return Err(tenantops_core::Error::configuration().with_message(format!(
                "page size {size} is invalid, must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        Ok(())
    }

    /// Set the timeout in seconds.
    #[must_use]
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.http_timeout = timeout_secs;
        self
    }

    /// Set the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set the requested page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }
}
